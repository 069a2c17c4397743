use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use kornia_3d::Scalar;

use super::{check_buildable, Neighbor, SpatialIndex};
use crate::error::IcpError;

const BUCKET_SIZE: usize = 32;

/// Precisions with a kd-tree implementation.
pub trait KdTreeScalar: Scalar {
    /// The kd-tree type for this precision.
    type Tree: Send + Sync;

    /// Build a tree over the points. Items are the point indices.
    fn build_tree(points: &[[Self; 3]]) -> Self::Tree;

    /// Index and squared distance of the nearest point.
    fn nearest_one(tree: &Self::Tree, query: &[Self; 3]) -> (usize, Self);
}

macro_rules! impl_kdtree_scalar {
    ($($t:ty),*) => {
        $(
            impl KdTreeScalar for $t {
                type Tree = ImmutableKdTree<$t, u32, 3, BUCKET_SIZE>;

                fn build_tree(points: &[[Self; 3]]) -> Self::Tree {
                    ImmutableKdTree::new_from_slice(points)
                }

                fn nearest_one(tree: &Self::Tree, query: &[Self; 3]) -> (usize, Self) {
                    let nn = tree.nearest_one::<SquaredEuclidean>(query);
                    (nn.item as usize, nn.distance)
                }
            }
        )*
    };
}

impl_kdtree_scalar!(f32, f64);

/// Exact nearest neighbour search with a balanced kd-tree.
pub struct KdTreeIndex<T: KdTreeScalar> {
    tree: T::Tree,
    len: usize,
}

impl<T: KdTreeScalar> KdTreeIndex<T> {
    /// Build the index over `points`.
    ///
    /// # Errors
    ///
    /// Returns [`IcpError::InvalidInput`] if `points` is empty or does not fit `u32` indices.
    pub fn build(points: &[[T; 3]]) -> Result<Self, IcpError> {
        check_buildable(points)?;
        let now = std::time::Instant::now();
        let tree = T::build_tree(points);
        log::debug!("kd-tree over {} points built in {:?}", points.len(), now.elapsed());
        Ok(Self {
            tree,
            len: points.len(),
        })
    }
}

impl<T: KdTreeScalar> SpatialIndex<T> for KdTreeIndex<T> {
    fn len(&self) -> usize {
        self.len
    }

    fn nearest(&self, query: &[T; 3]) -> Option<Neighbor<T>> {
        if self.len == 0 {
            return None;
        }
        let (index, squared_distance) = T::nearest_one(&self.tree, query);
        Some(Neighbor {
            index,
            squared_distance,
        })
    }
}
