use kornia_3d::Scalar;

mod brute_force;
pub use brute_force::BruteForceIndex;

mod grid;
pub use grid::VoxelGridIndex;

mod kdtree;
pub use kdtree::{KdTreeIndex, KdTreeScalar};

use crate::error::IcpError;

/// The nearest target point of a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor<T> {
    /// Index of the point in the indexed cloud.
    pub index: usize,
    /// Squared Euclidean distance to the query.
    pub squared_distance: T,
}

impl<T: Scalar> Neighbor<T> {
    /// Whether `self` is strictly better than `other`: closer, or as close with a lower index.
    #[inline]
    pub(crate) fn is_closer_than(&self, other: &Option<Self>) -> bool {
        match other {
            None => true,
            Some(o) => {
                self.squared_distance < o.squared_distance
                    || (self.squared_distance == o.squared_distance && self.index < o.index)
            }
        }
    }
}

/// Exact nearest neighbour search over a fixed set of points.
///
/// Implementations are read only after construction and can be queried concurrently.
pub trait SpatialIndex<T: Scalar>: Send + Sync {
    /// Number of indexed points.
    fn len(&self) -> usize;

    /// Whether the index holds no points.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The exact nearest neighbour of `query`. `None` only if the index is empty.
    fn nearest(&self, query: &[T; 3]) -> Option<Neighbor<T>>;

    /// The exact nearest neighbour of `query` if it lies within `max_distance`.
    fn nearest_within(&self, query: &[T; 3], max_distance: T) -> Option<Neighbor<T>> {
        self.nearest(query)
            .filter(|n| n.squared_distance <= max_distance * max_distance)
    }
}

#[inline]
pub(crate) fn squared_distance<T: Scalar>(a: &[T; 3], b: &[T; 3]) -> T {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

/// Reject clouds an index cannot be built over.
pub(crate) fn check_buildable<T: Scalar>(points: &[[T; 3]]) -> Result<(), IcpError> {
    if points.is_empty() {
        return Err(IcpError::InvalidInput(
            "cannot build a spatial index over an empty cloud".to_string(),
        ));
    }
    if points.len() > u32::MAX as usize {
        return Err(IcpError::InvalidInput(format!(
            "cannot index {} points, the limit is {}",
            points.len(),
            u32::MAX
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_utils {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    pub fn random_points(n: usize, seed: u64) -> Vec<[f64; 3]> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                [
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                ]
            })
            .collect()
    }
}
