use kornia_3d::Scalar;

use super::{check_buildable, squared_distance, Neighbor, SpatialIndex};
use crate::error::IcpError;

/// Exhaustive nearest neighbour search.
///
/// Every query scans all the points. Queries are independent, so the cost is amortized by
/// running many of them in parallel.
pub struct BruteForceIndex<T> {
    points: Vec<[T; 3]>,
}

impl<T: Scalar> BruteForceIndex<T> {
    /// Build the index over `points`.
    ///
    /// # Errors
    ///
    /// Returns [`IcpError::InvalidInput`] if `points` is empty.
    pub fn build(points: &[[T; 3]]) -> Result<Self, IcpError> {
        check_buildable(points)?;
        Ok(Self {
            points: points.to_vec(),
        })
    }
}

impl<T: Scalar> SpatialIndex<T> for BruteForceIndex<T> {
    fn len(&self) -> usize {
        self.points.len()
    }

    fn nearest(&self, query: &[T; 3]) -> Option<Neighbor<T>> {
        let mut best: Option<Neighbor<T>> = None;
        for (index, p) in self.points.iter().enumerate() {
            let candidate = Neighbor {
                index,
                squared_distance: squared_distance(query, p),
            };
            if candidate.is_closer_than(&best) {
                best = Some(candidate);
            }
        }
        best
    }
}
