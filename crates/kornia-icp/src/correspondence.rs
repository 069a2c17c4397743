use kornia_3d::Scalar;

use crate::backend::Executor;
use crate::error::IcpError;
use crate::spatial::SpatialIndex;

/// A source point paired with its nearest target point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence<T> {
    /// Index of the point in the source cloud.
    pub source_index: usize,
    /// Index of the nearest point in the target cloud.
    pub target_index: usize,
    /// Euclidean distance between the two points.
    pub distance: T,
}

/// Correspondences of one iteration, ordered by source index.
///
/// Every entry is within the maximum correspondence distance used for the search; the source
/// points without such a neighbour are only counted.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrespondenceSet<T> {
    correspondences: Vec<Correspondence<T>>,
    num_rejected: usize,
}

impl<T: Scalar> CorrespondenceSet<T> {
    /// Pair every source point with its nearest target point within `max_distance`.
    ///
    /// The queries run in parallel on the executor. The result does not depend on the number of
    /// workers.
    ///
    /// # Errors
    ///
    /// Returns [`IcpError::InvalidInput`] if `max_distance` is not a positive finite number.
    pub fn search<I>(
        executor: &Executor<'_>,
        index: &I,
        source: &[[T; 3]],
        max_distance: T,
    ) -> Result<Self, IcpError>
    where
        I: SpatialIndex<T> + ?Sized,
    {
        if !(max_distance.is_finite() && max_distance > T::zero()) {
            return Err(IcpError::InvalidInput(format!(
                "max correspondence distance must be positive and finite, got {max_distance}"
            )));
        }

        let chunks = executor.map_chunks(source, |offset, chunk| {
            chunk
                .iter()
                .enumerate()
                .filter_map(|(i, p)| {
                    index
                        .nearest_within(p, max_distance)
                        .map(|nn| Correspondence {
                            source_index: offset + i,
                            target_index: nn.index,
                            distance: nn.squared_distance.sqrt(),
                        })
                })
                .collect::<Vec<_>>()
        });

        let mut correspondences = Vec::with_capacity(chunks.iter().map(Vec::len).sum());
        for chunk in chunks {
            correspondences.extend(chunk);
        }
        let num_rejected = source.len() - correspondences.len();

        Ok(Self {
            correspondences,
            num_rejected,
        })
    }

    /// Build a set from already filtered correspondences.
    pub fn new(correspondences: Vec<Correspondence<T>>, num_rejected: usize) -> Self {
        Self {
            correspondences,
            num_rejected,
        }
    }

    /// Number of valid correspondences.
    pub fn len(&self) -> usize {
        self.correspondences.len()
    }

    /// Whether no source point found a correspondence.
    pub fn is_empty(&self) -> bool {
        self.correspondences.is_empty()
    }

    /// Number of source points without a correspondence.
    pub fn num_rejected(&self) -> usize {
        self.num_rejected
    }

    /// The correspondences, ordered by source index.
    pub fn as_slice(&self) -> &[Correspondence<T>] {
        &self.correspondences
    }

    /// Iterate over the correspondences.
    pub fn iter(&self) -> std::slice::Iter<'_, Correspondence<T>> {
        self.correspondences.iter()
    }

    /// Fraction of source points with a correspondence.
    pub fn fitness(&self) -> T {
        let total = self.correspondences.len() + self.num_rejected;
        if total == 0 {
            return T::zero();
        }
        T::cast_f64(self.correspondences.len() as f64 / total as f64)
    }

    /// Root mean square of the correspondence distances, zero if the set is empty.
    pub fn inlier_rmse(&self) -> T {
        if self.correspondences.is_empty() {
            return T::zero();
        }
        let sum = self
            .correspondences
            .iter()
            .fold(T::zero(), |acc, c| acc + c.distance * c.distance);
        (sum / T::cast_f64(self.correspondences.len() as f64)).sqrt()
    }
}

impl<'a, T> IntoIterator for &'a CorrespondenceSet<T> {
    type Item = &'a Correspondence<T>;
    type IntoIter = std::slice::Iter<'a, Correspondence<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.correspondences.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::{BruteForceIndex, KdTreeIndex};
    use approx::assert_relative_eq;

    #[test]
    fn test_search_filters_by_distance() -> Result<(), IcpError> {
        let target = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let source = vec![[0.05, 0.0, 0.0], [0.5, 0.5, 0.5], [1.0, 0.0, 0.08], [0.0, 0.85, 0.0]];
        let index = KdTreeIndex::build(&target)?;
        let executor = Executor::new(None, 2);

        let set = CorrespondenceSet::search(&executor, &index, &source, 0.1)?;
        assert_eq!(set.len(), 2);
        assert_eq!(set.num_rejected(), 2);

        let pairs = set
            .iter()
            .map(|c| (c.source_index, c.target_index))
            .collect::<Vec<_>>();
        assert_eq!(pairs, vec![(0, 0), (2, 1)]);
        assert!(set.iter().all(|c| c.distance <= 0.1));

        assert_relative_eq!(set.fitness(), 0.5);
        let expected_rmse = ((0.05f64 * 0.05 + 0.08 * 0.08) / 2.0).sqrt();
        assert_relative_eq!(set.inlier_rmse(), expected_rmse, epsilon = 1e-12);

        // a larger distance never loses correspondences
        let set = CorrespondenceSet::search(&executor, &index, &source, 0.2)?;
        assert_eq!(set.len(), 3);
        assert_eq!(set.num_rejected(), 1);
        Ok(())
    }

    #[test]
    fn test_order_independent_of_chunking() -> Result<(), IcpError> {
        let target = (0..50)
            .map(|i| [i as f64 * 0.1, 0.0, 0.0])
            .collect::<Vec<_>>();
        let source = (0..200)
            .map(|i| [i as f64 * 0.026, 0.01, 0.0])
            .collect::<Vec<_>>();
        let index = BruteForceIndex::build(&target)?;

        let a = CorrespondenceSet::search(&Executor::new(None, 1), &index, &source, 0.05)?;
        let b = CorrespondenceSet::search(&Executor::new(None, 64), &index, &source, 0.05)?;
        assert_eq!(a, b);
        assert!(a.iter().zip(a.iter().skip(1)).all(|(x, y)| x.source_index < y.source_index));
        Ok(())
    }

    #[test]
    fn test_empty_set_metrics() {
        let set = CorrespondenceSet::<f32>::new(vec![], 10);
        assert!(set.is_empty());
        assert_eq!(set.fitness(), 0.0);
        assert_eq!(set.inlier_rmse(), 0.0);
    }

    #[test]
    fn test_invalid_distance() -> Result<(), IcpError> {
        let index = KdTreeIndex::build(&[[0.0, 0.0, 0.0]])?;
        let res = CorrespondenceSet::search(&Executor::new(None, 8), &index, &[[0.0, 0.0, 0.0]], 0.0);
        assert!(matches!(res, Err(IcpError::InvalidInput(_))));
        Ok(())
    }
}
