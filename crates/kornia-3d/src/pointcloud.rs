use crate::scalar::Scalar;
use crate::transforms::Transform;

/// A point cloud with points, colors, and normals.
///
/// The precision of the points and normals is given by `T`, `f64` by default.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud<T = f64> {
    // The points in the point cloud.
    points: Vec<[T; 3]>,
    // The colors of the points.
    colors: Option<Vec<[u8; 3]>>,
    // The normals of the points.
    normals: Option<Vec<[T; 3]>>,
}

impl<T: Scalar> PointCloud<T> {
    /// Create a new point cloud from points, colors (optional), and normals (optional).
    pub fn new(
        points: Vec<[T; 3]>,
        colors: Option<Vec<[u8; 3]>>,
        normals: Option<Vec<[T; 3]>>,
    ) -> Self {
        Self {
            points,
            colors,
            normals,
        }
    }

    /// Get the number of points in the point cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get as reference the points in the point cloud.
    pub fn points(&self) -> &[[T; 3]] {
        &self.points
    }

    /// Get as reference the colors of the points in the point cloud.
    pub fn colors(&self) -> Option<&[[u8; 3]]> {
        self.colors.as_deref()
    }

    /// Get as reference the normals of the points in the point cloud.
    pub fn normals(&self) -> Option<&[[T; 3]]> {
        self.normals.as_deref()
    }

    /// Check that there is exactly one normal per point.
    pub fn has_normals(&self) -> bool {
        self.normals
            .as_ref()
            .is_some_and(|normals| normals.len() == self.points.len())
    }

    /// Get the minimum bound of the point cloud.
    pub fn get_min_bound(&self) -> [T; 3] {
        self.fold_points(|a, b| a.min(b))
    }

    /// Get the maximum bound of the point cloud.
    pub fn get_max_bound(&self) -> [T; 3] {
        self.fold_points(|a, b| a.max(b))
    }

    /// Get the mean of the points.
    pub fn get_center(&self) -> [T; 3] {
        if self.points.is_empty() {
            return [T::zero(); 3];
        }
        let n = T::cast_f64(self.points.len() as f64);
        let mut sum = [T::zero(); 3];
        for p in self.points.iter() {
            sum[0] += p[0];
            sum[1] += p[1];
            sum[2] += p[2];
        }
        [sum[0] / n, sum[1] / n, sum[2] / n]
    }

    fn fold_points(&self, f: impl Fn(T, T) -> T) -> [T; 3] {
        let Some(first) = self.points.first() else {
            return [T::zero(); 3];
        };
        self.points.iter().fold(*first, |acc, p| {
            [f(acc[0], p[0]), f(acc[1], p[1]), f(acc[2], p[2])]
        })
    }

    /// Apply a rigid transformation in place. Normals are rotated.
    pub fn transform(&mut self, transform: &Transform<T>) {
        for p in self.points.iter_mut() {
            *p = transform.transform_point(p);
        }
        if let Some(normals) = self.normals.as_mut() {
            for n in normals.iter_mut() {
                *n = transform.rotate_vector(n);
            }
        }
    }

    /// Return a transformed copy of the point cloud.
    pub fn transformed(&self, transform: &Transform<T>) -> Self {
        let mut out = self.clone();
        out.transform(transform);
        out
    }

    /// Remove the points with NaN and/or infinite coordinates.
    ///
    /// Colors and normals of the removed points are dropped too. Returns the number of points
    /// that were removed.
    pub fn remove_non_finite_points(&mut self, remove_nan: bool, remove_infinite: bool) -> usize {
        let keep = self
            .points
            .iter()
            .map(|p| {
                let has_nan = p.iter().any(|v| v.is_nan());
                let has_inf = p.iter().any(|v| v.is_infinite());
                !((remove_nan && has_nan) || (remove_infinite && has_inf))
            })
            .collect::<Vec<_>>();

        let old_len = self.points.len();
        self.points = retain_by_mask(std::mem::take(&mut self.points), &keep);
        self.colors = self.colors.take().map(|c| retain_by_mask(c, &keep));
        self.normals = self.normals.take().map(|n| retain_by_mask(n, &keep));

        let removed = old_len - self.points.len();
        if removed > 0 {
            log::debug!(
                "Removed {} non-finite points, {} remaining",
                removed,
                self.points.len()
            );
        }
        removed
    }

    /// Convert the point cloud to another precision.
    pub fn cast<U: Scalar>(&self) -> PointCloud<U> {
        PointCloud {
            points: self.points.iter().map(|p| p.map(|v| v.cast())).collect(),
            colors: self.colors.clone(),
            normals: self
                .normals
                .as_ref()
                .map(|normals| normals.iter().map(|n| n.map(|v| v.cast())).collect()),
        }
    }
}

fn retain_by_mask<V>(values: Vec<V>, keep: &[bool]) -> Vec<V> {
    values
        .into_iter()
        .zip(keep.iter())
        .filter_map(|(v, &k)| k.then_some(v))
        .collect()
}
