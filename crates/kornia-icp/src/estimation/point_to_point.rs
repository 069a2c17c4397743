use kornia_3d::{
    linalg::{add3, det33, matmul33, mat3_mul_vec3, scale3, sub3, svd3, transpose33},
    pointcloud::PointCloud,
    transforms::Transform,
    Scalar,
};

use super::{check_correspondences, TransformationEstimator};
use crate::backend::Executor;
use crate::correspondence::CorrespondenceSet;
use crate::error::IcpError;

/// Minimum number of correspondences determining a rigid transformation.
const MIN_CORRESPONDENCES: usize = 3;

/// Point to point estimation with the closed form solution of Kabsch.
///
/// Minimizes `sum |R * s + t - q|^2` over the matched pairs. With centroids `mu_s`, `mu_q` and
/// the cross covariance `H = sum (s - mu_s) (q - mu_q)^T = U S V^T`, the optimum is
/// `R = V * diag(1, 1, det(V U^T)) * U^T` and `t = mu_q - R * mu_s`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointToPoint;

impl<T: Scalar> TransformationEstimator<T> for PointToPoint {
    fn requires_normals(&self) -> bool {
        false
    }

    fn estimate(
        &self,
        executor: &Executor<'_>,
        source: &[[T; 3]],
        target: &PointCloud<T>,
        correspondences: &CorrespondenceSet<T>,
    ) -> Result<Transform<T>, IcpError> {
        let n = correspondences.len();
        if n < MIN_CORRESPONDENCES {
            return Err(IcpError::DegenerateSystem(format!(
                "point to point estimation needs at least {MIN_CORRESPONDENCES} correspondences, got {n}"
            )));
        }
        check_correspondences(source, target, correspondences)?;

        let target_points = target.points();
        let pairs = correspondences.as_slice();

        // compute centroids
        let zero = [T::zero(); 3];
        let (sum_src, sum_dst) = executor.map_reduce(
            pairs,
            (zero, zero),
            |(s, d), c| {
                (
                    add3(&s, &source[c.source_index]),
                    add3(&d, &target_points[c.target_index]),
                )
            },
            |(s0, d0), (s1, d1)| (add3(&s0, &s1), add3(&d0, &d1)),
        );
        let inv_n = T::one() / T::cast_f64(n as f64);
        let src_centroid = scale3(&sum_src, inv_n);
        let dst_centroid = scale3(&sum_dst, inv_n);

        // compute covariance matrix H = sum[(src - src_mean) * (dst - dst_mean)^T]
        let h = executor.map_reduce(
            pairs,
            [[T::zero(); 3]; 3],
            |mut h, c| {
                let s = sub3(&source[c.source_index], &src_centroid);
                let d = sub3(&target_points[c.target_index], &dst_centroid);
                for (i, row) in h.iter_mut().enumerate() {
                    for (j, val) in row.iter_mut().enumerate() {
                        *val += s[i] * d[j];
                    }
                }
                h
            },
            |mut a, b| {
                for (row_a, row_b) in a.iter_mut().zip(b.iter()) {
                    for (x, y) in row_a.iter_mut().zip(row_b.iter()) {
                        *x += *y;
                    }
                }
                a
            },
        );

        let svd = svd3(&h);
        let [s0, s1, _] = svd.s;
        if !(s0 > T::min_positive_value()) || !(s1 > T::epsilon().sqrt() * s0) {
            return Err(IcpError::DegenerateSystem(format!(
                "cross covariance is rank deficient, singular values {:?}",
                svd.s
            )));
        }

        // R = V * diag(1, 1, det(V * U^T)) * U^T
        let mut v = svd.v;
        if det33(&svd.u) * det33(&v) < T::zero() {
            for row in v.iter_mut() {
                row[2] = -row[2];
            }
        }
        let rotation = matmul33(&v, &transpose33(&svd.u));
        let translation = sub3(&dst_centroid, &mat3_mul_vec3(&rotation, &src_centroid));

        Ok(Transform::new(rotation, translation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correspondence::Correspondence;
    use approx::assert_relative_eq;
    use kornia_3d::transforms::axis_angle_to_rotation_matrix;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn identity_pairs<T: Scalar>(n: usize) -> CorrespondenceSet<T> {
        let correspondences = (0..n)
            .map(|i| Correspondence {
                source_index: i,
                target_index: i,
                distance: T::zero(),
            })
            .collect();
        CorrespondenceSet::new(correspondences, 0)
    }

    #[test]
    fn test_recovers_transformation() -> Result<(), Box<dyn std::error::Error>> {
        let mut rng = StdRng::seed_from_u64(7);
        let source = (0..500)
            .map(|_| {
                [
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                ]
            })
            .collect::<Vec<[f64; 3]>>();

        let expected = Transform::new(
            axis_angle_to_rotation_matrix(&[0.3, -1.0, 0.5], 0.7)?,
            [0.4, -0.2, 1.5],
        );
        let target = PointCloud::new(
            source.iter().map(|p| expected.transform_point(p)).collect(),
            None,
            None,
        );

        let estimate =
            PointToPoint.estimate(&Executor::new(None, 64), &source, &target, &identity_pairs(500))?;

        for i in 0..3 {
            assert_relative_eq!(estimate.translation[i], expected.translation[i], epsilon = 1e-9);
            for j in 0..3 {
                assert_relative_eq!(estimate.rotation[i][j], expected.rotation[i][j], epsilon = 1e-9);
            }
        }
        assert!(estimate.orthonormality_error() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_planar_points_give_proper_rotation() -> Result<(), Box<dyn std::error::Error>> {
        // the third singular value of H vanishes for planar clouds
        let source = (0..100)
            .map(|i| [(i % 10) as f64 * 0.1, (i / 10) as f64 * 0.1, 0.0])
            .collect::<Vec<_>>();
        let expected = Transform::new(
            axis_angle_to_rotation_matrix(&[0.0, 0.0, 1.0], 0.2)?,
            [0.1, 0.0, 0.0],
        );
        let target = PointCloud::new(
            source.iter().map(|p| expected.transform_point(p)).collect(),
            None,
            None,
        );

        let estimate =
            PointToPoint.estimate(&Executor::new(None, 16), &source, &target, &identity_pairs(100))?;
        assert_relative_eq!(det33(&estimate.rotation), 1.0, epsilon = 1e-12);
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(estimate.rotation[i][j], expected.rotation[i][j], epsilon = 1e-9);
            }
        }
        Ok(())
    }

    #[test]
    fn test_degenerate_inputs() {
        let executor = Executor::new(None, 16);
        let source = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
        let target = PointCloud::new(source.clone(), None, None);
        let res = PointToPoint.estimate(&executor, &source, &target, &identity_pairs(2));
        assert!(matches!(res, Err(IcpError::DegenerateSystem(_))));

        // collinear
        let source = (0..10).map(|i| [i as f64, 0.0, 0.0]).collect::<Vec<_>>();
        let target = PointCloud::new(source.clone(), None, None);
        let res = PointToPoint.estimate(&executor, &source, &target, &identity_pairs(10));
        assert!(matches!(res, Err(IcpError::DegenerateSystem(_))));
    }

    #[test]
    fn test_out_of_range_correspondence() {
        let source = vec![[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let target = PointCloud::new(source.clone(), None, None);
        let res = PointToPoint.estimate(&Executor::new(None, 16), &source, &target, &identity_pairs(4));
        assert!(matches!(res, Err(IcpError::InvalidInput(_))));
    }
}
