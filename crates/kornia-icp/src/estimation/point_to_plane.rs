use kornia_3d::{
    linalg::{add3, cross_product3, dot_product3, mat3_mul_vec3, scale3, sub3},
    pointcloud::PointCloud,
    transforms::{rotation_from_zyx, Transform},
    Scalar,
};

use super::{check_correspondences, TransformationEstimator};
use crate::backend::Executor;
use crate::correspondence::CorrespondenceSet;
use crate::error::IcpError;
use crate::ops::solve_cholesky6;

/// Number of unknowns of the linearized problem.
const NUM_PARAMS: usize = 6;

/// Squared pivots of the normal equations below this multiple of the scalar epsilon, relative to
/// their diagonal entry, make the system singular.
const PIVOT_TOLERANCE_FACTOR: f64 = 1e2;

/// Point to plane estimation with one linearized least squares step.
///
/// For a source point `s` matched to a target point `q` with normal `n` the residual is
/// `r = (s - q) . n`. The problem is linearized about the centroid `c` of the matched target
/// points: with `s' = s - c` and `R ~ I + [w]x` the Jacobian row is `J = [s' x n, n]` with respect
/// to `x = (alpha, beta, gamma, tx, ty, tz)`. The normal equations `J^T J x = -J^T r` are
/// accumulated and solved in `f64` by Cholesky.
///
/// The increment rotates about `c`: `R = Rz(gamma) * Ry(beta) * Rx(alpha)` and the translation is
/// `t + c - R c`. Centering keeps the rotation and translation columns apart however far the
/// clouds are from the origin.
///
/// The linearization only holds for small rotations per iteration; large initial misalignment
/// has to be handled by the initial transformation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointToPlane;

/// Accumulated lower triangle of `J^T J` and `J^T r`.
#[derive(Debug, Clone, Copy)]
struct NormalEquations {
    jtj: [[f64; NUM_PARAMS]; NUM_PARAMS],
    jtr: [f64; NUM_PARAMS],
}

impl NormalEquations {
    fn zeros() -> Self {
        Self {
            jtj: [[0.0; NUM_PARAMS]; NUM_PARAMS],
            jtr: [0.0; NUM_PARAMS],
        }
    }

    #[inline]
    fn add_row(mut self, j: &[f64; NUM_PARAMS], r: f64) -> Self {
        for i in 0..NUM_PARAMS {
            for k in 0..=i {
                self.jtj[i][k] += j[i] * j[k];
            }
            self.jtr[i] += j[i] * r;
        }
        self
    }

    fn merge(mut self, other: Self) -> Self {
        for i in 0..NUM_PARAMS {
            for k in 0..=i {
                self.jtj[i][k] += other.jtj[i][k];
            }
            self.jtr[i] += other.jtr[i];
        }
        self
    }
}

#[inline]
fn to_f64<T: Scalar>(p: &[T; 3]) -> [f64; 3] {
    p.map(|v| v.into_f64())
}

impl<T: Scalar> TransformationEstimator<T> for PointToPlane {
    fn requires_normals(&self) -> bool {
        true
    }

    fn estimate(
        &self,
        executor: &Executor<'_>,
        source: &[[T; 3]],
        target: &PointCloud<T>,
        correspondences: &CorrespondenceSet<T>,
    ) -> Result<Transform<T>, IcpError> {
        let normals = match target.normals() {
            Some(normals) if target.has_normals() => normals,
            _ => {
                return Err(IcpError::InvalidInput(
                    "point to plane estimation requires target normals".to_string(),
                ))
            }
        };

        let n = correspondences.len();
        if n < NUM_PARAMS {
            return Err(IcpError::DegenerateSystem(format!(
                "point to plane estimation needs at least {NUM_PARAMS} correspondences, got {n}"
            )));
        }
        check_correspondences(source, target, correspondences)?;

        let target_points = target.points();
        let sum = executor.map_reduce(
            correspondences.as_slice(),
            [0.0f64; 3],
            |acc, c| add3(&acc, &to_f64(&target_points[c.target_index])),
            |a, b| add3(&a, &b),
        );
        let center = scale3(&sum, 1.0 / n as f64);

        let system = executor.map_reduce(
            correspondences.as_slice(),
            NormalEquations::zeros(),
            |acc, c| {
                let s = sub3(&to_f64(&source[c.source_index]), &center);
                let q = sub3(&to_f64(&target_points[c.target_index]), &center);
                let normal = to_f64(&normals[c.target_index]);
                let r = dot_product3(&sub3(&s, &q), &normal);
                let sxn = cross_product3(&s, &normal);
                let j = [sxn[0], sxn[1], sxn[2], normal[0], normal[1], normal[2]];
                acc.add_row(&j, r)
            },
            NormalEquations::merge,
        );

        let rhs = system.jtr.map(|v| -v);
        let rel_tol = T::epsilon().into_f64() * PIVOT_TOLERANCE_FACTOR;
        let x = solve_cholesky6(&system.jtj, &rhs, rel_tol).ok_or_else(|| {
            IcpError::DegenerateSystem(format!(
                "point to plane normal equations are singular for {n} correspondences"
            ))
        })?;

        let rotation = rotation_from_zyx(&[x[0], x[1], x[2]]);
        let translation = add3(
            &[x[3], x[4], x[5]],
            &sub3(&center, &mat3_mul_vec3(&rotation, &center)),
        );
        Ok(Transform::new(rotation, translation).cast())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correspondence::Correspondence;
    use approx::assert_relative_eq;
    use kornia_3d::transforms::axis_angle_to_rotation_matrix;

    /// Three orthogonal planes through the origin, with their normals.
    fn corner(steps: usize) -> PointCloud<f64> {
        let mut points = Vec::new();
        let mut normals = Vec::new();
        for i in 0..steps {
            for j in 0..steps {
                let (a, b) = (i as f64 * 0.1, j as f64 * 0.1);
                points.extend([[a, b, 0.0], [a, 0.0, b], [0.0, a, b]]);
                normals.extend([[0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]);
            }
        }
        PointCloud::new(points, None, Some(normals))
    }

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
    fn test_pure_translation_is_exact() -> Result<(), Box<dyn std::error::Error>> {
        let source = corner(10);
        let expected = Transform::new(Transform::<f64>::identity().rotation, [0.01, -0.02, 0.005]);
        let target = source.transformed(&expected);

        let estimate = PointToPlane.estimate(
            &Executor::new(None, 32),
            source.points(),
            &target,
            &identity_pairs(source.len()),
        )?;

        for i in 0..3 {
            assert_relative_eq!(estimate.translation[i], expected.translation[i], epsilon = 1e-12);
            for j in 0..3 {
                assert_relative_eq!(estimate.rotation[i][j], expected.rotation[i][j], epsilon = 1e-12);
            }
        }
        Ok(())
    }

    #[test]
    fn test_small_rotation() -> Result<(), Box<dyn std::error::Error>> {
        let source = corner(10);
        let expected = Transform::new(
            axis_angle_to_rotation_matrix(&[1.0, 2.0, -1.0], 0.01)?,
            [0.005, 0.01, -0.01],
        );
        let target = source.transformed(&expected);

        let estimate = PointToPlane.estimate(
            &Executor::new(None, 32),
            source.points(),
            &target,
            &identity_pairs(source.len()),
        )?;

        for i in 0..3 {
            assert_relative_eq!(estimate.translation[i], expected.translation[i], epsilon = 1e-3);
            for j in 0..3 {
                assert_relative_eq!(estimate.rotation[i][j], expected.rotation[i][j], epsilon = 1e-3);
            }
        }
        assert!(estimate.orthonormality_error() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_single_plane_is_degenerate() {
        let points = (0..100)
            .map(|i| [(i % 10) as f64 * 0.1, (i / 10) as f64 * 0.1, 0.0])
            .collect::<Vec<_>>();
        let normals = vec![[0.0, 0.0, 1.0]; points.len()];
        let target = PointCloud::new(points.clone(), None, Some(normals));

        let res = PointToPlane.estimate(
            &Executor::new(None, 32),
            &points,
            &target,
            &identity_pairs(points.len()),
        );
        assert!(matches!(res, Err(IcpError::DegenerateSystem(_))));
    }

    #[test]
    fn test_too_few_correspondences() {
        let target = corner(2);
        let res = PointToPlane.estimate(
            &Executor::new(None, 32),
            target.points(),
            &target,
            &identity_pairs(5),
        );
        assert!(matches!(res, Err(IcpError::DegenerateSystem(_))));
    }

    #[test]
    fn test_missing_normals() {
        let source = corner(3);
        let target = PointCloud::new(source.points().to_vec(), None, None);
        let res = PointToPlane.estimate(
            &Executor::new(None, 32),
            source.points(),
            &target,
            &identity_pairs(source.len()),
        );
        assert!(matches!(res, Err(IcpError::InvalidInput(_))));
    }

    #[test]
    fn test_offset_scene_f32() -> Result<(), Box<dyn std::error::Error>> {
        // the same corner far from the origin stays well posed in single precision
        for offset in [2.0, 5.0, 10.0, 20.0] {
            let shift = Transform::new(Transform::<f64>::identity().rotation, [offset; 3]);
            let source = corner(10).transformed(&shift);
            let center = [offset + 0.45; 3];
            let rotation = axis_angle_to_rotation_matrix(&[1.0, 2.0, -1.0], 0.5f64.to_radians())?;
            let expected = Transform::new(
                rotation,
                add3(
                    &sub3(&center, &mat3_mul_vec3(&rotation, &center)),
                    &[0.005, 0.0, 0.0],
                ),
            );
            let target = source.transformed(&expected);
            let (source, target) = (source.cast::<f32>(), target.cast::<f32>());

            let estimate = PointToPlane.estimate(
                &Executor::new(None, 32),
                source.points(),
                &target,
                &identity_pairs(source.len()),
            )?;

            // one linearized step: second order rotation error is amplified by the offset
            let expected = expected.cast::<f32>();
            for i in 0..3 {
                assert_relative_eq!(estimate.translation[i], expected.translation[i], epsilon = 5e-3);
                for j in 0..3 {
                    assert_relative_eq!(estimate.rotation[i][j], expected.rotation[i][j], epsilon = 1e-3);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_reduction_independent_of_workers() -> Result<(), Box<dyn std::error::Error>> {
        let source = corner(20).cast::<f32>();
        let shift = Transform::new(
            axis_angle_to_rotation_matrix(&[0.0f32, 0.0, 1.0], 0.02)?,
            [0.01, 0.0, 0.0],
        );
        let target = source.transformed(&shift);
        let pairs = identity_pairs(source.len());

        let mut estimates = Vec::new();
        for threads in [1, 3, 8] {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
            let executor = Executor::new(Some(&pool), 64);
            estimates.push(PointToPlane.estimate(&executor, source.points(), &target, &pairs)?);
        }
        assert_eq!(estimates[0], estimates[1]);
        assert_eq!(estimates[0], estimates[2]);
        Ok(())
    }
}
