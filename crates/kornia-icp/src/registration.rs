use std::time::{Duration, Instant};

use kornia_3d::{linalg::det33, pointcloud::PointCloud, transforms::Transform, Scalar};
use num_traits::Float;

use crate::backend::{Backend, Executor};
use crate::correspondence::CorrespondenceSet;
use crate::error::IcpError;
use crate::estimation::TransformationEstimator;

/// Initial rotations further than this from SO(3) are reported before being projected.
const ORTHONORMALITY_WARN_THRESHOLD: f64 = 1e-3;

/// Initial rotations further than this from SO(3) are rejected.
const ORTHONORMALITY_REJECT_THRESHOLD: f64 = 0.1;

/// Structure to define the ICP convergence criteria.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceCriteria {
    /// Maximum number of iterations to perform.
    pub max_iteration: usize,
    /// Convergence tolerance on the change of fitness between two consecutive iterations.
    pub relative_fitness: f64,
    /// Convergence tolerance on the change of inlier RMSE between two consecutive iterations.
    pub relative_rmse: f64,
    /// Wall clock budget, checked before every iteration after the first.
    pub timeout: Option<Duration>,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            max_iteration: 30,
            relative_fitness: 1e-6,
            relative_rmse: 1e-6,
            timeout: None,
        }
    }
}

impl ConvergenceCriteria {
    /// Set the maximum number of iterations.
    pub fn with_max_iteration(mut self, max_iteration: usize) -> Self {
        self.max_iteration = max_iteration;
        self
    }

    /// Set the fitness tolerance.
    pub fn with_relative_fitness(mut self, relative_fitness: f64) -> Self {
        self.relative_fitness = relative_fitness;
        self
    }

    /// Set the inlier RMSE tolerance.
    pub fn with_relative_rmse(mut self, relative_rmse: f64) -> Self {
        self.relative_rmse = relative_rmse;
        self
    }

    /// Set the wall clock budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn validate(&self) -> Result<(), IcpError> {
        if self.max_iteration == 0 {
            return Err(IcpError::InvalidInput(
                "max_iteration must be > 0".to_string(),
            ));
        }
        for (name, value) in [
            ("relative_fitness", self.relative_fitness),
            ("relative_rmse", self.relative_rmse),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(IcpError::InvalidInput(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Why the registration loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Fitness and inlier RMSE both changed less than their tolerance.
    Converged,
    /// The iteration budget was used up.
    MaxIterationsReached,
    /// The time budget was used up.
    TimedOut,
}

/// Result of the ICP algorithm.
///
/// The transformation is from the source to the target frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationResult<T = f64> {
    /// Estimated transformation.
    pub transformation: Transform<T>,
    /// Fraction of source points with a correspondence under the estimated transformation.
    pub fitness: T,
    /// RMSE of the correspondences under the estimated transformation.
    pub inlier_rmse: T,
    /// The total number of iterations performed.
    pub num_iterations: usize,
    /// Why the loop stopped.
    pub termination: TerminationReason,
}

/// Alignment quality of a transformation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistrationMetrics<T = f64> {
    /// Fraction of source points with a correspondence.
    pub fitness: T,
    /// RMSE of the correspondences.
    pub inlier_rmse: T,
    /// Number of correspondences.
    pub num_correspondences: usize,
}

impl<T: Scalar> RegistrationMetrics<T> {
    fn from_correspondences(correspondences: &CorrespondenceSet<T>) -> Self {
        Self {
            fitness: correspondences.fitness(),
            inlier_rmse: correspondences.inlier_rmse(),
            num_correspondences: correspondences.len(),
        }
    }
}

fn validate_cloud<T: Scalar>(name: &str, cloud: &PointCloud<T>) -> Result<(), IcpError> {
    if cloud.is_empty() {
        return Err(IcpError::InvalidInput(format!("{name} point cloud is empty")));
    }
    if let Some(i) = cloud
        .points()
        .iter()
        .position(|p| p.iter().any(|v| !v.is_finite()))
    {
        return Err(IcpError::InvalidInput(format!(
            "{name} point {i} is not finite, remove non-finite points first"
        )));
    }
    Ok(())
}

fn validate_inputs<T: Scalar>(
    source: &PointCloud<T>,
    target: &PointCloud<T>,
    max_correspondence_distance: T,
    transformation: &Transform<T>,
) -> Result<(), IcpError> {
    validate_cloud("source", source)?;
    validate_cloud("target", target)?;
    if !(max_correspondence_distance.is_finite() && max_correspondence_distance > T::zero()) {
        return Err(IcpError::InvalidInput(format!(
            "max correspondence distance must be positive and finite, got {max_correspondence_distance}"
        )));
    }
    if !transformation.is_finite() {
        return Err(IcpError::InvalidInput(
            "transformation contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

/// Write `transformation` applied to `points` into `dst`.
fn transform_into<T: Scalar>(
    executor: &Executor<'_>,
    points: &[[T; 3]],
    transformation: &Transform<T>,
    dst: &mut [[T; 3]],
) {
    dst.copy_from_slice(points);
    executor.for_each_mut(dst, |p| *p = transformation.transform_point(p));
}

fn validate_normals<T: Scalar>(target: &PointCloud<T>) -> Result<(), IcpError> {
    match target.normals() {
        Some(normals) if target.has_normals() => {
            if let Some(i) = normals.iter().position(|n| n.iter().any(|v| !v.is_finite())) {
                return Err(IcpError::InvalidInput(format!(
                    "target normal {i} is not finite"
                )));
            }
            Ok(())
        }
        _ => Err(IcpError::InvalidInput(
            "the estimation method requires target normals".to_string(),
        )),
    }
}

/// Iterative Closest Point (ICP) registration.
///
/// Each iteration pairs every point of a working copy of the source with its nearest target
/// point within `max_correspondence_distance`, estimates the increment aligning the pairs,
/// composes it into the running transformation and re-transforms the working copy from the
/// source with it. The loop
/// stops once both the fitness and the inlier RMSE change less than their tolerance between
/// two iterations, when `criteria.max_iteration` iterations were done or when the time budget
/// is used up.
///
/// # Arguments
///
/// * `source` - Source point cloud.
/// * `target` - Target point cloud, with normals for point to plane estimation.
/// * `max_correspondence_distance` - Pairs further apart are not correspondences.
/// * `init` - Initial transformation from the source to the target frame. Its rotation is
///   projected onto SO(3); it must be a proper rotation up to small drift.
/// * `estimator` - Strategy estimating the increment of each iteration.
/// * `criteria` - Convergence criteria.
/// * `backend` - Device, precision and workers to run on.
///
/// # Returns
///
/// The transformation from the source to the target frame, with fitness and inlier RMSE
/// evaluated for that transformation.
///
/// # Errors
///
/// * [`IcpError::InvalidInput`] if a cloud is empty or not finite, the distance or the
///   criteria are invalid, required normals are missing, or the initial rotation is far from
///   SO(3) or a reflection.
/// * [`IcpError::NoCorrespondences`] if an iteration finds no pair within the distance.
/// * [`IcpError::DegenerateSystem`] if the correspondences do not determine a transformation.
/// * [`IcpError::Backend`] if the backend cannot allocate its buffers.
pub fn registration_icp<B, E>(
    source: &PointCloud<B::Scalar>,
    target: &PointCloud<B::Scalar>,
    max_correspondence_distance: B::Scalar,
    init: &Transform<B::Scalar>,
    estimator: &E,
    criteria: &ConvergenceCriteria,
    backend: &B,
) -> Result<RegistrationResult<B::Scalar>, IcpError>
where
    B: Backend,
    E: TransformationEstimator<B::Scalar> + ?Sized,
{
    validate_inputs(source, target, max_correspondence_distance, init)?;
    if estimator.requires_normals() {
        validate_normals(target)?;
    }
    criteria.validate()?;

    let start = Instant::now();

    let orthonormality_error = init.orthonormality_error();
    let det = det33(&init.rotation);
    let is_rotation =
        orthonormality_error.into_f64() <= ORTHONORMALITY_REJECT_THRESHOLD && det.into_f64() > 0.0;
    if !is_rotation {
        return Err(IcpError::InvalidInput(format!(
            "initial rotation is not close to a rotation (orthonormality error {orthonormality_error}, determinant {det})"
        )));
    }
    if orthonormality_error.into_f64() > ORTHONORMALITY_WARN_THRESHOLD {
        log::warn!(
            "initial rotation is not orthonormal (error {}), projecting onto SO(3)",
            orthonormality_error
        );
    }
    let mut transformation = init.orthonormalized();

    let _lease = backend
        .memory_pool()
        .acquire(std::mem::size_of_val(source.points()))?;
    let index = backend.build_index(target.points(), max_correspondence_distance)?;
    let executor = backend.executor();

    let mut current_source = source.points().to_vec();
    transform_into(&executor, source.points(), &transformation, &mut current_source);

    log::debug!(
        "ICP on {}: {} source points, {} target points, max distance {}",
        backend.device(),
        source.len(),
        target.len(),
        max_correspondence_distance
    );

    let mut prev_fitness = B::Scalar::neg_infinity();
    let mut prev_rmse = B::Scalar::infinity();
    let mut iteration = 0;

    let termination = loop {
        if iteration > 0 {
            if let Some(timeout) = criteria.timeout {
                if start.elapsed() >= timeout {
                    break TerminationReason::TimedOut;
                }
            }
        }

        let now = Instant::now();

        let correspondences = CorrespondenceSet::search(
            &executor,
            &index,
            &current_source,
            max_correspondence_distance,
        )?;
        if correspondences.is_empty() {
            return Err(IcpError::NoCorrespondences {
                iteration,
                max_distance: max_correspondence_distance.into_f64(),
            });
        }
        let fitness = correspondences.fitness();
        let rmse = correspondences.inlier_rmse();

        let increment = estimator.estimate(&executor, &current_source, target, &correspondences)?;

        // total = increment * total, kept on SO(3)
        transformation = increment.compose(&transformation).orthonormalized();
        transform_into(&executor, source.points(), &transformation, &mut current_source);
        iteration += 1;

        log::debug!(
            "iteration {}: {} correspondences, fitness {}, inlier rmse {}, elapsed {:?}",
            iteration,
            correspondences.len(),
            fitness,
            rmse,
            now.elapsed()
        );

        if (fitness - prev_fitness).abs().into_f64() < criteria.relative_fitness
            && (rmse - prev_rmse).abs().into_f64() < criteria.relative_rmse
        {
            break TerminationReason::Converged;
        }
        if iteration >= criteria.max_iteration {
            break TerminationReason::MaxIterationsReached;
        }

        prev_fitness = fitness;
        prev_rmse = rmse;
    };

    // the working copy is the source under the returned transformation
    let correspondences = CorrespondenceSet::search(
        &executor,
        &index,
        &current_source,
        max_correspondence_distance,
    )?;
    let metrics = RegistrationMetrics::from_correspondences(&correspondences);

    log::info!(
        "ICP {:?} after {} iterations: fitness {}, inlier rmse {}, elapsed {:?}",
        termination,
        iteration,
        metrics.fitness,
        metrics.inlier_rmse,
        start.elapsed()
    );

    Ok(RegistrationResult {
        transformation,
        fitness: metrics.fitness,
        inlier_rmse: metrics.inlier_rmse,
        num_iterations: iteration,
        termination,
    })
}

/// Evaluate how well `transformation` aligns the source to the target without iterating.
///
/// # Errors
///
/// Returns [`IcpError::InvalidInput`] for empty or non-finite clouds, an invalid distance or a
/// non-finite transformation, and [`IcpError::Backend`] if the backend cannot allocate.
pub fn evaluate_registration<B: Backend>(
    source: &PointCloud<B::Scalar>,
    target: &PointCloud<B::Scalar>,
    max_correspondence_distance: B::Scalar,
    transformation: &Transform<B::Scalar>,
    backend: &B,
) -> Result<RegistrationMetrics<B::Scalar>, IcpError> {
    validate_inputs(source, target, max_correspondence_distance, transformation)?;

    let _lease = backend
        .memory_pool()
        .acquire(std::mem::size_of_val(source.points()))?;
    let index = backend.build_index(target.points(), max_correspondence_distance)?;
    let executor = backend.executor();

    let mut current_source = source.points().to_vec();
    transform_into(&executor, source.points(), transformation, &mut current_source);

    let correspondences = CorrespondenceSet::search(
        &executor,
        &index,
        &current_source,
        max_correspondence_distance,
    )?;
    Ok(RegistrationMetrics::from_correspondences(&correspondences))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CpuBackend, CpuConfig, MemoryPool};
    use crate::error::BackendError;
    use crate::estimation::{PointToPlane, PointToPoint, TransformationEstimation};
    use approx::assert_relative_eq;
    use kornia_3d::transforms::rotation_z;
    use std::sync::Arc;

    /// A box of points on three orthogonal faces, with normals.
    fn corner() -> PointCloud<f64> {
        let mut points = Vec::new();
        let mut normals = Vec::new();
        for i in 0..15 {
            for j in 0..15 {
                let (a, b) = (i as f64 * 0.02, j as f64 * 0.02);
                points.extend([[a, b, 0.0], [a, 0.0, b], [0.0, a, b]]);
                normals.extend([[0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]);
            }
        }
        PointCloud::new(points, None, Some(normals))
    }

    #[test]
    fn test_criteria_builders() {
        let criteria = ConvergenceCriteria::default()
            .with_max_iteration(5)
            .with_relative_fitness(1e-3)
            .with_relative_rmse(1e-4)
            .with_timeout(Duration::from_secs(1));
        assert_eq!(criteria.max_iteration, 5);
        assert_eq!(criteria.relative_fitness, 1e-3);
        assert_eq!(criteria.relative_rmse, 1e-4);
        assert_eq!(criteria.timeout, Some(Duration::from_secs(1)));

        let defaults = ConvergenceCriteria::default();
        assert_eq!(defaults.max_iteration, 30);
        assert_eq!(defaults.relative_fitness, 1e-6);
        assert_eq!(defaults.relative_rmse, 1e-6);
        assert_eq!(defaults.timeout, None);
    }

    #[test]
    fn test_invalid_inputs() {
        let backend = CpuBackend::<f64>::new();
        let cloud = corner();
        let init = Transform::identity();
        let criteria = ConvergenceCriteria::default();
        let method = TransformationEstimation::PointToPlane;

        let empty = PointCloud::new(vec![], None, None);
        let res = registration_icp(&empty, &cloud, 0.05, &init, &method, &criteria, &backend);
        assert!(matches!(res, Err(IcpError::InvalidInput(_))));

        let res = registration_icp(&cloud, &cloud, -1.0, &init, &method, &criteria, &backend);
        assert!(matches!(res, Err(IcpError::InvalidInput(_))));

        let no_normals = PointCloud::new(cloud.points().to_vec(), None, None);
        let res = registration_icp(&cloud, &no_normals, 0.05, &init, &method, &criteria, &backend);
        assert!(matches!(res, Err(IcpError::InvalidInput(_))));
        // point to point does not need them
        let res = registration_icp(&cloud, &no_normals, 0.05, &init, &PointToPoint, &criteria, &backend);
        assert!(res.is_ok());

        let mut points = cloud.points().to_vec();
        points[3][1] = f64::NAN;
        let nan = PointCloud::new(points, None, None);
        let res = registration_icp(&nan, &cloud, 0.05, &init, &method, &criteria, &backend);
        assert!(matches!(res, Err(IcpError::InvalidInput(_))));

        let zero_iterations = criteria.with_max_iteration(0);
        let res = registration_icp(&cloud, &cloud, 0.05, &init, &method, &zero_iterations, &backend);
        assert!(matches!(res, Err(IcpError::InvalidInput(_))));

        let mut bad_init = Transform::identity();
        bad_init.translation[0] = f64::INFINITY;
        let res = registration_icp(&cloud, &cloud, 0.05, &bad_init, &method, &criteria, &backend);
        assert!(matches!(res, Err(IcpError::InvalidInput(_))));
    }

    #[test]
    fn test_max_iterations_reached() -> Result<(), IcpError> {
        let source = corner();
        let target = source.transformed(&Transform::new(rotation_z(0.05), [0.01, 0.0, 0.0]));
        let criteria = ConvergenceCriteria::default().with_max_iteration(1);

        let result = registration_icp(
            &source,
            &target,
            0.05,
            &Transform::identity(),
            &PointToPlane,
            &criteria,
            &CpuBackend::new(),
        )?;
        assert_eq!(result.num_iterations, 1);
        assert_eq!(result.termination, TerminationReason::MaxIterationsReached);
        Ok(())
    }

    #[test]
    fn test_timeout_is_checked_between_iterations() -> Result<(), IcpError> {
        let source = corner();
        let target = source.transformed(&Transform::new(rotation_z(0.05), [0.01, 0.0, 0.0]));
        let criteria = ConvergenceCriteria::default().with_timeout(Duration::ZERO);

        let result = registration_icp(
            &source,
            &target,
            0.05,
            &Transform::identity(),
            &PointToPlane,
            &criteria,
            &CpuBackend::new(),
        )?;
        // the first iteration always runs
        assert_eq!(result.num_iterations, 1);
        assert_eq!(result.termination, TerminationReason::TimedOut);
        Ok(())
    }

    #[test]
    fn test_non_orthonormal_init_is_projected() -> Result<(), IcpError> {
        let cloud = corner();
        let mut init = Transform::identity();
        init.rotation[0][1] = 0.01;

        let result = registration_icp(
            &cloud,
            &cloud,
            0.05,
            &init,
            &PointToPlane,
            &ConvergenceCriteria::default(),
            &CpuBackend::new(),
        )?;
        assert!(result.transformation.orthonormality_error() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_invalid_init_rotation_is_rejected() {
        let cloud = corner();
        let backend = CpuBackend::<f64>::new();
        let criteria = ConvergenceCriteria::default();

        let zero = Transform::new([[0.0; 3]; 3], [0.0; 3]);
        let scaled = Transform::new(
            [[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]],
            [0.0; 3],
        );
        let reflection = Transform::new(
            [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, -1.0]],
            [0.0; 3],
        );
        for init in [zero, scaled, reflection] {
            let res = registration_icp(&cloud, &cloud, 0.05, &init, &PointToPlane, &criteria, &backend);
            assert!(matches!(res, Err(IcpError::InvalidInput(_))));
        }
    }

    #[test]
    fn test_metrics_describe_returned_transformation() -> Result<(), IcpError> {
        let source = corner();
        let target = source.transformed(&Transform::new(rotation_z(0.05), [0.01, 0.0, 0.0]));
        let backend = CpuBackend::new();

        for max_iteration in [1, 3, 30] {
            let result = registration_icp(
                &source,
                &target,
                0.05,
                &Transform::identity(),
                &PointToPlane,
                &ConvergenceCriteria::default().with_max_iteration(max_iteration),
                &backend,
            )?;
            let metrics =
                evaluate_registration(&source, &target, 0.05, &result.transformation, &backend)?;
            assert_eq!(result.fitness, metrics.fitness);
            assert_eq!(result.inlier_rmse, metrics.inlier_rmse);
        }
        Ok(())
    }

    #[test]
    fn test_working_buffers_are_leased() -> Result<(), Box<dyn std::error::Error>> {
        let memory = MemoryPool::unbounded();
        let backend = CpuBackend::<f64>::with_config(CpuConfig::default(), Arc::clone(&memory))?;
        let cloud = corner();

        registration_icp(
            &cloud,
            &cloud,
            0.05,
            &Transform::identity(),
            &PointToPlane,
            &ConvergenceCriteria::default(),
            &backend,
        )?;
        assert_eq!(memory.in_use(), 0);
        assert_eq!(memory.peak(), cloud.len() * 24);

        let small = CpuBackend::<f64>::with_config(CpuConfig::default(), MemoryPool::with_capacity(64))?;
        let res = evaluate_registration(&cloud, &cloud, 0.05, &Transform::identity(), &small);
        assert!(matches!(
            res,
            Err(IcpError::Backend(BackendError::OutOfMemory { .. }))
        ));
        Ok(())
    }

    #[test]
    fn test_evaluate_registration() -> Result<(), IcpError> {
        let source = corner();
        let shift = Transform::new(Transform::identity().rotation, [0.0, 0.0, 1.0]);
        let target = source.transformed(&shift);
        let backend = CpuBackend::new();

        let aligned = evaluate_registration(&source, &target, 0.01, &shift, &backend)?;
        assert_relative_eq!(aligned.fitness, 1.0);
        assert_relative_eq!(aligned.inlier_rmse, 0.0, epsilon = 1e-12);
        assert_eq!(aligned.num_correspondences, source.len());

        let far = evaluate_registration(&source, &target, 0.01, &Transform::identity(), &backend)?;
        assert_eq!(far.num_correspondences, 0);
        assert_eq!(far.fitness, 0.0);
        assert_eq!(far.inlier_rmse, 0.0);
        Ok(())
    }
}
