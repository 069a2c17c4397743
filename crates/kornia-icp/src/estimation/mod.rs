//! Estimation of the incremental rigid transformation of one iteration.

use kornia_3d::{pointcloud::PointCloud, transforms::Transform, Scalar};

use crate::backend::Executor;
use crate::correspondence::CorrespondenceSet;
use crate::error::IcpError;

mod point_to_plane;
pub use point_to_plane::PointToPlane;

mod point_to_point;
pub use point_to_point::PointToPoint;

/// Trait for the strategies estimating the rigid transformation that best aligns matched
/// points.
///
/// Implementations are stateless between calls and can be used as trait objects.
pub trait TransformationEstimator<T: Scalar>: Send + Sync {
    /// Whether the estimator reads the normals of the target cloud.
    fn requires_normals(&self) -> bool;

    /// Estimate the transformation moving the matched source points onto the target.
    ///
    /// # Arguments
    ///
    /// * `executor` - Runs the reductions on the backend workers.
    /// * `source` - The current source points, indexed by the correspondences.
    /// * `target` - The target cloud, with normals if [`Self::requires_normals`].
    /// * `correspondences` - The matched pairs of this iteration.
    ///
    /// # Errors
    ///
    /// Returns [`IcpError::DegenerateSystem`] when the correspondences do not determine a unique
    /// transformation and [`IcpError::InvalidInput`] when required normals are missing.
    fn estimate(
        &self,
        executor: &Executor<'_>,
        source: &[[T; 3]],
        target: &PointCloud<T>,
        correspondences: &CorrespondenceSet<T>,
    ) -> Result<Transform<T>, IcpError>;
}

/// Reject correspondences pointing outside the clouds.
pub(crate) fn check_correspondences<T: Scalar>(
    source: &[[T; 3]],
    target: &PointCloud<T>,
    correspondences: &CorrespondenceSet<T>,
) -> Result<(), IcpError> {
    let out_of_range = correspondences
        .iter()
        .find(|c| c.source_index >= source.len() || c.target_index >= target.len());
    match out_of_range {
        Some(c) => Err(IcpError::InvalidInput(format!(
            "correspondence ({}, {}) out of range for {} source and {} target points",
            c.source_index,
            c.target_index,
            source.len(),
            target.len()
        ))),
        None => Ok(()),
    }
}

/// Enumeration of the estimation strategies available in this module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransformationEstimation {
    /// Minimize point to point distances with the closed form SVD solution.
    PointToPoint,
    /// Minimize distances along the target normals with a linearized least squares step.
    #[default]
    PointToPlane,
}

impl<T: Scalar> TransformationEstimator<T> for TransformationEstimation {
    fn requires_normals(&self) -> bool {
        match self {
            TransformationEstimation::PointToPoint => {
                TransformationEstimator::<T>::requires_normals(&PointToPoint)
            }
            TransformationEstimation::PointToPlane => {
                TransformationEstimator::<T>::requires_normals(&PointToPlane)
            }
        }
    }

    fn estimate(
        &self,
        executor: &Executor<'_>,
        source: &[[T; 3]],
        target: &PointCloud<T>,
        correspondences: &CorrespondenceSet<T>,
    ) -> Result<Transform<T>, IcpError> {
        match self {
            TransformationEstimation::PointToPoint => {
                PointToPoint.estimate(executor, source, target, correspondences)
            }
            TransformationEstimation::PointToPlane => {
                PointToPlane.estimate(executor, source, target, correspondences)
            }
        }
    }
}

impl std::str::FromStr for TransformationEstimation {
    type Err = IcpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "point-to-point" | "point_to_point" => Ok(TransformationEstimation::PointToPoint),
            "point-to-plane" | "point_to_plane" => Ok(TransformationEstimation::PointToPlane),
            other => Err(IcpError::InvalidInput(format!(
                "unknown estimation method: {other}"
            ))),
        }
    }
}
