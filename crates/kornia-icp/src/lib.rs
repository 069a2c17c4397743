#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Execution backends, workers and memory pools.
pub mod backend;

/// Correspondences between the source and target clouds.
pub mod correspondence;

/// Error types for registration.
pub mod error;

/// Estimation of the rigid transformation aligning matched points.
pub mod estimation;

/// Exact nearest neighbour search structures.
pub mod spatial;

mod ops;

mod registration;
pub use registration::*;

pub use backend::{Backend, CpuBackend, DeviceBackend};
pub use error::{BackendError, IcpError};
pub use estimation::{PointToPlane, PointToPoint, TransformationEstimation, TransformationEstimator};
