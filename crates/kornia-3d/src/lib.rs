#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// I/O utilities for reading 3D data.
pub mod io;

/// Linear algebra utilities.
pub mod linalg;

/// Point cloud container.
pub mod pointcloud;

/// Floating point precision trait.
pub mod scalar;
pub use scalar::Scalar;

/// 3D transforms algorithms.
pub mod transforms;
