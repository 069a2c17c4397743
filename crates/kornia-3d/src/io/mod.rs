use std::path::Path;

use crate::pointcloud::PointCloud;
use crate::scalar::Scalar;

/// PCD reader module.
pub mod pcd;

/// Error types for the point cloud readers.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum IoError {
    /// The file extension does not match any supported format.
    #[error("Unsupported point cloud format: {0}")]
    UnsupportedFormat(String),

    /// Failed to read a PCD file.
    #[error(transparent)]
    Pcd(#[from] pcd::PcdError),
}

/// Options applied when reading a point cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Drop the points with NaN coordinates.
    pub remove_nan_points: bool,
    /// Drop the points with infinite coordinates.
    pub remove_infinite_points: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            remove_nan_points: true,
            remove_infinite_points: true,
        }
    }
}

impl ReadOptions {
    /// Set whether points with NaN coordinates are dropped.
    pub fn with_remove_nan_points(mut self, remove: bool) -> Self {
        self.remove_nan_points = remove;
        self
    }

    /// Set whether points with infinite coordinates are dropped.
    pub fn with_remove_infinite_points(mut self, remove: bool) -> Self {
        self.remove_infinite_points = remove;
        self
    }
}

/// Read a point cloud from a file, choosing the reader from the file extension.
///
/// # Arguments
///
/// * `path` - Path to the point cloud file. Only `.pcd` is supported.
/// * `options` - Filtering applied after reading.
pub fn read_point_cloud<T: Scalar>(
    path: impl AsRef<Path>,
    options: &ReadOptions,
) -> Result<PointCloud<T>, IoError> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let mut pointcloud = match ext.as_str() {
        "pcd" => pcd::read_pcd(path)?,
        _ => return Err(IoError::UnsupportedFormat(ext)),
    };

    if options.remove_nan_points || options.remove_infinite_points {
        pointcloud
            .remove_non_finite_points(options.remove_nan_points, options.remove_infinite_points);
    }

    log::debug!(
        "Read point cloud {}: {} points, normals: {}",
        path.display(),
        pointcloud.len(),
        pointcloud.has_normals()
    );

    Ok(pointcloud)
}
