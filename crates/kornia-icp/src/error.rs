/// Errors raised by the execution backends.
#[derive(Debug, thiserror::Error, PartialEq)]
#[non_exhaustive]
pub enum BackendError {
    /// A memory pool cannot serve an allocation.
    #[error("Out of device memory: requested {requested} bytes, {available} bytes available")]
    OutOfMemory {
        /// Number of bytes requested.
        requested: usize,
        /// Number of bytes still free in the pool.
        available: usize,
    },

    /// The worker pool of the backend could not be created.
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(String),

    /// The backend configuration is not valid.
    #[error("Invalid backend configuration: {0}")]
    InvalidConfig(String),
}

impl From<rayon::ThreadPoolBuildError> for BackendError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        BackendError::ThreadPool(err.to_string())
    }
}

/// Errors raised by point cloud registration.
#[derive(Debug, thiserror::Error, PartialEq)]
#[non_exhaustive]
pub enum IcpError {
    /// The inputs violate a precondition, e.g. an empty cloud or missing normals.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No source point has a target point within the correspondence distance.
    #[error("No correspondences within distance {max_distance} at iteration {iteration}")]
    NoCorrespondences {
        /// Zero based iteration in which the search came back empty.
        iteration: usize,
        /// The maximum correspondence distance used.
        max_distance: f64,
    },

    /// The estimation problem has no unique solution.
    #[error("Degenerate system: {0}")]
    DegenerateSystem(String),

    /// The execution backend failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
}
