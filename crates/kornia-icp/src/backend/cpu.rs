use std::marker::PhantomData;
use std::sync::Arc;

use super::{Backend, Device, Executor, MemoryPool};
use crate::error::{BackendError, IcpError};
use crate::spatial::{KdTreeIndex, KdTreeScalar};

/// Configuration of the [`CpuBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuConfig {
    /// Number of worker threads. `None` uses the global rayon pool, `Some(1)` runs every
    /// phase on a single thread.
    pub num_threads: Option<usize>,
    /// Number of points processed by one unit of parallel work.
    pub chunk_size: usize,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            chunk_size: 1024,
        }
    }
}

impl CpuConfig {
    /// Set the number of worker threads.
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    /// Set the number of points per unit of parallel work.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// Shared-memory CPU backend, double precision by default.
///
/// Correspondences are searched with a kd-tree and parallel phases run on rayon threads.
pub struct CpuBackend<T = f64> {
    pool: Option<rayon::ThreadPool>,
    chunk_size: usize,
    memory: Arc<MemoryPool>,
    _precision: PhantomData<fn() -> T>,
}

impl<T: KdTreeScalar> CpuBackend<T> {
    /// Create a backend on the global rayon pool with an unbounded memory pool.
    pub fn new() -> Self {
        Self {
            pool: None,
            chunk_size: CpuConfig::default().chunk_size,
            memory: MemoryPool::unbounded(),
            _precision: PhantomData,
        }
    }

    /// Create a backend from a configuration, leasing buffers from `memory`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidConfig`] for a zero chunk size or thread count, and
    /// [`BackendError::ThreadPool`] if the worker threads cannot be spawned.
    pub fn with_config(config: CpuConfig, memory: Arc<MemoryPool>) -> Result<Self, BackendError> {
        if config.chunk_size == 0 {
            return Err(BackendError::InvalidConfig(
                "chunk size must be > 0".to_string(),
            ));
        }

        let pool = match config.num_threads {
            Some(0) => {
                return Err(BackendError::InvalidConfig(
                    "thread count must be > 0".to_string(),
                ))
            }
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("kornia-icp-cpu-{i}"))
                    .build()?,
            ),
            None => None,
        };

        Ok(Self {
            pool,
            chunk_size: config.chunk_size,
            memory,
            _precision: PhantomData,
        })
    }
}

impl<T: KdTreeScalar> Default for CpuBackend<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: KdTreeScalar> Backend for CpuBackend<T> {
    type Scalar = T;
    type Index = KdTreeIndex<T>;

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn build_index(&self, points: &[[T; 3]], _max_distance_hint: T) -> Result<Self::Index, IcpError> {
        KdTreeIndex::build(points)
    }

    fn executor(&self) -> Executor<'_> {
        Executor::new(self.pool.as_ref(), self.chunk_size)
    }

    fn memory_pool(&self) -> &Arc<MemoryPool> {
        &self.memory
    }
}
