//! Execution backends for registration.
//!
//! A backend fixes the floating point precision, the spatial index used for correspondence
//! search, the workers parallel phases run on and the memory pool buffers are leased from. The
//! registration algorithm is written once against the [`Backend`] trait.

use std::fmt;
use std::sync::Arc;

use kornia_3d::Scalar;
use rayon::prelude::*;

use crate::error::IcpError;
use crate::spatial::SpatialIndex;

mod cpu;
pub use cpu::{CpuBackend, CpuConfig};

mod device;
pub use device::{DeviceBackend, DeviceConfig, DeviceIndex, DeviceSearch};

mod pool;
pub use pool::{MemoryPool, PoolLease};

/// Device a backend executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    /// CPU device
    Cpu,
    /// Data-parallel accelerator with device ID
    Accelerator {
        /// The accelerator device ID
        device_id: usize,
    },
}

impl Device {
    /// Returns the device type as a string.
    pub fn device_type(&self) -> &str {
        match self {
            Device::Cpu => "cpu",
            Device::Accelerator { .. } => "accelerator",
        }
    }

    /// Returns the device ID if applicable.
    pub fn device_id(&self) -> Option<usize> {
        match self {
            Device::Cpu => None,
            Device::Accelerator { device_id } => Some(*device_id),
        }
    }

    /// Returns true if the device is CPU.
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device_id() {
            Some(id) => write!(f, "{}:{}", self.device_type(), id),
            None => write!(f, "{}", self.device_type()),
        }
    }
}

/// Backend trait defining the operations registration needs from a device.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the spatial index they build is queried from many
/// workers at once.
pub trait Backend: Send + Sync {
    /// Floating point precision of the computations.
    type Scalar: Scalar;

    /// Spatial index used for correspondence search.
    type Index: SpatialIndex<Self::Scalar>;

    /// Returns the device type for this backend.
    fn device(&self) -> Device;

    /// Build the spatial index over the target points.
    ///
    /// `max_distance_hint` is the correspondence distance the index will be queried with; an
    /// index may use it to size its internal structure but must stay exact for any query.
    fn build_index(
        &self,
        points: &[[Self::Scalar; 3]],
        max_distance_hint: Self::Scalar,
    ) -> Result<Self::Index, IcpError>;

    /// Handle used to run the parallel phases on the backend's workers.
    fn executor(&self) -> Executor<'_>;

    /// The pool working buffers are leased from.
    fn memory_pool(&self) -> &Arc<MemoryPool>;
}

/// Runs data-parallel work on a backend's workers.
///
/// Work is split in chunks of a fixed size. Per-chunk results are always combined in chunk
/// order on the calling thread, so reductions are bit-reproducible regardless of the number of
/// workers or how they were scheduled.
#[derive(Clone, Copy)]
pub struct Executor<'a> {
    pool: Option<&'a rayon::ThreadPool>,
    chunk_size: usize,
}

impl<'a> Executor<'a> {
    /// Create an executor on `pool`, or on the global rayon pool if `None`.
    pub fn new(pool: Option<&'a rayon::ThreadPool>, chunk_size: usize) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Number of items processed by one unit of work.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of workers parallel phases run on.
    pub fn num_workers(&self) -> usize {
        match self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    /// Run `op` inside the worker pool.
    pub fn install<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// Apply `f` to every chunk of `items` in parallel.
    ///
    /// `f` receives the offset of the chunk in `items`. Results are returned in chunk order.
    pub fn map_chunks<I, R, F>(&self, items: &[I], f: F) -> Vec<R>
    where
        I: Sync,
        R: Send,
        F: Fn(usize, &[I]) -> R + Sync + Send,
    {
        let chunk_size = self.chunk_size;
        self.install(|| {
            items
                .par_chunks(chunk_size)
                .enumerate()
                .map(|(i, chunk)| f(i * chunk_size, chunk))
                .collect()
        })
    }

    /// Fold every chunk sequentially in parallel, then combine the partial results in order.
    pub fn map_reduce<I, A, F, C>(&self, items: &[I], identity: A, fold: F, combine: C) -> A
    where
        I: Sync,
        A: Clone + Send + Sync,
        F: Fn(A, &I) -> A + Sync + Send,
        C: Fn(A, A) -> A,
    {
        let partials = self.map_chunks(items, |_, chunk| {
            chunk.iter().fold(identity.clone(), &fold)
        });
        partials.into_iter().fold(identity, combine)
    }

    /// Apply `f` to every item in parallel.
    pub fn for_each_mut<I, F>(&self, items: &mut [I], f: F)
    where
        I: Send,
        F: Fn(&mut I) + Sync + Send,
    {
        let chunk_size = self.chunk_size;
        self.install(|| {
            items
                .par_chunks_mut(chunk_size)
                .for_each(|chunk| chunk.iter_mut().for_each(&f))
        })
    }
}
