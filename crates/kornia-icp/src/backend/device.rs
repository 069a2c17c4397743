use std::marker::PhantomData;
use std::sync::Arc;

use kornia_3d::Scalar;

use super::{Backend, Device, Executor, MemoryPool, PoolLease};
use crate::error::{BackendError, IcpError};
use crate::spatial::{BruteForceIndex, Neighbor, SpatialIndex, VoxelGridIndex};

/// Grid cells are this much larger than the correspondence distance, so that a bounded query
/// only touches the cells adjacent to its own.
const GRID_CELL_FACTOR: f64 = 1.1;

/// Nearest neighbour strategy of the [`DeviceBackend`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceSearch {
    /// Hashed uniform grid. The cell size defaults to the correspondence distance.
    Grid {
        /// Explicit side length of the cells.
        cell_size: Option<f64>,
    },
    /// Exhaustive search of every target point.
    BruteForce,
}

impl Default for DeviceSearch {
    fn default() -> Self {
        DeviceSearch::Grid { cell_size: None }
    }
}

/// Configuration of the [`DeviceBackend`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceConfig {
    /// The accelerator device ID.
    pub device_id: usize,
    /// Number of workers executing kernels. `None` uses one per logical core.
    pub num_workers: Option<usize>,
    /// Number of points processed by one work group.
    pub work_group_size: usize,
    /// Nearest neighbour strategy.
    pub search: DeviceSearch,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            num_workers: None,
            work_group_size: 256,
            search: DeviceSearch::default(),
        }
    }
}

impl DeviceConfig {
    /// Set the device ID.
    pub fn with_device_id(mut self, device_id: usize) -> Self {
        self.device_id = device_id;
        self
    }

    /// Set the number of workers.
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = Some(num_workers);
        self
    }

    /// Set the number of points per work group.
    pub fn with_work_group_size(mut self, work_group_size: usize) -> Self {
        self.work_group_size = work_group_size;
        self
    }

    /// Set the nearest neighbour strategy.
    pub fn with_search(mut self, search: DeviceSearch) -> Self {
        self.search = search;
        self
    }
}

/// Data-parallel accelerator backend, single precision by default.
///
/// Every phase is executed as a kernel over work groups of points on a dedicated worker pool.
/// Nearest neighbours are found with exhaustive or grid search, which trade the logarithmic cost
/// of a tree for uniform work per point. Device buffers are leased from the memory pool given at
/// construction, and a lease that does not fit fails with [`BackendError::OutOfMemory`].
pub struct DeviceBackend<T = f32> {
    device_id: usize,
    pool: rayon::ThreadPool,
    work_group_size: usize,
    search: DeviceSearch,
    memory: Arc<MemoryPool>,
    _precision: PhantomData<fn() -> T>,
}

impl<T: Scalar> DeviceBackend<T> {
    /// Create the backend, leasing device buffers from `memory`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidConfig`] for a zero work group size or worker count or a
    /// non positive cell size, and [`BackendError::ThreadPool`] if the workers cannot start.
    pub fn new(config: DeviceConfig, memory: Arc<MemoryPool>) -> Result<Self, BackendError> {
        if config.work_group_size == 0 {
            return Err(BackendError::InvalidConfig(
                "work group size must be > 0".to_string(),
            ));
        }
        if config.num_workers == Some(0) {
            return Err(BackendError::InvalidConfig(
                "worker count must be > 0".to_string(),
            ));
        }
        if let DeviceSearch::Grid {
            cell_size: Some(cell_size),
        } = config.search
        {
            if !(cell_size.is_finite() && cell_size > 0.0) {
                return Err(BackendError::InvalidConfig(format!(
                    "grid cell size must be positive and finite, got {cell_size}"
                )));
            }
        }

        let device_id = config.device_id;
        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(move |i| format!("kornia-icp-accelerator{device_id}-{i}"));
        if let Some(n) = config.num_workers {
            builder = builder.num_threads(n);
        }
        let pool = builder.build()?;

        log::debug!(
            "accelerator:{} ready with {} workers, work groups of {}, {:?}",
            device_id,
            pool.current_num_threads(),
            config.work_group_size,
            config.search
        );

        Ok(Self {
            device_id,
            pool,
            work_group_size: config.work_group_size,
            search: config.search,
            memory,
            _precision: PhantomData,
        })
    }

    /// The nearest neighbour strategy.
    pub fn search(&self) -> DeviceSearch {
        self.search
    }
}

enum DeviceIndexKind<T> {
    Grid(VoxelGridIndex<T>),
    BruteForce(BruteForceIndex<T>),
}

/// Spatial index resident on a [`DeviceBackend`].
///
/// Holds the lease of its device buffer for as long as it lives.
pub struct DeviceIndex<T> {
    kind: DeviceIndexKind<T>,
    _lease: PoolLease,
}

impl<T: Scalar> SpatialIndex<T> for DeviceIndex<T> {
    fn len(&self) -> usize {
        match &self.kind {
            DeviceIndexKind::Grid(index) => index.len(),
            DeviceIndexKind::BruteForce(index) => index.len(),
        }
    }

    fn nearest(&self, query: &[T; 3]) -> Option<Neighbor<T>> {
        match &self.kind {
            DeviceIndexKind::Grid(index) => index.nearest(query),
            DeviceIndexKind::BruteForce(index) => index.nearest(query),
        }
    }

    fn nearest_within(&self, query: &[T; 3], max_distance: T) -> Option<Neighbor<T>> {
        match &self.kind {
            DeviceIndexKind::Grid(index) => index.nearest_within(query, max_distance),
            DeviceIndexKind::BruteForce(index) => index.nearest_within(query, max_distance),
        }
    }
}

impl<T: Scalar> Backend for DeviceBackend<T> {
    type Scalar = T;
    type Index = DeviceIndex<T>;

    fn device(&self) -> Device {
        Device::Accelerator {
            device_id: self.device_id,
        }
    }

    fn build_index(&self, points: &[[T; 3]], max_distance_hint: T) -> Result<Self::Index, IcpError> {
        let bytes = std::mem::size_of_val(points) + points.len() * std::mem::size_of::<u32>();
        let lease = self.memory.acquire(bytes)?;

        let kind = match self.search {
            DeviceSearch::Grid { cell_size } => {
                let cell_size = cell_size
                    .map(T::cast_f64)
                    .unwrap_or(max_distance_hint * T::cast_f64(GRID_CELL_FACTOR));
                let grid = if cell_size.is_finite() && cell_size > T::zero() {
                    VoxelGridIndex::build(points, cell_size)?
                } else {
                    VoxelGridIndex::build_auto(points)?
                };
                DeviceIndexKind::Grid(grid)
            }
            DeviceSearch::BruteForce => DeviceIndexKind::BruteForce(BruteForceIndex::build(points)?),
        };

        Ok(DeviceIndex {
            kind,
            _lease: lease,
        })
    }

    fn executor(&self) -> Executor<'_> {
        Executor::new(Some(&self.pool), self.work_group_size)
    }

    fn memory_pool(&self) -> &Arc<MemoryPool> {
        &self.memory
    }
}
