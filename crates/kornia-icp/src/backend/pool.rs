use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::BackendError;

/// Byte budget shared by the buffers a backend allocates.
///
/// The pool is an explicit object: create it once, hand it to the backends that should share it
/// and keep it alive for a batch of registration calls. Every allocation is a [`PoolLease`] that
/// returns its bytes when dropped, so usage goes back to zero when the calls finish.
#[derive(Debug)]
pub struct MemoryPool {
    capacity: Option<usize>,
    in_use: AtomicUsize,
    peak: AtomicUsize,
}

impl MemoryPool {
    /// A pool without a limit. Only tracks usage.
    pub fn unbounded() -> Arc<Self> {
        Arc::new(Self {
            capacity: None,
            in_use: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// A pool that serves at most `capacity` bytes at a time.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: Some(capacity),
            in_use: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// The byte limit of the pool, if any.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Bytes currently leased.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Largest number of bytes leased at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Reserve `bytes` from the pool.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::OutOfMemory`] if the reservation exceeds the remaining capacity.
    pub fn acquire(self: &Arc<Self>, bytes: usize) -> Result<PoolLease, BackendError> {
        let reserved = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                let next = used.checked_add(bytes)?;
                match self.capacity {
                    Some(cap) if next > cap => None,
                    _ => Some(next),
                }
            });

        match reserved {
            Ok(previous) => {
                self.peak.fetch_max(previous + bytes, Ordering::AcqRel);
                log::trace!("memory pool: leased {} bytes, {} in use", bytes, previous + bytes);
                Ok(PoolLease {
                    pool: Arc::clone(self),
                    bytes,
                })
            }
            Err(used) => Err(BackendError::OutOfMemory {
                requested: bytes,
                available: self.capacity.map_or(usize::MAX, |cap| cap.saturating_sub(used)),
            }),
        }
    }
}

/// A reservation of bytes from a [`MemoryPool`], released on drop.
#[derive(Debug)]
pub struct PoolLease {
    pool: Arc<MemoryPool>,
    bytes: usize,
}

impl PoolLease {
    /// Number of reserved bytes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_released_on_drop() -> Result<(), BackendError> {
        let pool = MemoryPool::with_capacity(100);
        {
            let a = pool.acquire(60)?;
            assert_eq!(a.bytes(), 60);
            assert_eq!(pool.in_use(), 60);

            let err = pool.acquire(50).unwrap_err();
            assert_eq!(
                err,
                BackendError::OutOfMemory {
                    requested: 50,
                    available: 40
                }
            );

            let _b = pool.acquire(40)?;
            assert_eq!(pool.in_use(), 100);
        }
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.peak(), 100);
        Ok(())
    }

    #[test]
    fn test_unbounded_pool() -> Result<(), BackendError> {
        let pool = MemoryPool::unbounded();
        let lease = pool.acquire(1 << 40)?;
        assert_eq!(pool.capacity(), None);
        assert_eq!(pool.in_use(), 1 << 40);
        drop(lease);
        assert_eq!(pool.in_use(), 0);
        Ok(())
    }
}
