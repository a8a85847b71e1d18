use super::guarded_buffer::GuardedBuffer;
use super::lease::BufferLease;
use super::size_class::{SizeClass, SizeClassStats};
use crate::config::PoolConfig;
use crate::dealloc::DeallocationHook;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Pool of guarded buffers in a fixed set of size classes.
///
/// A borrow is served from the smallest class whose boundary covers the
/// request. Requests larger than every class bypass pooling: the buffer is
/// allocated to fit and goes through the [`DeallocationHook`] when returned.
///
/// The class layout never changes after construction, so lookups need no
/// synchronisation; each class queue is lock-free. Share the pool with `Arc`.
pub struct TieredBufferPool {
    boundaries: Box<[usize]>,
    classes: Box<[SizeClass]>,
    max_boundary: usize,
    guard_len: usize,
    hook: Arc<DeallocationHook>,
    oversized_allocations: AtomicU64,
    oversized_releases: AtomicU64,
}

/// Point-in-time view of the whole pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub classes: Vec<SizeClassStats>,
    pub oversized_allocations: u64,
    pub oversized_releases: u64,
}

impl PoolStats {
    /// Fraction of pooled borrows served without allocating (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let reuses: u64 = self.classes.iter().map(|c| c.reuses).sum();
        let allocations: u64 = self.classes.iter().map(|c| c.allocations).sum();
        let total = reuses + allocations;
        if total == 0 {
            0.0
        } else {
            reuses as f64 / total as f64
        }
    }

    pub fn total_idle(&self) -> usize {
        self.classes.iter().map(|c| c.idle).sum()
    }

    pub fn total_outstanding(&self) -> usize {
        self.classes.iter().map(|c| c.outstanding).sum()
    }
}

impl TieredBufferPool {
    /// Build a pool that releases oversized buffers through the process-wide hook.
    pub fn new(config: PoolConfig) -> Result<Self> {
        Self::with_hook(config, DeallocationHook::global())
    }

    pub fn with_hook(config: PoolConfig, hook: Arc<DeallocationHook>) -> Result<Self> {
        let boundaries = config.validate()?;
        let max_boundary = boundaries.last().copied().ok_or_else(|| {
            Error::Config("at least one buffer size class is required".to_string())
        })?;
        let classes = boundaries
            .iter()
            .map(|&boundary| SizeClass::new(boundary, config.guard_len))
            .collect::<Result<Vec<_>>>()?;

        info!(
            boundaries = ?boundaries,
            guard_len = config.guard_len,
            "Buffer pool size classes initialized"
        );

        Ok(Self {
            boundaries: boundaries.into_boxed_slice(),
            classes: classes.into_boxed_slice(),
            max_boundary,
            guard_len: config.guard_len,
            hook,
            oversized_allocations: AtomicU64::new(0),
            oversized_releases: AtomicU64::new(0),
        })
    }

    /// Shorthand for a pool with the given boundaries and default guard length.
    pub fn from_boundaries(boundaries: &[usize]) -> Result<Self> {
        Self::new(PoolConfig::new(boundaries))
    }

    /// Borrow a buffer whose visible length is exactly `size_needed`.
    ///
    /// The caller owns the buffer until it is passed to
    /// [`return_buffer`](Self::return_buffer).
    pub fn borrow(&self, size_needed: usize) -> Result<GuardedBuffer> {
        if size_needed == 0 {
            return Err(Error::InvalidSize(size_needed));
        }

        match self.class_index(size_needed) {
            Some(index) => self.classes[index].acquire(size_needed),
            None => self.allocate_oversized(size_needed),
        }
    }

    /// Borrow a buffer that returns itself to the pool when dropped.
    pub fn lease(&self, size_needed: usize) -> Result<BufferLease<'_>> {
        Ok(BufferLease::new(self.borrow(size_needed)?, self))
    }

    fn allocate_oversized(&self, size_needed: usize) -> Result<GuardedBuffer> {
        warn!(
            requested = size_needed,
            max_boundary = self.max_boundary,
            "Cannot allocate buffer from pool; requested size exceeds the largest size class"
        );

        let mut buffer = GuardedBuffer::with_data_capacity(size_needed, self.guard_len)?;
        buffer.reset_for_borrow(size_needed);
        self.oversized_allocations.fetch_add(1, Ordering::Relaxed);
        Ok(buffer)
    }

    /// Give a buffer back.
    ///
    /// Pooled buffers are queued unmodified. Oversized buffers are retired
    /// and released through the deallocation hook. A buffer this pool could
    /// not have produced is a [`Error::CapacityMismatch`] and is not queued.
    pub fn return_buffer(&self, buffer: GuardedBuffer) -> Result<()> {
        let capacity = buffer.capacity();
        let key = match capacity.checked_sub(self.guard_len) {
            Some(key) if buffer.guard_len() == self.guard_len => key,
            _ => return Err(self.capacity_mismatch(&buffer)),
        };

        if key > self.max_boundary {
            self.oversized_releases.fetch_add(1, Ordering::Relaxed);
            self.hook.release(buffer);
            return Ok(());
        }

        match self.boundaries.binary_search(&key) {
            Ok(index) => {
                self.classes[index].restore(buffer);
                Ok(())
            }
            Err(_) => Err(self.capacity_mismatch(&buffer)),
        }
    }

    fn capacity_mismatch(&self, buffer: &GuardedBuffer) -> Error {
        error!(
            buffer_id = buffer.id(),
            capacity = buffer.capacity(),
            buffer_guard_len = buffer.guard_len(),
            pool_guard_len = self.guard_len,
            boundaries = ?self.boundaries,
            "Returned buffer does not belong to any size class"
        );
        Error::CapacityMismatch {
            capacity: buffer.capacity(),
            guard_len: self.guard_len,
        }
    }

    /// Verify the guard of a borrowed buffer. See [`GuardedBuffer::check_guard`].
    pub fn check_guard(&self, buffer: &GuardedBuffer) -> Result<()> {
        buffer.check_guard()
    }

    /// Smallest class index whose boundary is at least `size`.
    fn class_index(&self, size: usize) -> Option<usize> {
        let index = self.boundaries.partition_point(|&boundary| boundary < size);
        (index < self.boundaries.len()).then_some(index)
    }

    /// Boundary of the class that would serve `size`, or `None` if oversized.
    pub fn size_class_for(&self, size: usize) -> Option<usize> {
        self.class_index(size).map(|index| self.boundaries[index])
    }

    pub fn boundaries(&self) -> &[usize] {
        &self.boundaries
    }

    pub fn max_boundary(&self) -> usize {
        self.max_boundary
    }

    pub fn guard_len(&self) -> usize {
        self.guard_len
    }

    pub fn hook(&self) -> &Arc<DeallocationHook> {
        &self.hook
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            classes: self.classes.iter().map(SizeClass::stats).collect(),
            oversized_allocations: self.oversized_allocations.load(Ordering::Relaxed),
            oversized_releases: self.oversized_releases.load(Ordering::Relaxed),
        }
    }
}

impl Drop for TieredBufferPool {
    fn drop(&mut self) {
        let mut released = 0usize;
        for class in self.classes.iter() {
            for buffer in class.drain() {
                self.hook.release(buffer);
                released += 1;
            }
        }
        debug!(released, "Buffer pool dropped; idle buffers released");
    }
}

impl std::fmt::Debug for TieredBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredBufferPool")
            .field("classes", &self.classes)
            .field("guard_len", &self.guard_len)
            .field("hook", &self.hook.strategy_name())
            .finish()
    }
}
