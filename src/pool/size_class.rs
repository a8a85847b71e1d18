use super::guarded_buffer::GuardedBuffer;
use crate::error::{Error, Result};
use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicU64, Ordering};

// Occupancy word: idle count in the high half, outstanding count in the low
// half. Counts above u32::MAX per class are not supported.
const IDLE_ONE: u64 = 1 << 32;
const OUTSTANDING_MASK: u64 = u32::MAX as u64;
const IDLE_TO_OUTSTANDING: u64 = 1u64.wrapping_sub(IDLE_ONE);

/// One pooling tier: every buffer it ever holds has the same physical capacity.
pub struct SizeClass {
    boundary: usize,
    guard_len: usize,
    physical_capacity: usize,
    idle: SegQueue<GuardedBuffer>,
    allocations: AtomicU64,
    reuses: AtomicU64,
    returns: AtomicU64,
    occupancy: AtomicU64,
}

/// Point-in-time view of a size class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClassStats {
    pub boundary: usize,
    pub physical_capacity: usize,
    /// Distinct physical buffers ever allocated for this class
    pub allocations: u64,
    /// Borrows satisfied from the idle queue
    pub reuses: u64,
    pub returns: u64,
    pub idle: usize,
    pub outstanding: usize,
}

impl SizeClass {
    pub(crate) fn new(boundary: usize, guard_len: usize) -> Result<Self> {
        let physical_capacity = boundary.checked_add(guard_len).ok_or_else(|| {
            Error::Config(format!(
                "size class {boundary} plus guard {guard_len} overflows"
            ))
        })?;

        Ok(Self {
            boundary,
            guard_len,
            physical_capacity,
            idle: SegQueue::new(),
            allocations: AtomicU64::new(0),
            reuses: AtomicU64::new(0),
            returns: AtomicU64::new(0),
            occupancy: AtomicU64::new(0),
        })
    }

    pub fn boundary(&self) -> usize {
        self.boundary
    }

    pub fn physical_capacity(&self) -> usize {
        self.physical_capacity
    }

    pub fn idle_count(&self) -> usize {
        (self.occupancy.load(Ordering::Acquire) >> 32) as usize
    }

    /// Hand out an idle buffer, or allocate one if the queue is empty.
    pub(crate) fn acquire(&self, size_needed: usize) -> Result<GuardedBuffer> {
        let mut buffer = match self.idle.pop() {
            Some(buffer) => {
                self.reuses.fetch_add(1, Ordering::Relaxed);
                self.occupancy.fetch_add(IDLE_TO_OUTSTANDING, Ordering::AcqRel);
                buffer
            }
            None => {
                let buffer = GuardedBuffer::with_data_capacity(self.boundary, self.guard_len)?;
                self.allocations.fetch_add(1, Ordering::Relaxed);
                self.occupancy.fetch_add(1, Ordering::AcqRel);
                buffer
            }
        };

        buffer.reset_for_borrow(size_needed);
        Ok(buffer)
    }

    /// Put a buffer back as-is; no guard rewrite and no zeroing.
    ///
    /// A foreign buffer of matching capacity, returned without having been
    /// borrowed here, is adopted and counted as an allocation.
    pub(crate) fn restore(&self, buffer: GuardedBuffer) {
        debug_assert_eq!(buffer.capacity(), self.physical_capacity);
        let moved = self
            .occupancy
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                (word & OUTSTANDING_MASK != 0).then(|| word - 1 + IDLE_ONE)
            });
        if moved.is_err() {
            self.allocations.fetch_add(1, Ordering::Relaxed);
            self.occupancy.fetch_add(IDLE_ONE, Ordering::AcqRel);
        }
        self.returns.fetch_add(1, Ordering::Relaxed);
        self.idle.push(buffer);
    }

    /// Pop every idle buffer.
    pub(crate) fn drain(&self) -> impl Iterator<Item = GuardedBuffer> + '_ {
        std::iter::from_fn(move || {
            let buffer = self.idle.pop()?;
            self.occupancy.fetch_sub(IDLE_ONE, Ordering::AcqRel);
            Some(buffer)
        })
    }

    /// Snapshot the counters. Idle and outstanding come from one load, taken
    /// before `allocations`, so `idle + outstanding <= allocations` holds for
    /// every snapshot.
    pub fn stats(&self) -> SizeClassStats {
        let occupancy = self.occupancy.load(Ordering::Acquire);
        SizeClassStats {
            boundary: self.boundary,
            physical_capacity: self.physical_capacity,
            allocations: self.allocations.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            idle: (occupancy >> 32) as usize,
            outstanding: (occupancy & OUTSTANDING_MASK) as usize,
        }
    }
}

impl std::fmt::Debug for SizeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SizeClass")
            .field("boundary", &self.boundary)
            .field("physical_capacity", &self.physical_capacity)
            .field("idle", &self.idle_count())
            .finish()
    }
}
