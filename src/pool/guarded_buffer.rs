//! Buffers with a trailing guard region
//!
//! Physical layout of a `GuardedBuffer`:
//!
//! ```text
//! |<------------- data capacity ------------->|<-- guard_len -->|
//! |<---- limit (visible) ---->|               | GUARD_BYTE ...  |
//! ```
//!
//! The guard is written the first time the memory is handed out and never again,
//! so reusing a buffer costs nothing. `check_guard` detects writes that ran past
//! the data capacity into the guard.

use super::region::RawRegion;
use crate::error::{Error, Result};
use bytes::buf::UninitSlice;
use bytes::{Buf, BufMut};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

/// Value of every byte in a guard region
pub const GUARD_BYTE: u8 = 10;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Fixed-capacity off-heap buffer owned by exactly one holder at a time.
///
/// Reads and writes through [`Buf`]/[`BufMut`] operate on `[position, limit)`.
/// The buffer is not `Clone`; handing it back to the pool moves it.
pub struct GuardedBuffer {
    id: u64,
    region: RawRegion,
    guard_len: usize,
    limit: usize,
    position: usize,
    guard_written: bool,
    retired: bool,
}

impl GuardedBuffer {
    /// Allocate a buffer of `capacity` physical bytes, the last `guard_len` of
    /// which form the guard. The visible length starts at the full data capacity.
    pub fn allocate(capacity: usize, guard_len: usize) -> Result<Self> {
        if guard_len > capacity {
            return Err(Error::InvalidSize(capacity));
        }

        let mut buffer = Self::reserve(capacity, guard_len)?;
        buffer.write_guard();
        Ok(buffer)
    }

    /// Allocate a buffer whose data capacity is `data_capacity`. The guard is
    /// laid on the first `reset_for_borrow`.
    pub(crate) fn with_data_capacity(data_capacity: usize, guard_len: usize) -> Result<Self> {
        let capacity = data_capacity
            .checked_add(guard_len)
            .ok_or(Error::Allocation {
                size: data_capacity,
            })?;
        Self::reserve(capacity, guard_len)
    }

    fn reserve(capacity: usize, guard_len: usize) -> Result<Self> {
        Ok(Self {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            region: RawRegion::allocate(capacity)?,
            guard_len,
            limit: capacity - guard_len,
            position: 0,
            guard_written: false,
            retired: false,
        })
    }

    fn write_guard(&mut self) {
        if self.guard_written {
            return;
        }
        let start = self.data_capacity();
        self.region.as_mut_slice()[start..].fill(GUARD_BYTE);
        self.guard_written = true;
    }

    /// Prepare a (possibly reused) buffer for a new borrower.
    pub(crate) fn reset_for_borrow(&mut self, visible_len: usize) {
        debug_assert!(visible_len <= self.data_capacity());
        self.write_guard();
        self.limit = visible_len;
        self.position = 0;
    }

    /// Make the buffer inert before its memory is released.
    pub(crate) fn mark_unusable(&mut self) {
        self.retired = true;
        self.limit = 0;
        self.position = 0;
    }

    pub(crate) fn region_mut(&mut self) -> &mut RawRegion {
        &mut self.region
    }

    /// Process-unique identity of this allocation
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Physical capacity, guard included
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    pub fn guard_len(&self) -> usize {
        self.guard_len
    }

    /// Largest visible length this buffer can carry
    pub fn data_capacity(&self) -> usize {
        self.capacity() - self.guard_len
    }

    /// Visible data length
    pub fn len(&self) -> usize {
        self.limit
    }

    pub fn is_empty(&self) -> bool {
        self.limit == 0
    }

    /// True once the pool has retired this buffer on the oversized path.
    /// An empty visible window alone does not retire a buffer.
    pub fn is_unusable(&self) -> bool {
        self.retired
    }

    /// False until the buffer is first handed out.
    pub fn guard_written(&self) -> bool {
        self.guard_written
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.limit {
            return Err(Error::InvalidSize(position));
        }
        self.position = position;
        Ok(())
    }

    /// Change the visible length, clamping the cursor to it.
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if len > self.data_capacity() {
            return Err(Error::InvalidSize(len));
        }
        self.limit = len;
        self.position = self.position.min(len);
        Ok(())
    }

    /// Move the cursor back to the start without touching the data.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// The visible bytes `[0, len)`.
    pub fn as_slice(&self) -> &[u8] {
        &self.region.as_slice()[..self.limit]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let limit = self.limit;
        &mut self.region.as_mut_slice()[..limit]
    }

    /// The entire physical capacity, guard included.
    ///
    /// Intended for raw I/O that fills the buffer directly. Writing past
    /// `data_capacity()` corrupts the guard and is reported by `check_guard`.
    pub fn physical(&self) -> &[u8] {
        self.region.as_slice()
    }

    pub fn physical_mut(&mut self) -> &mut [u8] {
        self.region.as_mut_slice()
    }

    /// Verify the guard bytes. Does not touch the visible length or cursor.
    ///
    /// Inert when the guard is disabled, not laid yet, or the buffer has been
    /// retired.
    pub fn check_guard(&self) -> Result<()> {
        if self.guard_len == 0 || !self.guard_written || self.retired {
            return Ok(());
        }

        let start = self.data_capacity();
        let guard = &self.region.as_slice()[start..];
        match guard.iter().position(|&b| b != GUARD_BYTE) {
            None => Ok(()),
            Some(i) => {
                let offset = start + i;
                error!(
                    buffer_id = self.id,
                    capacity = self.capacity(),
                    visible_len = self.limit,
                    offset,
                    "Buffer guard overwritten"
                );
                Err(Error::GuardViolation {
                    buffer_id: self.id,
                    capacity: self.capacity(),
                    visible_len: self.limit,
                    offset,
                    expected: GUARD_BYTE,
                    found: guard[i],
                })
            }
        }
    }
}

impl Buf for GuardedBuffer {
    fn remaining(&self) -> usize {
        self.limit - self.position
    }

    fn chunk(&self) -> &[u8] {
        &self.region.as_slice()[self.position..self.limit]
    }

    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= self.remaining(),
            "cannot advance past the visible length: {} > {}",
            cnt,
            self.remaining()
        );
        self.position += cnt;
    }
}

// SAFETY: chunk_mut only exposes [position, limit), which lies inside the
// region, and advance_mut never moves the cursor past limit.
unsafe impl BufMut for GuardedBuffer {
    fn remaining_mut(&self) -> usize {
        self.limit - self.position
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        assert!(
            cnt <= self.remaining_mut(),
            "cannot advance past the visible length: {} > {}",
            cnt,
            self.remaining_mut()
        );
        self.position += cnt;
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        let (position, limit) = (self.position, self.limit);
        UninitSlice::new(&mut self.region.as_mut_slice()[position..limit])
    }
}

impl std::fmt::Debug for GuardedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedBuffer")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .field("guard_len", &self.guard_len)
            .field("limit", &self.limit)
            .field("position", &self.position)
            .field("retired", &self.retired)
            .finish()
    }
}
