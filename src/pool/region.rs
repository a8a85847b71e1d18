//! Raw off-heap memory regions
//!
//! A `RawRegion` is a zeroed block taken straight from the global allocator.
//! Regions of a page or more are page-aligned so release strategies can hand
//! whole pages back to the kernel without touching allocator metadata outside
//! the block. Smaller regions are packed at `SMALL_ALIGN`; there is no whole
//! page in them to release.

use crate::error::{Error, Result};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::LazyLock;

/// Page size assumed when the platform cannot be queried
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Alignment of regions smaller than one page
pub const SMALL_ALIGN: usize = 16;

static PAGE_SIZE: LazyLock<usize> = LazyLock::new(query_page_size);

#[cfg(unix)]
fn query_page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        DEFAULT_PAGE_SIZE
    }
}

#[cfg(not(unix))]
fn query_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

/// System page size, queried once per process
pub fn page_size() -> usize {
    *PAGE_SIZE
}

/// Owned block of raw memory outside any collection type
pub struct RawRegion {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// SAFETY: RawRegion exclusively owns its allocation; moving it to another thread
// moves that ownership. Shared access only hands out `&[u8]`.
unsafe impl Send for RawRegion {}
unsafe impl Sync for RawRegion {}

impl RawRegion {
    /// Allocate `len` zeroed bytes, page-aligned when `len` spans a page.
    pub fn allocate(len: usize) -> Result<Self> {
        let page = page_size();
        let align = if len >= page { page } else { SMALL_ALIGN };
        // Zero-sized layouts cannot be handed to the allocator.
        let layout = Layout::from_size_align(len.max(1), align)
            .map_err(|_| Error::Allocation { size: len })?;

        // SAFETY: layout has non-zero size and a power-of-two alignment.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(Error::Allocation { size: len })?;

        Ok(Self { ptr, len, layout })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len initialised (zeroed) bytes for the
        // lifetime of &self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// The whole pages covered by this region, as `(start, length)`.
    ///
    /// Returns `None` when the region is smaller than one page.
    pub fn page_span(&mut self) -> Option<(*mut u8, usize)> {
        let page = page_size();
        let span = self.len - self.len % page;
        if span == 0 {
            return None;
        }
        debug_assert_eq!(self.ptr.as_ptr() as usize % page, 0);
        Some((self.ptr.as_ptr(), span))
    }
}

impl Drop for RawRegion {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with exactly this layout and is
        // freed only here.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl std::fmt::Debug for RawRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawRegion")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}
