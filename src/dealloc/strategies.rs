//! Platform mechanisms for handing a region's pages back to the kernel
//!
//! Freeing memory through the global allocator does not guarantee the pages
//! leave the process; allocators keep freed blocks around for reuse. These
//! strategies advise the kernel that the pages are no longer needed, which
//! drops them from the resident set right away.

use crate::pool::RawRegion;
use std::io;

/// A single way of proactively releasing the physical memory behind a region.
///
/// The region stays allocated and readable afterwards; only its contents are
/// forfeit.
pub trait ReleaseStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn attempt_release(&self, region: &mut RawRegion) -> io::Result<()>;
}

/// `madvise(MADV_DONTNEED)`: pages are unmapped from the resident set at once
/// and read back as zeroes.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct MadviseDontNeed;

#[cfg(unix)]
impl ReleaseStrategy for MadviseDontNeed {
    fn name(&self) -> &'static str {
        "madvise(MADV_DONTNEED)"
    }

    fn attempt_release(&self, region: &mut RawRegion) -> io::Result<()> {
        let Some((start, len)) = region.page_span() else {
            return Ok(());
        };
        // SAFETY: [start, start + len) is a page-aligned span of memory owned by
        // `region`, which we hold exclusively. The advice only discards contents.
        let rc = unsafe { libc::madvise(start.cast(), len, libc::MADV_DONTNEED) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

/// `posix_madvise(POSIX_MADV_DONTNEED)`, for systems where `madvise` refuses.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixMadviseDontNeed;

#[cfg(unix)]
impl ReleaseStrategy for PosixMadviseDontNeed {
    fn name(&self) -> &'static str {
        "posix_madvise(POSIX_MADV_DONTNEED)"
    }

    fn attempt_release(&self, region: &mut RawRegion) -> io::Result<()> {
        let Some((start, len)) = region.page_span() else {
            return Ok(());
        };
        // SAFETY: same span argument as MadviseDontNeed.
        let rc = unsafe { libc::posix_madvise(start.cast(), len, libc::POSIX_MADV_DONTNEED) };
        // posix_madvise reports the error number directly instead of via errno.
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::from_raw_os_error(rc))
        }
    }
}

/// Candidates for this platform, in probe order.
pub fn platform_candidates() -> Vec<Box<dyn ReleaseStrategy>> {
    #[cfg(unix)]
    {
        vec![Box::new(MadviseDontNeed), Box::new(PosixMadviseDontNeed)]
    }

    #[cfg(not(unix))]
    {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::page_size;

    #[cfg(unix)]
    #[test]
    fn test_madvise_discards_contents() {
        let mut region = RawRegion::allocate(page_size() * 2).unwrap();
        region.as_mut_slice().fill(0x5A);

        MadviseDontNeed.attempt_release(&mut region).unwrap();

        // Private anonymous memory refaults as zeroes on Linux; other systems
        // may keep the data, but the region must stay readable either way.
        assert_eq!(region.as_slice().len(), page_size() * 2);
        #[cfg(target_os = "linux")]
        assert!(region.as_slice().iter().all(|&b| b == 0));
    }

    #[cfg(unix)]
    #[test]
    fn test_posix_madvise_succeeds_on_page() {
        let mut region = RawRegion::allocate(page_size()).unwrap();
        PosixMadviseDontNeed.attempt_release(&mut region).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_sub_page_region_is_a_noop() {
        let mut region = RawRegion::allocate(16).unwrap();
        region.as_mut_slice().fill(7);
        MadviseDontNeed.attempt_release(&mut region).unwrap();
        assert!(region.as_slice().iter().all(|&b| b == 7));
    }

    #[test]
    fn test_candidate_names_are_distinct() {
        let candidates = platform_candidates();
        let mut names: Vec<_> = candidates.iter().map(|c| c.name()).collect();
        names.dedup();
        assert_eq!(names.len(), candidates.len());
    }
}
