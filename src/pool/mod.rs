//! Tiered pooling of guarded off-heap buffers

mod guarded_buffer;
mod lease;
mod region;
mod size_class;
mod tiered;

pub use guarded_buffer::{GuardedBuffer, GUARD_BYTE};
pub use lease::BufferLease;
pub use region::{page_size, RawRegion, DEFAULT_PAGE_SIZE, SMALL_ALIGN};
pub use size_class::{SizeClass, SizeClassStats};
pub use tiered::{PoolStats, TieredBufferPool};
