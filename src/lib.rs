//! Tiered pool of reusable off-heap buffers.
//!
//! Buffers are handed out in a small number of fixed size classes and carry an
//! optional trailing guard region that detects writes past the requested
//! length. Requests larger than every class are served by direct allocation
//! and released early through a [`DeallocationHook`] when returned.
//!
//! ```
//! use bytes::BufMut;
//! use tiered_bufpool::{PoolConfig, TieredBufferPool};
//!
//! # fn main() -> tiered_bufpool::Result<()> {
//! let pool = TieredBufferPool::new(PoolConfig::new(vec![1024, 8192, 65536]).with_guard_len(8))?;
//!
//! let mut buffer = pool.borrow(500)?;
//! assert_eq!(buffer.len(), 500);
//! assert_eq!(buffer.capacity(), 1032);
//!
//! buffer.put_slice(b"payload");
//! pool.check_guard(&buffer)?;
//! pool.return_buffer(buffer)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dealloc;
pub mod error;
pub mod logging;
pub mod pool;

pub use config::{PoolConfig, DEFAULT_BOUNDARIES, DEFAULT_GUARD_LEN};
pub use dealloc::{DeallocationHook, HookState, ProbeFailure, ReleaseStrategy};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use pool::{
    BufferLease, GuardedBuffer, PoolStats, SizeClass, SizeClassStats, TieredBufferPool,
    GUARD_BYTE,
};
