use super::guarded_buffer::GuardedBuffer;
use super::tiered::TieredBufferPool;
use std::ops::{Deref, DerefMut};
use tracing::error;

/// RAII guard that returns its buffer to the pool on drop
pub struct BufferLease<'a> {
    buffer: Option<GuardedBuffer>,
    pool: &'a TieredBufferPool,
}

impl<'a> BufferLease<'a> {
    pub(crate) fn new(buffer: GuardedBuffer, pool: &'a TieredBufferPool) -> Self {
        Self {
            buffer: Some(buffer),
            pool,
        }
    }

    /// Detach the buffer; the caller becomes responsible for returning it.
    pub fn into_inner(mut self) -> GuardedBuffer {
        self.buffer.take().expect("Buffer already taken")
    }
}

impl Deref for BufferLease<'_> {
    type Target = GuardedBuffer;

    fn deref(&self) -> &Self::Target {
        self.buffer.as_ref().expect("Buffer already taken")
    }
}

impl DerefMut for BufferLease<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buffer.as_mut().expect("Buffer already taken")
    }
}

impl Drop for BufferLease<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            if let Err(e) = self.pool.return_buffer(buffer) {
                error!(error = %e, "Failed to return leased buffer");
            }
        }
    }
}
