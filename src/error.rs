use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid buffer size requested: {0}")]
    InvalidSize(usize),

    #[error("Memory allocation error: failed to allocate {size} bytes")]
    Allocation { size: usize },

    /// A returned buffer matches no size class and is not oversized.
    #[error(
        "Capacity mismatch: buffer of capacity {capacity} (guard {guard_len}) does not belong to any size class"
    )]
    CapacityMismatch { capacity: usize, guard_len: usize },

    /// Someone wrote past the visible length of a buffer.
    #[error(
        "Guard violation in buffer {buffer_id} (capacity {capacity}, visible length {visible_len}): \
         byte at offset {offset} is {found:#04x}, expected {expected:#04x}"
    )]
    GuardViolation {
        buffer_id: u64,
        capacity: usize,
        visible_len: usize,
        offset: usize,
        expected: u8,
        found: u8,
    },
}

impl Error {
    pub fn error_code(&self) -> i32 {
        match self {
            Error::Config(_) => -1,
            Error::InvalidSize(_) => -2,
            Error::Allocation { .. } => -3,
            Error::CapacityMismatch { .. } => -4,
            Error::GuardViolation { .. } => -5,
        }
    }

    /// Faults that mean the pool's own integrity can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::CapacityMismatch { .. } | Error::GuardViolation { .. }
        )
    }
}
