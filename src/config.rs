//! Pool configuration
//!
//! A pool is configured once with its size-class boundaries and the length of
//! the guard region appended to every buffer. Boundaries may be given as a list,
//! as JSON, or as the comma-separated form used by deployment properties
//! (`"512, 51200"`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Environment variable holding comma-separated size-class boundaries
pub const BOUNDARIES_ENV: &str = "BUFPOOL_BOUNDARIES";
/// Environment variable holding the guard length in bytes
pub const GUARD_LEN_ENV: &str = "BUFPOOL_GUARD_LEN";

/// Default size classes: 256B, 10KB, 100KB, 1MB
pub const DEFAULT_BOUNDARIES: [usize; 4] = [256, 10240, 102400, 1048576];

/// Guard bytes per buffer unless configured otherwise.
///
/// Debug builds carry an 8-byte guard so overruns surface in tests; release
/// builds disable it, which removes every guard write and check.
pub const DEFAULT_GUARD_LEN: usize = if cfg!(debug_assertions) { 8 } else { 0 };

fn default_guard_len() -> usize {
    DEFAULT_GUARD_LEN
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Size-class boundaries in bytes; order and duplicates do not matter
    pub boundaries: Vec<usize>,
    /// Trailing guard bytes per buffer; 0 disables guard checking
    #[serde(default = "default_guard_len")]
    pub guard_len: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            boundaries: DEFAULT_BOUNDARIES.to_vec(),
            guard_len: DEFAULT_GUARD_LEN,
        }
    }
}

impl PoolConfig {
    pub fn new(boundaries: impl Into<Vec<usize>>) -> Self {
        Self {
            boundaries: boundaries.into(),
            guard_len: DEFAULT_GUARD_LEN,
        }
    }

    pub fn with_guard_len(mut self, guard_len: usize) -> Self {
        self.guard_len = guard_len;
        self
    }

    /// Parse a comma-separated boundary list such as `"512, 51200"`.
    pub fn parse_boundaries(sizes: &str) -> Result<Vec<usize>> {
        sizes
            .split(',')
            .map(str::trim)
            .map(|entry| {
                if entry.is_empty() {
                    return Err(Error::Config(format!(
                        "empty entry in buffer pool sizes '{sizes}'"
                    )));
                }
                entry.parse::<usize>().map_err(|e| {
                    Error::Config(format!(
                        "invalid buffer pool size '{entry}' in '{sizes}': {e}"
                    ))
                })
            })
            .collect()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid pool configuration: {e}")))
    }

    /// Read `BUFPOOL_BOUNDARIES` and `BUFPOOL_GUARD_LEN`, falling back to the
    /// defaults for whichever is unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(sizes) = lookup(BOUNDARIES_ENV) {
            config.boundaries = Self::parse_boundaries(&sizes)?;
        }
        if let Some(raw) = lookup(GUARD_LEN_ENV) {
            config.guard_len = raw.trim().parse().map_err(|e| {
                Error::Config(format!("invalid {GUARD_LEN_ENV} '{raw}': {e}"))
            })?;
        }

        Ok(config)
    }

    /// Normalise the boundaries to an ascending, duplicate-free list.
    pub fn validate(&self) -> Result<Vec<usize>> {
        if self.boundaries.is_empty() {
            return Err(Error::Config(
                "at least one buffer size class is required".to_string(),
            ));
        }
        if self.boundaries.contains(&0) {
            return Err(Error::Config(
                "buffer size classes must be positive".to_string(),
            ));
        }

        let boundaries: Vec<usize> = self
            .boundaries
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if let Some(&largest) = boundaries.last() {
            if largest.checked_add(self.guard_len).is_none() {
                return Err(Error::Config(format!(
                    "size class {largest} plus guard {} overflows",
                    self.guard_len
                )));
            }
        }

        Ok(boundaries)
    }
}
