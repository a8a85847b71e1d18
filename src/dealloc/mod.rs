//! Proactive release of unpooled buffer memory
//!
//! The hook is resolved once: each candidate [`ReleaseStrategy`] is trial-run
//! against a one-page region and the first that succeeds is adopted. If none
//! works the hook is `Unavailable` and releasing a buffer simply frees it
//! through the allocator, which returns pages to the OS on its own schedule.

pub mod strategies;

pub use strategies::{platform_candidates, ReleaseStrategy};
#[cfg(unix)]
pub use strategies::{MadviseDontNeed, PosixMadviseDontNeed};

use crate::pool::{page_size, GuardedBuffer, RawRegion};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

static GLOBAL_HOOK: LazyLock<Arc<DeallocationHook>> =
    LazyLock::new(|| Arc::new(DeallocationHook::resolve(platform_candidates())));

/// A candidate that failed its trial run
#[derive(Debug)]
pub struct ProbeFailure {
    pub strategy: &'static str,
    pub error: io::Error,
}

/// Terminal outcome of resolution; never changes afterwards.
pub enum HookState {
    Resolved(Box<dyn ReleaseStrategy>),
    Unavailable { failures: Vec<ProbeFailure> },
}

impl std::fmt::Debug for HookState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookState::Resolved(strategy) => {
                f.debug_tuple("Resolved").field(&strategy.name()).finish()
            }
            HookState::Unavailable { failures } => f
                .debug_struct("Unavailable")
                .field("failures", failures)
                .finish(),
        }
    }
}

/// Best-effort early release of memory that cannot be pooled
#[derive(Debug)]
pub struct DeallocationHook {
    state: HookState,
    releases: AtomicU64,
    strategy_failures: AtomicU64,
}

impl DeallocationHook {
    /// The process-wide hook, resolved against the platform candidates on
    /// first use.
    pub fn global() -> Arc<Self> {
        Arc::clone(&*GLOBAL_HOOK)
    }

    /// Probe `candidates` in order and adopt the first that passes its trial.
    pub fn resolve(candidates: Vec<Box<dyn ReleaseStrategy>>) -> Self {
        let mut failures = Vec::new();

        for candidate in candidates {
            match Self::probe(candidate.as_ref()) {
                Ok(()) => {
                    debug!(strategy = candidate.name(), "Deallocation hook resolved");
                    return Self::with_state(HookState::Resolved(candidate));
                }
                Err(error) => failures.push(ProbeFailure {
                    strategy: candidate.name(),
                    error,
                }),
            }
        }

        let summary = if failures.is_empty() {
            "no candidates for this platform".to_string()
        } else {
            failures
                .iter()
                .map(|f| format!("{}: {}", f.strategy, f.error))
                .collect::<Vec<_>>()
                .join("; ")
        };
        warn!(
            failures = %summary,
            "Deallocation hook unavailable; unpooled buffers will be reclaimed by the allocator only"
        );

        Self::with_state(HookState::Unavailable { failures })
    }

    /// A hook that never attempts early release.
    pub fn unavailable() -> Self {
        Self::with_state(HookState::Unavailable {
            failures: Vec::new(),
        })
    }

    fn with_state(state: HookState) -> Self {
        Self {
            state,
            releases: AtomicU64::new(0),
            strategy_failures: AtomicU64::new(0),
        }
    }

    fn probe(strategy: &dyn ReleaseStrategy) -> io::Result<()> {
        let mut trial = RawRegion::allocate(page_size())
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e.to_string()))?;
        strategy.attempt_release(&mut trial)
    }

    pub fn state(&self) -> &HookState {
        &self.state
    }

    pub fn is_available(&self) -> bool {
        matches!(self.state, HookState::Resolved(_))
    }

    /// Name of the adopted strategy, if any
    pub fn strategy_name(&self) -> Option<&'static str> {
        match &self.state {
            HookState::Resolved(strategy) => Some(strategy.name()),
            HookState::Unavailable { .. } => None,
        }
    }

    /// Retire `buffer` and free its memory now.
    ///
    /// The buffer is marked unusable, its pages are released through the
    /// adopted strategy when there is one, and the allocation is freed.
    pub fn release(&self, mut buffer: GuardedBuffer) {
        buffer.mark_unusable();

        if let HookState::Resolved(strategy) = &self.state {
            if let Err(error) = strategy.attempt_release(buffer.region_mut()) {
                self.strategy_failures.fetch_add(1, Ordering::Relaxed);
                debug!(
                    strategy = strategy.name(),
                    buffer_id = buffer.id(),
                    capacity = buffer.capacity(),
                    error = %error,
                    "Early release failed; freeing through the allocator"
                );
            }
        }

        self.releases.fetch_add(1, Ordering::Relaxed);
        drop(buffer);
    }

    /// Buffers passed to `release` so far
    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }

    pub fn strategy_failures(&self) -> u64 {
        self.strategy_failures.load(Ordering::Relaxed)
    }
}
