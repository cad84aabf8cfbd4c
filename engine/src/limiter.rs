//! Event-counted operation bound for the in-process and isolated-worker
//! strategies.
//!
//! Wall-clock timeouts interact poorly with in-process blocking; an
//! event-counted bound is deterministic and cancellable from the host. Scoped
//! to a single evaluation: construct one, install it, always disable it on
//! the way out regardless of outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crucible_types::TraceMode;

/// Shared counter installed into the guest engine's progress/trace hook.
#[derive(Clone)]
pub struct OperationLimiter {
    n: Arc<AtomicU64>,
    bound: u64,
    mode: TraceMode,
    enabled: Arc<std::sync::atomic::AtomicBool>,
}

impl OperationLimiter {
    #[must_use]
    pub fn new(bound: u64, mode: TraceMode) -> Self {
        Self {
            n: Arc::new(AtomicU64::new(0)),
            bound,
            mode,
            enabled: Arc::new(std::sync::atomic::AtomicBool::new(true)),
        }
    }

    #[must_use]
    pub fn mode(&self) -> TraceMode {
        self.mode
    }

    /// Record one trace event of the limiter's configured mode. Returns
    /// `false` once the bound has been exceeded, signaling the caller to
    /// abort the running guest evaluation.
    #[must_use]
    pub fn tick(&self) -> bool {
        if !self.enabled.load(Ordering::Relaxed) {
            return true;
        }
        let count = self.n.fetch_add(1, Ordering::Relaxed) + 1;
        count <= self.bound
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.n.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn bound(&self) -> u64 {
        self.bound
    }

    /// Must be called on every exit path from the evaluation it guards.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    #[must_use]
    pub fn exceeded_message(&self) -> String {
        format!("Operation limit exceeded: {}", self.bound)
    }
}
