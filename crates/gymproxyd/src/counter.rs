use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of requests between progress log lines.
pub const DEFAULT_LOG_EVERY: u64 = 1000;

/// Per-session request counter used only for progress logging.
#[derive(Debug)]
pub struct OpCounter {
    ops: AtomicU64,
    log_every: u64,
}

impl OpCounter {
    pub fn new(log_every: u64) -> Self {
        Self {
            ops: AtomicU64::new(0),
            log_every,
        }
    }

    /// Counts one request; returns the new total when a progress line is due.
    pub fn record(&self) -> Option<u64> {
        let ops = self.ops.fetch_add(1, Ordering::Relaxed) + 1;
        (self.log_every > 0 && ops % self.log_every == 0).then_some(ops)
    }

    pub fn reset(&self) {
        self.ops.store(0, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.ops.load(Ordering::Relaxed)
    }
}

impl Default for OpCounter {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_EVERY)
    }
}
