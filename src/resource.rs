//! Memory-pressure bookkeeping for ingestion jobs.
//!
//! The tracker is plain orchestrator-owned state, never a process-wide
//! singleton, so tests can run isolated instances. The policy is
//! deliberately blunt: once tracked usage crosses the limit or the
//! interval since the last cleanup elapses, the whole embedding cache
//! is dropped and the counter reset. Predictable worst-case memory
//! beats cache-hit rate here.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ResourceTracker {
    tracked_bytes: u64,
    limit_bytes: u64,
    cleanup_interval: Duration,
    last_cleanup: Instant,
}

impl ResourceTracker {
    pub fn new(limit_bytes: u64, cleanup_interval: Duration) -> Self {
        Self {
            tracked_bytes: 0,
            limit_bytes,
            cleanup_interval,
            last_cleanup: Instant::now(),
        }
    }

    pub fn record(&mut self, bytes: u64) {
        self.tracked_bytes = self.tracked_bytes.saturating_add(bytes);
    }

    pub fn tracked_bytes(&self) -> u64 {
        self.tracked_bytes
    }

    pub fn should_cleanup(&self) -> bool {
        self.tracked_bytes > self.limit_bytes
            || self.last_cleanup.elapsed() >= self.cleanup_interval
    }

    pub fn reset(&mut self) {
        self.tracked_bytes = 0;
        self.last_cleanup = Instant::now();
    }
}
