//! Consecutive-failure circuit breaker for the enrichment capability.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tracing::warn;

/// Opens once consecutive failures exceed the threshold and then stays open
/// for the rest of the process.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    failures: AtomicU32,
    open: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            failures: AtomicU32::new(0),
            open: AtomicBool::new(false),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn record_success(&self) {
        if !self.is_open() {
            self.failures.store(0, Ordering::SeqCst);
        }
    }

    pub fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures > self.threshold && !self.open.swap(true, Ordering::SeqCst) {
            warn!(failures, "Enrichment circuit breaker tripped; continuing without enrichment");
        }
    }
}
