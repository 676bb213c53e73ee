use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Minimal counters for operational visibility of the data source.
#[derive(Clone, Default, Debug)]
pub struct SourceCounters {
    pub frames: Arc<AtomicU64>,
    pub decode_errors: Arc<AtomicU64>,
    pub dropped_events: Arc<AtomicU64>,
    pub dispatched_events: Arc<AtomicU64>,
    pub handler_failures: Arc<AtomicU64>,
    pub reconnects: Arc<AtomicU64>,
    pub poll_failures: Arc<AtomicU64>,
}

impl SourceCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
