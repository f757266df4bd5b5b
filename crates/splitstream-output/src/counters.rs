//! Atomic counter bundle for the output engine.
//!
//! The counters are the only state shared across tasks: the receiver and
//! the publisher pool update them with relaxed atomics and a snapshot can be
//! taken at any time without locking.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters, updated by the engine's tasks.
#[derive(Debug, Default)]
pub struct OutputCounters {
    process_file_count: AtomicU64,
    process_file_failures: AtomicU64,
    process_file_partial_failures: AtomicU64,
    process_file_bytes: AtomicU64,
    process_message_count: AtomicU64,
    process_message_failures: AtomicU64,
    process_message_bytes: AtomicU64,
    encode_message_failures: AtomicU64,
    open_file_count: AtomicU64,
    open_file_limit: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputMetrics {
    pub process_file_count: u64,
    pub process_file_failures: u64,
    pub process_file_partial_failures: u64,
    pub process_file_bytes: u64,
    pub process_message_count: u64,
    pub process_message_failures: u64,
    pub process_message_bytes: u64,
    pub encode_message_failures: u64,
    pub open_file_count: u64,
    pub open_file_limit: u64,
}

impl OutputCounters {
    pub fn inc_file_count(&self) {
        self.process_file_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_file_failures(&self) {
        self.process_file_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_file_partial_failures(&self) {
        self.process_file_partial_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_file_bytes(&self, bytes: u64) {
        self.process_file_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_message_count(&self) {
        self.process_message_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_message_failures(&self) {
        self.process_message_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_message_bytes(&self, bytes: u64) {
        self.process_message_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_encode_failures(&self) {
        self.encode_message_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_open_file_count(&self, count: u64) {
        self.open_file_count.store(count, Ordering::Relaxed);
    }

    pub fn set_open_file_limit(&self, limit: u64) {
        self.open_file_limit.store(limit, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> OutputMetrics {
        OutputMetrics {
            process_file_count: self.process_file_count.load(Ordering::Relaxed),
            process_file_failures: self.process_file_failures.load(Ordering::Relaxed),
            process_file_partial_failures: self
                .process_file_partial_failures
                .load(Ordering::Relaxed),
            process_file_bytes: self.process_file_bytes.load(Ordering::Relaxed),
            process_message_count: self.process_message_count.load(Ordering::Relaxed),
            process_message_failures: self.process_message_failures.load(Ordering::Relaxed),
            process_message_bytes: self.process_message_bytes.load(Ordering::Relaxed),
            encode_message_failures: self.encode_message_failures.load(Ordering::Relaxed),
            open_file_count: self.open_file_count.load(Ordering::Relaxed),
            open_file_limit: self.open_file_limit.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let snap = OutputCounters::default().snapshot();
        assert_eq!(snap.process_file_count, 0);
        assert_eq!(snap.process_message_count, 0);
        assert_eq!(snap.open_file_limit, 0);
    }

    #[test]
    fn test_increments_show_in_snapshot() {
        let counters = OutputCounters::default();
        counters.inc_message_count();
        counters.inc_message_count();
        counters.add_message_bytes(100);
        counters.inc_file_count();
        counters.inc_file_partial_failures();
        counters.set_open_file_count(7);
        counters.set_open_file_limit(1000);

        let snap = counters.snapshot();
        assert_eq!(snap.process_message_count, 2);
        assert_eq!(snap.process_message_bytes, 100);
        assert_eq!(snap.process_file_count, 1);
        assert_eq!(snap.process_file_partial_failures, 1);
        assert_eq!(snap.open_file_count, 7);
        assert_eq!(snap.open_file_limit, 1000);
    }
}
