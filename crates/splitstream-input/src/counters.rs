//! Atomic counter bundle shared by the input variants.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters, updated by lister and fetcher tasks.
#[derive(Debug, Default)]
pub struct InputCounters {
    process_file_count: AtomicU64,
    process_file_failures: AtomicU64,
    process_message_count: AtomicU64,
    process_message_failures: AtomicU64,
    process_message_bytes: AtomicU64,
    remaining_data_bytes: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputMetrics {
    pub process_file_count: u64,
    pub process_file_failures: u64,
    pub process_message_count: u64,
    pub process_message_failures: u64,
    pub process_message_bytes: u64,
    pub remaining_data_bytes: u64,
}

impl InputCounters {
    pub fn inc_file_count(&self) {
        self.process_file_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_file_failures(&self) {
        self.process_file_failures.fetch_add(1, Ordering::Relaxed);
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

    pub fn add_remaining_bytes(&self, bytes: u64) {
        self.remaining_data_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> InputMetrics {
        InputMetrics {
            process_file_count: self.process_file_count.load(Ordering::Relaxed),
            process_file_failures: self.process_file_failures.load(Ordering::Relaxed),
            process_message_count: self.process_message_count.load(Ordering::Relaxed),
            process_message_failures: self.process_message_failures.load(Ordering::Relaxed),
            process_message_bytes: self.process_message_bytes.load(Ordering::Relaxed),
            remaining_data_bytes: self.remaining_data_bytes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_updates() {
        let counters = InputCounters::default();
        counters.inc_file_count();
        counters.inc_message_count();
        counters.inc_message_count();
        counters.add_message_bytes(64);
        counters.add_remaining_bytes(7);

        let snap = counters.snapshot();
        assert_eq!(snap.process_file_count, 1);
        assert_eq!(snap.process_message_count, 2);
        assert_eq!(snap.process_message_bytes, 64);
        assert_eq!(snap.remaining_data_bytes, 7);
        assert_eq!(snap.process_file_failures, 0);
    }
}
