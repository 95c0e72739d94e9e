//! Process-wide activity counters.
//!
//! Shared through `Arc`; every increment is a relaxed atomic add, so readers
//! may observe counters from slightly different instants.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug)]
pub struct StatsCounter {
    started: Instant,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    images_received: AtomicU64,
    random_messages_sent: AtomicU64,
    random_messages_skipped: AtomicU64,
    llm_calls: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub uptime: Duration,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub images_received: u64,
    pub random_messages_sent: u64,
    pub random_messages_skipped: u64,
    pub llm_calls: u64,
    pub errors: u64,
}

impl Default for StatsCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCounter {
    pub fn new() -> Self {
        StatsCounter {
            started: Instant::now(),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            images_received: AtomicU64::new(0),
            random_messages_sent: AtomicU64::new(0),
            random_messages_skipped: AtomicU64::new(0),
            llm_calls: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn image_received(&self) {
        self.images_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn random_sent(&self) {
        self.random_messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn random_skipped(&self) {
        self.random_messages_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn llm_call(&self) {
        self.llm_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime: self.uptime(),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            images_received: self.images_received.load(Ordering::Relaxed),
            random_messages_sent: self.random_messages_sent.load(Ordering::Relaxed),
            random_messages_skipped: self.random_messages_skipped.load(Ordering::Relaxed),
            llm_calls: self.llm_calls.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_start_at_zero() {
        let snap = StatsCounter::new().snapshot();
        assert_eq!(snap.messages_sent, 0);
        assert_eq!(snap.errors, 0);
        assert_eq!(snap.random_messages_skipped, 0);
    }

    #[test]
    fn test_increments_are_independent() {
        let stats = StatsCounter::new();
        stats.message_received();
        stats.message_received();
        stats.image_received();
        stats.llm_call();
        stats.error();
        stats.random_skipped();

        let snap = stats.snapshot();
        assert_eq!(snap.messages_received, 2);
        assert_eq!(snap.images_received, 1);
        assert_eq!(snap.llm_calls, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.random_messages_skipped, 1);
        assert_eq!(snap.messages_sent, 0);
        assert_eq!(snap.random_messages_sent, 0);
    }

    #[tokio::test]
    async fn test_concurrent_increments() {
        let stats = Arc::new(StatsCounter::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let stats = stats.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    stats.message_sent();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(stats.snapshot().messages_sent, 800);
    }
}
