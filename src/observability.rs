//! Tracing setup and in-process counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Counters for downloads and hook deliveries
#[derive(Debug, Default)]
pub struct Metrics {
    downloads_submitted: AtomicU64,
    downloads_rejected: AtomicU64,
    downloads_finished: AtomicU64,
    downloads_failed: AtomicU64,
    hooks_delivered: AtomicU64,
    hooks_exhausted: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn download_submitted(&self) {
        self.downloads_submitted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "downloads_submitted", "Metric incremented");
    }

    pub fn download_rejected(&self) {
        self.downloads_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "downloads_rejected", "Metric incremented");
    }

    pub fn download_finished(&self) {
        self.downloads_finished.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "downloads_finished", "Metric incremented");
    }

    pub fn download_failed(&self) {
        self.downloads_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "downloads_failed", "Metric incremented");
    }

    pub fn hook_delivered(&self) {
        self.hooks_delivered.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "hooks_delivered", "Metric incremented");
    }

    pub fn hook_exhausted(&self) {
        self.hooks_exhausted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "hooks_exhausted", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            downloads_submitted: self.downloads_submitted.load(Ordering::Relaxed),
            downloads_rejected: self.downloads_rejected.load(Ordering::Relaxed),
            downloads_finished: self.downloads_finished.load(Ordering::Relaxed),
            downloads_failed: self.downloads_failed.load(Ordering::Relaxed),
            hooks_delivered: self.hooks_delivered.load(Ordering::Relaxed),
            hooks_exhausted: self.hooks_exhausted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub downloads_submitted: u64,
    pub downloads_rejected: u64,
    pub downloads_finished: u64,
    pub downloads_failed: u64,
    pub hooks_delivered: u64,
    pub hooks_exhausted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = Metrics::new();
        metrics.download_submitted();
        metrics.download_submitted();
        metrics.download_failed();
        metrics.hook_exhausted();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.downloads_submitted, 2);
        assert_eq!(snapshot.downloads_failed, 1);
        assert_eq!(snapshot.hooks_exhausted, 1);
        assert_eq!(snapshot.downloads_finished, 0);
    }
}
