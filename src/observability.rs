//! Tracing setup and in-process counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::ledger::PruneReport;
use crate::queue::DrainReport;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_level`. Calling this twice is harmless.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    posts_created: AtomicU64,
    posts_deleted: AtomicU64,
    prune_runs: AtomicU64,
    posts_pruned: AtomicU64,
    objects_removed: AtomicU64,
    objects_queued: AtomicU64,
    drain_runs: AtomicU64,
    queue_entries_acknowledged: AtomicU64,
    jobs_failed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post_created(&self) {
        self.posts_created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "posts_created", "Metric incremented");
    }

    pub fn post_deleted(&self) {
        self.posts_deleted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "posts_deleted", "Metric incremented");
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_failed", "Metric incremented");
    }

    /// Dry runs count as runs but change nothing else
    pub fn record_prune(&self, report: &PruneReport) {
        self.prune_runs.fetch_add(1, Ordering::Relaxed);
        if report.dry_run {
            return;
        }
        self.posts_pruned.fetch_add(report.deleted_count as u64, Ordering::Relaxed);
        self.objects_removed
            .fetch_add(report.removed_object_count as u64, Ordering::Relaxed);
        self.objects_queued
            .fetch_add(report.queued_object_count as u64, Ordering::Relaxed);
    }

    pub fn record_drain(&self, report: &DrainReport) {
        self.drain_runs.fetch_add(1, Ordering::Relaxed);
        self.objects_removed
            .fetch_add(report.removed_count as u64, Ordering::Relaxed);
        self.queue_entries_acknowledged
            .fetch_add(report.acknowledged_count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            posts_created: self.posts_created.load(Ordering::Relaxed),
            posts_deleted: self.posts_deleted.load(Ordering::Relaxed),
            prune_runs: self.prune_runs.load(Ordering::Relaxed),
            posts_pruned: self.posts_pruned.load(Ordering::Relaxed),
            objects_removed: self.objects_removed.load(Ordering::Relaxed),
            objects_queued: self.objects_queued.load(Ordering::Relaxed),
            drain_runs: self.drain_runs.load(Ordering::Relaxed),
            queue_entries_acknowledged: self.queue_entries_acknowledged.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub posts_created: u64,
    pub posts_deleted: u64,
    pub prune_runs: u64,
    pub posts_pruned: u64,
    pub objects_removed: u64,
    pub objects_queued: u64,
    pub drain_runs: u64,
    pub queue_entries_acknowledged: u64,
    pub jobs_failed: u64,
}
