//! Prune job: reclaims expired posts and their objects
//!
//! Each iteration fetches a bounded batch of dead posts from the expiry
//! index, removes their objects in chunks, and only then deletes the rows
//! whose objects all went away (or were queued, in deferred mode). A row
//! whose objects sat in a failed chunk stays put for the next run: an
//! object may briefly outlive its row, never the other way around.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{PruneMode, SweepConfig};
use crate::content::{ContentItem, ExpirationPolicy, ObjectRef};
use crate::lifecycle::Result;
use crate::queue::DeletionQueue;
use crate::storage::{BlobStore, group_by_namespace};

use super::store::PostStore;

/// Prune job tuning knobs
#[derive(Debug, Clone, Copy)]
pub struct PruneSettings {
    /// Candidate rows fetched per iteration
    pub batch_size: usize,
    /// Objects per storage batch-remove call
    pub chunk_size: usize,
    /// Chunk removals in flight at once
    pub concurrency: usize,
    /// Safety bound on iterations per run; remaining backlog waits for the next run
    pub max_iterations: usize,
    pub mode: PruneMode,
}

impl Default for PruneSettings {
    fn default() -> Self {
        Self::from_config(&SweepConfig::default())
    }
}

impl PruneSettings {
    pub fn from_config(config: &SweepConfig) -> Self {
        Self {
            batch_size: config.prune_batch_size,
            chunk_size: config.remove_chunk_size,
            concurrency: config.remove_concurrency,
            max_iterations: config.prune_max_iterations,
            mode: config.prune_mode,
        }
    }
}

/// Outcome of one prune run
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruneReport {
    pub deleted_count: usize,
    pub removed_object_count: usize,
    pub queued_object_count: usize,
    /// Expired rows kept because removal of one of their objects failed
    pub retained_count: usize,
    pub ids: Vec<String>,
    pub iterations: usize,
    pub dry_run: bool,
}

pub struct PruneJob {
    store: Arc<PostStore>,
    storage: Arc<dyn BlobStore>,
    queue: Arc<DeletionQueue>,
    policy: ExpirationPolicy,
    settings: PruneSettings,
}

impl PruneJob {
    pub fn new(
        store: Arc<PostStore>,
        storage: Arc<dyn BlobStore>,
        queue: Arc<DeletionQueue>,
        policy: ExpirationPolicy,
        settings: PruneSettings,
    ) -> Self {
        Self {
            store,
            storage,
            queue,
            policy,
            settings,
        }
    }

    pub fn settings(&self) -> &PruneSettings {
        &self.settings
    }

    pub async fn run(&self, dry_run: bool) -> Result<PruneReport> {
        self.run_at(Utc::now(), dry_run).await
    }

    /// Run against a fixed notion of "now"
    pub async fn run_at(&self, now: DateTime<Utc>, dry_run: bool) -> Result<PruneReport> {
        let mut report = PruneReport {
            dry_run,
            ..Default::default()
        };
        // Rows already reported or retained this run; never fetched twice
        let mut visited: HashSet<String> = HashSet::new();

        info!(%now, dry_run, mode = ?self.settings.mode, "Starting prune run");

        loop {
            if report.iterations >= self.settings.max_iterations {
                warn!(
                    iterations = report.iterations,
                    "Prune iteration cap reached, leaving remaining backlog for the next run"
                );
                break;
            }
            report.iterations += 1;

            let batch = self.store.expired_candidates(
                now,
                &self.policy,
                self.settings.batch_size,
                &visited,
                dry_run,
            )?;
            if batch.is_empty() {
                break;
            }
            let full = batch.len() >= self.settings.batch_size;
            visited.extend(batch.iter().map(|item| item.id.clone()));

            let refs = collect_refs(&batch);
            debug!(
                iteration = report.iterations,
                rows = batch.len(),
                objects = refs.len(),
                "Prune batch collected"
            );

            if dry_run {
                report.removed_object_count += refs.len();
                report.deleted_count += batch.len();
                report.ids.extend(batch.into_iter().map(|item| item.id));
            } else {
                let failed = match self.settings.mode {
                    PruneMode::Inline => self.remove_chunks(&refs, &mut report).await,
                    PruneMode::Deferred => self.enqueue_all(&refs, &mut report),
                };

                let (doomed, kept): (Vec<ContentItem>, Vec<ContentItem>) = batch
                    .into_iter()
                    .partition(|item| !item.object_refs.iter().any(|r| failed.contains(r)));

                for item in &kept {
                    warn!(post_id = %item.id, "Keeping expired post until its objects are removed");
                }
                report.retained_count += kept.len();

                let deleted = self.store.delete_many(&doomed).map_err(|e| {
                    error!(error = %e, rows = doomed.len(), "Row deletion failed, aborting prune run");
                    e
                })?;
                report.deleted_count += deleted;
                report.ids.extend(doomed.into_iter().map(|item| item.id));
            }

            if !full {
                break;
            }
        }

        if !dry_run {
            self.store.record_prune(now)?;
        }

        info!(
            deleted = report.deleted_count,
            removed_objects = report.removed_object_count,
            queued_objects = report.queued_object_count,
            retained = report.retained_count,
            iterations = report.iterations,
            dry_run,
            "Prune run complete"
        );
        Ok(report)
    }

    /// Remove objects chunk by chunk; returns the refs whose chunk failed
    async fn remove_chunks(&self, refs: &[ObjectRef], report: &mut PruneReport) -> HashSet<ObjectRef> {
        let chunk_size = self.settings.chunk_size.max(1);
        let chunks: Vec<(String, Vec<String>)> = group_by_namespace(refs)
            .into_iter()
            .flat_map(|(namespace, paths)| {
                paths
                    .chunks(chunk_size)
                    .map(|chunk| (namespace.clone(), chunk.to_vec()))
                    .collect::<Vec<_>>()
            })
            .collect();

        let storage = &self.storage;
        let results: Vec<_> = futures::stream::iter(chunks)
            .map(|(namespace, paths)| async move {
                let result = storage.remove_batch(&namespace, &paths).await;
                (namespace, paths, result)
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut failed = HashSet::new();
        for (namespace, paths, result) in results {
            match result {
                Ok(_) => report.removed_object_count += paths.len(),
                Err(e) => {
                    warn!(
                        namespace = %namespace,
                        count = paths.len(),
                        error = %e,
                        "Chunk removal failed, owning posts kept for the next run"
                    );
                    failed.extend(
                        paths
                            .into_iter()
                            .map(|path| ObjectRef::new(namespace.clone(), path)),
                    );
                }
            }
        }
        failed
    }

    /// Hand every object to the deletion queue; on failure every ref counts as failed
    fn enqueue_all(&self, refs: &[ObjectRef], report: &mut PruneReport) -> HashSet<ObjectRef> {
        match self.queue.enqueue_many(refs) {
            Ok(ids) => {
                report.queued_object_count += ids.len();
                HashSet::new()
            }
            Err(e) => {
                warn!(count = refs.len(), error = %e, "Queueing objects failed, posts kept for the next run");
                refs.iter().cloned().collect()
            }
        }
    }
}

/// Union of every object ref in the batch, in first-seen order
fn collect_refs(batch: &[ContentItem]) -> Vec<ObjectRef> {
    let mut seen = HashSet::new();
    batch
        .iter()
        .flat_map(|item| item.object_refs.iter())
        .filter(|r| seen.insert((*r).clone()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleError;
    use crate::storage::{FaultyStorage, StorageClient};
    use chrono::Duration;
    use tempfile::TempDir;

    const NS: &str = "post-images";

    struct Harness {
        store: Arc<PostStore>,
        storage: Arc<FaultyStorage>,
        queue: Arc<DeletionQueue>,
        _temp: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let store = Arc::new(PostStore::open(temp.path().join("posts"), NS).unwrap());
            let queue = Arc::new(DeletionQueue::open(temp.path().join("queue")).unwrap());
            let inner: Arc<dyn BlobStore> = Arc::new(StorageClient::in_memory(NS, &[]));
            let storage = Arc::new(FaultyStorage::new(inner));
            Self {
                store,
                storage,
                queue,
                _temp: temp,
            }
        }

        fn job(&self, settings: PruneSettings) -> PruneJob {
            PruneJob::new(
                self.store.clone(),
                self.storage.clone(),
                self.queue.clone(),
                ExpirationPolicy::default(),
                settings,
            )
        }

        async fn seed(&self, id: &str, created_at: DateTime<Utc>, objects: usize) -> ContentItem {
            let mut object_refs = Vec::new();
            for i in 0..objects {
                let object = ObjectRef::new(NS, format!("posts/{id}/{i}.jpg"));
                self.storage.put(&object, vec![1, 2, 3]).await.unwrap();
                object_refs.push(object);
            }
            let item = ContentItem {
                id: id.to_string(),
                owner_id: "alice".to_string(),
                title: String::new(),
                body: String::new(),
                category: None,
                created_at,
                expires_at: None,
                object_refs,
            };
            self.store.insert(&item).unwrap();
            item
        }

        async fn exists(&self, object: &ObjectRef) -> bool {
            self.storage.exists(object).await.unwrap()
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn sorted(mut ids: Vec<String>) -> Vec<String> {
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_prunes_only_expired_posts() {
        let h = Harness::new();
        let now = t0() + Duration::days(15);
        let dead = h.seed("dead", t0(), 2).await;
        let alive = h.seed("alive", now - Duration::days(1), 1).await;

        let report = h.job(PruneSettings::default()).run_at(now, false).await.unwrap();

        assert_eq!(report.deleted_count, 1);
        assert_eq!(report.removed_object_count, 2);
        assert_eq!(report.ids, vec!["dead".to_string()]);
        assert!(h.store.get("dead").unwrap().is_none());
        assert!(h.store.get("alive").unwrap().is_some());
        for object in &dead.object_refs {
            assert!(!h.exists(object).await);
        }
        assert!(h.exists(&alive.object_refs[0]).await);
        assert_eq!(h.store.last_prune().unwrap(), Some(now));
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let h = Harness::new();
        let now = t0() + Duration::days(15);
        h.seed("a", t0(), 1).await;
        h.seed("b", t0(), 0).await;

        let job = h.job(PruneSettings::default());
        let first = job.run_at(now, false).await.unwrap();
        assert_eq!(first.deleted_count, 2);

        let second = job.run_at(now, false).await.unwrap();
        assert_eq!(second.deleted_count, 0);
        assert_eq!(second.removed_object_count, 0);
        assert!(second.ids.is_empty());
    }

    #[tokio::test]
    async fn test_failed_chunk_keeps_owning_rows_until_next_run() {
        let h = Harness::new();
        let now = t0() + Duration::days(15);
        let a = h.seed("a", t0(), 1).await;
        let b = h.seed("b", t0(), 1).await;
        let c = h.seed("c", t0(), 1).await;

        h.storage.fail_path(b.object_refs[0].path.clone());
        let settings = PruneSettings {
            chunk_size: 1,
            ..PruneSettings::default()
        };

        let report = h.job(settings).run_at(now, false).await.unwrap();
        assert_eq!(sorted(report.ids), vec!["a", "c"]);
        assert_eq!(report.retained_count, 1);
        assert_eq!(report.removed_object_count, 2);
        assert!(h.store.get("b").unwrap().is_some());
        assert!(h.exists(&b.object_refs[0]).await);
        assert!(!h.exists(&a.object_refs[0]).await);
        assert!(!h.exists(&c.object_refs[0]).await);

        h.storage.heal();
        let retry = h.job(settings).run_at(now, false).await.unwrap();
        assert_eq!(retry.ids, vec!["b".to_string()]);
        assert_eq!(retry.removed_object_count, 1);
        assert!(!h.exists(&b.object_refs[0]).await);
    }

    #[tokio::test]
    async fn test_dry_run_mutates_nothing() {
        let h = Harness::new();
        let now = t0() + Duration::days(15);
        let a = h.seed("a", t0(), 2).await;
        h.seed("b", t0(), 1).await;

        let job = h.job(PruneSettings::default());
        let dry = job.run_at(now, true).await.unwrap();
        assert!(dry.dry_run);
        assert_eq!(dry.deleted_count, 2);
        assert_eq!(dry.removed_object_count, 3);
        assert_eq!(h.storage.remove_calls(), 0);
        assert!(h.store.get("a").unwrap().is_some());
        assert!(h.exists(&a.object_refs[0]).await);
        assert!(h.store.last_prune().unwrap().is_none());

        let real = job.run_at(now, false).await.unwrap();
        assert_eq!(sorted(real.ids), sorted(dry.ids));
        assert_eq!(real.removed_object_count, dry.removed_object_count);
    }

    #[tokio::test]
    async fn test_row_delete_failure_aborts_run() {
        let h = Harness::new();
        let now = t0() + Duration::days(15);
        let dead = h.seed("dead", t0(), 1).await;

        h.store.fail_next_delete();
        let err = h
            .job(PruneSettings::default())
            .run_at(now, false)
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::StoreUnavailable(_)));
        assert!(h.store.get("dead").unwrap().is_some());
        assert!(h.store.last_prune().unwrap().is_none());
        // objects were already removed; the row goes on the next run
        assert!(!h.exists(&dead.object_refs[0]).await);

        let retry = h.job(PruneSettings::default()).run_at(now, false).await.unwrap();
        assert_eq!(retry.ids, vec!["dead".to_string()]);
    }

    #[tokio::test]
    async fn test_backlog_spans_iterations() {
        let h = Harness::new();
        let now = t0() + Duration::days(15);
        for i in 0..7 {
            h.seed(&format!("p{i}"), t0() + Duration::minutes(i), 1).await;
        }

        let settings = PruneSettings {
            batch_size: 3,
            ..PruneSettings::default()
        };
        let report = h.job(settings).run_at(now, false).await.unwrap();

        assert_eq!(report.deleted_count, 7);
        assert_eq!(report.iterations, 3);
        assert_eq!(h.store.stats().unwrap().post_count, 0);
    }

    #[tokio::test]
    async fn test_iteration_cap_leaves_rest_for_next_run() {
        let h = Harness::new();
        let now = t0() + Duration::days(15);
        for i in 0..5 {
            h.seed(&format!("p{i}"), t0() + Duration::minutes(i), 0).await;
        }

        let settings = PruneSettings {
            batch_size: 2,
            max_iterations: 1,
            ..PruneSettings::default()
        };
        let job = h.job(settings);

        let first = job.run_at(now, false).await.unwrap();
        assert_eq!(first.deleted_count, 2);
        assert_eq!(h.store.stats().unwrap().post_count, 3);

        job.run_at(now, false).await.unwrap();
        job.run_at(now, false).await.unwrap();
        assert_eq!(h.store.stats().unwrap().post_count, 0);
    }

    #[tokio::test]
    async fn test_retained_rows_do_not_starve_the_backlog() {
        let h = Harness::new();
        let now = t0() + Duration::days(15);
        // oldest posts fail, newer ones must still be reached in the same run
        let stuck = h.seed("p0", t0(), 1).await;
        h.storage.fail_path(stuck.object_refs[0].path.clone());
        for i in 1..4 {
            h.seed(&format!("p{i}"), t0() + Duration::minutes(i), 1).await;
        }

        let settings = PruneSettings {
            batch_size: 1,
            chunk_size: 1,
            ..PruneSettings::default()
        };
        let report = h.job(settings).run_at(now, false).await.unwrap();
        assert_eq!(report.deleted_count, 3);
        assert_eq!(report.retained_count, 1);
        assert!(h.store.get("p0").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_deferred_mode_queues_objects_and_deletes_rows() {
        let h = Harness::new();
        let now = t0() + Duration::days(15);
        let a = h.seed("a", t0(), 2).await;

        let settings = PruneSettings {
            mode: PruneMode::Deferred,
            ..PruneSettings::default()
        };
        let report = h.job(settings).run_at(now, false).await.unwrap();

        assert_eq!(report.deleted_count, 1);
        assert_eq!(report.queued_object_count, 2);
        assert_eq!(report.removed_object_count, 0);
        assert!(h.store.get("a").unwrap().is_none());
        // bytes stay until the drain job runs
        assert!(h.exists(&a.object_refs[0]).await);
        assert_eq!(h.queue.len().unwrap(), 2);
    }

    #[test]
    fn test_collect_refs_deduplicates() {
        let shared = ObjectRef::new(NS, "posts/shared.jpg");
        let item = |id: &str, refs: Vec<ObjectRef>| ContentItem {
            id: id.to_string(),
            owner_id: "alice".to_string(),
            title: String::new(),
            body: String::new(),
            category: None,
            created_at: t0(),
            expires_at: None,
            object_refs: refs,
        };
        let batch = vec![
            item("a", vec![shared.clone(), ObjectRef::new(NS, "posts/a.jpg")]),
            item("b", vec![shared.clone()]),
        ];
        assert_eq!(collect_refs(&batch).len(), 2);
    }
}
