//! Drain job for the deletion queue
//!
//! Walks the queue in id order, page by page, removing each page's objects
//! with one batch call per namespace. Entries are acknowledged only after
//! their namespace call succeeded. A namespace that fails once is skipped
//! for the rest of the run so a broken bucket cannot pin the job on the
//! same page; its entries stay queued for the next run.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SweepConfig;
use crate::lifecycle::Result;
use crate::storage::BlobStore;

use super::store::{DeletionQueue, DeletionQueueEntry};

#[derive(Debug, Clone, Copy)]
pub struct DrainSettings {
    pub page_size: usize,
    /// Upper bound on pages per run
    pub max_pages: usize,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self::from_config(&SweepConfig::default())
    }
}

impl DrainSettings {
    pub fn from_config(config: &SweepConfig) -> Self {
        Self {
            page_size: config.drain_page_size,
            max_pages: config.drain_max_pages,
        }
    }
}

/// Outcome of one drain run
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Distinct objects confirmed removed
    pub removed_count: usize,
    /// Queue entries deleted
    pub acknowledged_count: usize,
    /// Namespaces whose removal failed during this run
    pub failed_namespaces: Vec<String>,
    pub pages: usize,
}

pub struct QueueDrainJob {
    queue: Arc<DeletionQueue>,
    storage: Arc<dyn BlobStore>,
    settings: DrainSettings,
}

impl QueueDrainJob {
    pub fn new(queue: Arc<DeletionQueue>, storage: Arc<dyn BlobStore>, settings: DrainSettings) -> Self {
        Self {
            queue,
            storage,
            settings,
        }
    }

    pub async fn run(&self) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        let mut failed: HashSet<String> = HashSet::new();
        let mut cursor: Option<u64> = None;

        loop {
            if report.pages >= self.settings.max_pages {
                warn!(pages = report.pages, "Drain page cap reached, leaving the rest queued");
                break;
            }

            let page = self.queue.fetch_page(cursor, self.settings.page_size.max(1))?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.id);
            report.pages += 1;

            let full = page.len() >= self.settings.page_size;
            self.drain_page(page, &mut failed, &mut report).await?;

            if !full {
                break;
            }
        }

        report.failed_namespaces = failed.into_iter().collect();
        report.failed_namespaces.sort();

        info!(
            removed = report.removed_count,
            acknowledged = report.acknowledged_count,
            failed_namespaces = ?report.failed_namespaces,
            pages = report.pages,
            "Drain run complete"
        );
        Ok(report)
    }

    async fn drain_page(
        &self,
        page: Vec<DeletionQueueEntry>,
        failed: &mut HashSet<String>,
        report: &mut DrainReport,
    ) -> Result<()> {
        let mut groups: BTreeMap<String, Vec<DeletionQueueEntry>> = BTreeMap::new();
        for entry in page {
            groups.entry(entry.namespace.clone()).or_default().push(entry);
        }

        for (namespace, entries) in groups {
            if failed.contains(&namespace) {
                debug!(namespace = %namespace, count = entries.len(), "Skipping namespace that failed earlier");
                continue;
            }

            let mut paths: Vec<String> = entries.iter().map(|e| e.path.clone()).collect();
            paths.sort();
            paths.dedup();

            match self.storage.remove_batch(&namespace, &paths).await {
                Ok(_) => {
                    let ids: Vec<u64> = entries.iter().map(|e| e.id).collect();
                    report.removed_count += paths.len();
                    report.acknowledged_count += self.queue.acknowledge(&ids)?;
                }
                Err(e) => {
                    warn!(
                        namespace = %namespace,
                        count = paths.len(),
                        error = %e,
                        "Queued removal failed, entries stay queued"
                    );
                    failed.insert(namespace);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ObjectRef;
    use crate::storage::{FaultyStorage, StorageClient};
    use tempfile::TempDir;

    fn setup(namespaces: &[&str]) -> (Arc<DeletionQueue>, Arc<FaultyStorage>, TempDir) {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(DeletionQueue::open(temp.path()).unwrap());
        let inner: Arc<dyn BlobStore> = Arc::new(StorageClient::in_memory("post-images", namespaces));
        (queue, Arc::new(FaultyStorage::new(inner)), temp)
    }

    #[tokio::test]
    async fn test_empty_queue_is_a_no_op() {
        let (queue, storage, _temp) = setup(&[]);
        let job = QueueDrainJob::new(queue, storage.clone(), DrainSettings::default());

        let report = job.run().await.unwrap();
        assert_eq!(report, DrainReport::default());
        assert_eq!(storage.remove_calls(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_entries_are_all_acknowledged() {
        let (queue, storage, _temp) = setup(&[]);
        let object = ObjectRef::new("post-images", "posts/p1/0.jpg");
        storage.put(&object, vec![0; 4]).await.unwrap();

        queue.enqueue(&object.namespace, &object.path).unwrap();
        queue.enqueue(&object.namespace, &object.path).unwrap();

        let job = QueueDrainJob::new(queue.clone(), storage.clone(), DrainSettings::default());
        let report = job.run().await.unwrap();

        assert_eq!(report.removed_count, 1);
        assert_eq!(report.acknowledged_count, 2);
        assert!(queue.is_empty().unwrap());
        assert!(!storage.exists(&object).await.unwrap());
    }

    #[tokio::test]
    async fn test_failing_namespace_does_not_block_others() {
        let (queue, storage, _temp) = setup(&["avatars"]);
        storage.fail_namespace("avatars");

        queue.enqueue("avatars", "alice/1.png").unwrap();
        queue.enqueue("post-images", "posts/p1/0.jpg").unwrap();
        queue.enqueue("avatars", "bob/2.png").unwrap();

        let settings = DrainSettings {
            page_size: 2,
            max_pages: 10,
        };
        let job = QueueDrainJob::new(queue.clone(), storage.clone(), settings);
        let report = job.run().await.unwrap();

        assert_eq!(report.acknowledged_count, 1);
        assert_eq!(report.failed_namespaces, vec!["avatars".to_string()]);
        assert_eq!(report.pages, 2);
        // the second avatars entry was skipped without another storage call
        assert_eq!(storage.remove_calls(), 2);

        let remaining: Vec<String> = queue
            .fetch_page(None, 10)
            .unwrap()
            .into_iter()
            .map(|e| e.namespace)
            .collect();
        assert_eq!(remaining, vec!["avatars", "avatars"]);

        storage.heal();
        let retry = job.run().await.unwrap();
        assert_eq!(retry.acknowledged_count, 2);
        assert!(queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_page_cap_bounds_a_run() {
        let (queue, storage, _temp) = setup(&[]);
        for i in 0..5 {
            queue.enqueue("post-images", &format!("posts/{i}.jpg")).unwrap();
        }

        let settings = DrainSettings {
            page_size: 2,
            max_pages: 2,
        };
        let job = QueueDrainJob::new(queue.clone(), storage, settings);

        let report = job.run().await.unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(report.acknowledged_count, 4);
        assert_eq!(queue.len().unwrap(), 1);
    }
}
