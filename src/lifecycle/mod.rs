//! Content lifecycle: creation, owner deletes and the background sweep
//!
//! [`Lifecycle`] wires the post store, object storage and deletion queue
//! into the operations the API and CLI call. Everything shares the same
//! `Arc`s, so a prune triggered over HTTP and one from the scheduler see
//! the same state.

pub mod create;
pub mod delete;
pub mod error;
pub mod scheduler;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::content::{ContentItem, ExpirationPolicy, ReadFilter};
use crate::ledger::{PostStore, PruneJob, PruneSettings};
use crate::queue::{DeletionQueue, DrainSettings, QueueDrainJob};
use crate::storage::{BlobStore, StorageClient};

pub use create::{CreatedPost, ImageUpload, NewPost, PostCreator};
pub use delete::{DeleteOutcome, DirectDelete};
pub use error::{LifecycleError, Result};
pub use scheduler::Schedule;

#[derive(Clone)]
pub struct Lifecycle {
    pub store: Arc<PostStore>,
    pub storage: Arc<dyn BlobStore>,
    pub queue: Arc<DeletionQueue>,
    pub policy: ExpirationPolicy,
    pub read_filter: ReadFilter,
    pub prune: Arc<PruneJob>,
    pub drain: Arc<QueueDrainJob>,
    pub deleter: DirectDelete,
    pub creator: PostCreator,
}

impl Lifecycle {
    /// Open the stores and storage backends named in the configuration
    pub fn open(config: &Config) -> Result<Self> {
        let storage: Arc<dyn BlobStore> = Arc::new(StorageClient::from_config(&config.storage)?);
        let store = Arc::new(PostStore::open(&config.server.fjall_path, config.storage.bucket.clone())?);
        let queue = Arc::new(DeletionQueue::open(&config.server.queue_path)?);

        Ok(Self::from_parts(
            store,
            storage,
            queue,
            ExpirationPolicy::from_days(config.retention.post_ttl_days),
            PruneSettings::from_config(&config.sweep),
            DrainSettings::from_config(&config.sweep),
        ))
    }

    pub fn from_parts(
        store: Arc<PostStore>,
        storage: Arc<dyn BlobStore>,
        queue: Arc<DeletionQueue>,
        policy: ExpirationPolicy,
        prune_settings: PruneSettings,
        drain_settings: DrainSettings,
    ) -> Self {
        let prune = Arc::new(PruneJob::new(
            store.clone(),
            storage.clone(),
            queue.clone(),
            policy,
            prune_settings,
        ));
        let drain = Arc::new(QueueDrainJob::new(queue.clone(), storage.clone(), drain_settings));
        let deleter = DirectDelete::new(store.clone(), storage.clone(), queue.clone());
        let creator = PostCreator::new(store.clone(), storage.clone(), queue.clone(), policy);

        Self {
            store,
            storage,
            queue,
            policy,
            read_filter: ReadFilter::new(policy),
            prune,
            drain,
            deleter,
            creator,
        }
    }

    /// Live posts matching the filters
    pub fn list_live(
        &self,
        owner_id: Option<&str>,
        category: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ContentItem>> {
        let items = self.store.list(owner_id, category)?;
        Ok(self.read_filter.apply(items, now))
    }

    /// One live post; expired posts are reported as missing
    pub fn get_live(&self, post_id: &str, now: DateTime<Utc>) -> Result<ContentItem> {
        self.store
            .get(post_id)?
            .and_then(|item| self.read_filter.check(item, now))
            .ok_or_else(|| LifecycleError::NotFound(post_id.to_string()))
    }
}
