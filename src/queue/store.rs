use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::content::ObjectRef;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;

const NEXT_SEQ_KEY: &[u8] = b"next_seq";

/// One pending object removal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionQueueEntry {
    pub id: u64,
    pub namespace: String,
    pub path: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub enqueued_at: DateTime<Utc>,
}

impl DeletionQueueEntry {
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.namespace.clone(), self.path.clone())
    }
}

/// Durable, append-only queue of object removals backed by Fjall
///
/// Architecture:
/// - `entries` partition: u64 (big-endian) → DeletionQueueEntry (JSON)
/// - `metadata` partition: "next_seq" → u64 (big-endian counter)
///
/// Big-endian keys make partition order equal id order, so paging is a
/// plain range scan. Entries are only ever removed through
/// [`DeletionQueue::acknowledge`], which the drain job calls after the
/// objects are confirmed gone.
pub struct DeletionQueue {
    keyspace: Keyspace,
    entries: PartitionHandle,
    metadata: PartitionHandle,
    seq_counter: Arc<AtomicU64>,
}

impl DeletionQueue {
    /// Open or create a deletion queue at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening deletion queue at: {}", path.as_ref().display());

        let keyspace = Config::new(path).open()?;

        let entries = keyspace.open_partition("entries", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        // Load the current sequence counter from metadata
        let stored_seq = metadata
            .get(NEXT_SEQ_KEY)?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0);

        // Concurrent enqueues may commit out of id order, leaving the stored
        // counter behind the newest entry; never hand out an id still in use
        let after_last = entries
            .last_key_value()?
            .and_then(|(key, _)| <[u8; 8]>::try_from(key.as_ref()).ok())
            .map(|bytes| u64::from_be_bytes(bytes).saturating_add(1))
            .unwrap_or(0);
        let current_seq = stored_seq.max(after_last);

        info!("Deletion queue opened, next id: {}", current_seq);

        Ok(Self {
            keyspace,
            entries,
            metadata,
            seq_counter: Arc::new(AtomicU64::new(current_seq)),
        })
    }

    /// Append one removal and return its id.
    ///
    /// Enqueueing the same object twice is fine: removal is idempotent and
    /// the drain job acknowledges both rows.
    pub fn enqueue(&self, namespace: &str, path: &str) -> Result<u64> {
        let id = self.seq_counter.fetch_add(1, Ordering::SeqCst);
        let entry = DeletionQueueEntry {
            id,
            namespace: namespace.to_string(),
            path: path.to_string(),
            enqueued_at: Utc::now(),
        };

        // Entry and counter land together so a crash cannot reuse an id
        let mut batch = self.keyspace.batch();
        batch.insert(&self.entries, id.to_be_bytes().to_vec(), serde_json::to_vec(&entry)?);
        batch.insert(&self.metadata, NEXT_SEQ_KEY, (id + 1).to_be_bytes().to_vec());
        batch.commit()?;

        debug!(id, namespace, path, "Object queued for removal");
        Ok(id)
    }

    /// Enqueue several objects in one atomic batch
    pub fn enqueue_many(&self, objects: &[ObjectRef]) -> Result<Vec<u64>> {
        if objects.is_empty() {
            return Ok(Vec::new());
        }

        let first = self
            .seq_counter
            .fetch_add(objects.len() as u64, Ordering::SeqCst);
        let now = Utc::now();

        let mut ids = Vec::with_capacity(objects.len());
        let mut batch = self.keyspace.batch();
        for (offset, object) in objects.iter().enumerate() {
            let id = first + offset as u64;
            let entry = DeletionQueueEntry {
                id,
                namespace: object.namespace.clone(),
                path: object.path.clone(),
                enqueued_at: now,
            };
            batch.insert(&self.entries, id.to_be_bytes().to_vec(), serde_json::to_vec(&entry)?);
            ids.push(id);
        }
        batch.insert(
            &self.metadata,
            NEXT_SEQ_KEY,
            (first + objects.len() as u64).to_be_bytes().to_vec(),
        );
        batch.commit()?;

        debug!(count = ids.len(), first_id = first, "Objects queued for removal");
        Ok(ids)
    }

    /// Up to `limit` entries in id order, starting after `after` (or from the head)
    pub fn fetch_page(&self, after: Option<u64>, limit: usize) -> Result<Vec<DeletionQueueEntry>> {
        let start = match after {
            Some(id) => match id.checked_add(1) {
                Some(next) => next,
                None => return Ok(Vec::new()),
            },
            None => 0,
        };

        let mut page = Vec::new();
        for item in self.entries.range(start.to_be_bytes()..).take(limit) {
            let (_, value) = item?;
            page.push(serde_json::from_slice(&value)?);
        }
        Ok(page)
    }

    /// Delete entries whose objects are confirmed removed
    pub fn acknowledge(&self, ids: &[u64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut batch = self.keyspace.batch();
        for id in ids {
            batch.remove(&self.entries, id.to_be_bytes().to_vec());
        }
        batch.commit()?;

        debug!(count = ids.len(), "Queue entries acknowledged");
        Ok(ids.len())
    }

    /// Number of pending entries
    pub fn len(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.entries.iter() {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.entries.is_empty()?)
    }

    /// Id the next enqueued entry will get
    pub fn next_id(&self) -> u64 {
        self.seq_counter.load(Ordering::SeqCst)
    }

    /// Flush all writes to disk
    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Health check - verify database is accessible
    pub fn health_check(&self) -> Result<()> {
        let _ = self.metadata.get(NEXT_SEQ_KEY)?;
        Ok(())
    }
}
