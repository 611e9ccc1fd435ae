use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::ledger::PostStore;
use crate::queue::DeletionQueue;
use crate::storage::{BlobStore, remove_best_effort};

use super::error::{LifecycleError, Result};

/// What a direct delete did with the post's objects
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub removed_objects: usize,
    /// Refs whose removal failed and went to the deletion queue instead
    pub queued_objects: usize,
}

/// Owner-initiated delete of a single post.
///
/// Unlike the prune job, a storage failure here never blocks the row
/// delete: the failed refs are handed to the deletion queue (or, if even
/// that fails, logged and left as orphans).
#[derive(Clone)]
pub struct DirectDelete {
    store: Arc<PostStore>,
    storage: Arc<dyn BlobStore>,
    queue: Arc<DeletionQueue>,
}

impl DirectDelete {
    pub fn new(store: Arc<PostStore>, storage: Arc<dyn BlobStore>, queue: Arc<DeletionQueue>) -> Self {
        Self { store, storage, queue }
    }

    pub async fn delete(&self, post_id: &str, principal: &str) -> Result<DeleteOutcome> {
        let item = self
            .store
            .get(post_id)?
            .ok_or_else(|| LifecycleError::NotFound(post_id.to_string()))?;

        if item.owner_id != principal {
            warn!(post_id, principal, "Rejected delete from non-owner");
            return Err(LifecycleError::Forbidden {
                post_id: post_id.to_string(),
                principal: principal.to_string(),
            });
        }

        let (removed_objects, failed) = remove_best_effort(self.storage.as_ref(), &item.object_refs).await;

        let queued_objects = if failed.is_empty() {
            0
        } else {
            match self.queue.enqueue_many(&failed) {
                Ok(ids) => ids.len(),
                Err(e) => {
                    warn!(post_id, count = failed.len(), error = %e, "Could not queue failed removals, objects orphaned");
                    0
                }
            }
        };

        // A concurrent prune may have taken the row in the meantime
        if !self.store.delete(post_id)? {
            return Err(LifecycleError::NotFound(post_id.to_string()));
        }

        info!(post_id, removed_objects, queued_objects, "Post deleted by owner");
        Ok(DeleteOutcome {
            removed_objects,
            queued_objects,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentItem, ObjectRef};
    use crate::storage::{FaultyStorage, StorageClient};
    use chrono::Utc;
    use tempfile::TempDir;

    const NS: &str = "post-images";

    struct Fixture {
        store: Arc<PostStore>,
        storage: Arc<FaultyStorage>,
        queue: Arc<DeletionQueue>,
        op: DirectDelete,
        _temp: TempDir,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(PostStore::open(temp.path().join("posts"), NS).unwrap());
        let queue = Arc::new(DeletionQueue::open(temp.path().join("queue")).unwrap());
        let inner: Arc<dyn BlobStore> = Arc::new(StorageClient::in_memory(NS, &[]));
        let storage = Arc::new(FaultyStorage::new(inner));
        let op = DirectDelete::new(store.clone(), storage.clone(), queue.clone());
        Fixture {
            store,
            storage,
            queue,
            op,
            _temp: temp,
        }
    }

    async fn seed(f: &Fixture, id: &str, owner: &str) -> ContentItem {
        let object_refs = vec![
            ObjectRef::new(NS, format!("posts/{id}/0-a.jpg")),
            ObjectRef::new(NS, format!("posts/{id}/1-b.jpg")),
        ];
        for object in &object_refs {
            f.storage.put(object, vec![7; 8]).await.unwrap();
        }
        let item = ContentItem {
            id: id.to_string(),
            owner_id: owner.to_string(),
            title: "Bike for sale".to_string(),
            body: String::new(),
            category: None,
            created_at: Utc::now(),
            expires_at: None,
            object_refs,
        };
        f.store.insert(&item).unwrap();
        item
    }

    #[tokio::test]
    async fn test_owner_delete_removes_row_and_objects() {
        let f = fixture();
        let item = seed(&f, "p1", "alice").await;

        let outcome = f.op.delete("p1", "alice").await.unwrap();
        assert_eq!(outcome.removed_objects, 2);
        assert_eq!(outcome.queued_objects, 0);
        assert!(f.store.get("p1").unwrap().is_none());
        for object in &item.object_refs {
            assert!(!f.storage.exists(object).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_non_owner_is_forbidden_and_nothing_changes() {
        let f = fixture();
        let item = seed(&f, "p1", "alice").await;

        let err = f.op.delete("p1", "mallory").await.unwrap_err();
        assert!(matches!(err, LifecycleError::Forbidden { .. }));
        assert!(f.store.get("p1").unwrap().is_some());
        assert!(f.storage.exists(&item.object_refs[0]).await.unwrap());
        assert_eq!(f.storage.remove_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_post_is_not_found() {
        let f = fixture();
        let err = f.op.delete("ghost", "alice").await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_storage_failure_still_deletes_row_and_queues_refs() {
        let f = fixture();
        let item = seed(&f, "p1", "alice").await;
        f.storage.fail_namespace(NS);

        let outcome = f.op.delete("p1", "alice").await.unwrap();
        assert_eq!(outcome.removed_objects, 0);
        assert_eq!(outcome.queued_objects, 2);
        assert!(f.store.get("p1").unwrap().is_none());

        let queued: Vec<ObjectRef> = f
            .queue
            .fetch_page(None, 10)
            .unwrap()
            .iter()
            .map(|e| e.object_ref())
            .collect();
        assert_eq!(queued, item.object_refs);
    }

    #[tokio::test]
    async fn test_second_delete_is_not_found() {
        let f = fixture();
        seed(&f, "p1", "alice").await;

        f.op.delete("p1", "alice").await.unwrap();
        let err = f.op.delete("p1", "alice").await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));
    }
}
