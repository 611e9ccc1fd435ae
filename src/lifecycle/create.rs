use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::content::{ContentItem, ExpirationPolicy, ObjectRef};
use crate::ledger::PostStore;
use crate::queue::DeletionQueue;
use crate::storage::{BlobStore, remove_best_effort};

use super::error::{LifecycleError, Result};

/// Decoded image bytes ready for upload
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub owner_id: String,
    pub title: String,
    pub body: String,
    pub category: Option<String>,
    pub images: Vec<ImageUpload>,
}

/// A freshly created post with the client-facing URL of every object
#[derive(Debug, Clone)]
pub struct CreatedPost {
    pub item: ContentItem,
    pub urls: Vec<String>,
}

/// Creates posts: uploads images, then writes the row with an explicit expiry
#[derive(Clone)]
pub struct PostCreator {
    store: Arc<PostStore>,
    storage: Arc<dyn BlobStore>,
    queue: Arc<DeletionQueue>,
    policy: ExpirationPolicy,
}

impl PostCreator {
    pub fn new(
        store: Arc<PostStore>,
        storage: Arc<dyn BlobStore>,
        queue: Arc<DeletionQueue>,
        policy: ExpirationPolicy,
    ) -> Self {
        Self {
            store,
            storage,
            queue,
            policy,
        }
    }

    pub async fn create(&self, post: NewPost) -> Result<CreatedPost> {
        self.create_at(post, Utc::now()).await
    }

    pub async fn create_at(&self, post: NewPost, now: DateTime<Utc>) -> Result<CreatedPost> {
        if post.owner_id.trim().is_empty() {
            return Err(LifecycleError::InvalidInput("owner is required".to_string()));
        }

        // Rows store millisecond timestamps
        let now = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        let id = Uuid::now_v7().to_string();
        let namespace = self.storage.default_namespace().to_string();

        let mut uploaded: Vec<ObjectRef> = Vec::with_capacity(post.images.len());
        for (index, image) in post.images.into_iter().enumerate() {
            let object = ObjectRef::new(
                namespace.clone(),
                format!("posts/{id}/{index}-{}", sanitize_file_name(&image.file_name)),
            );
            debug!(object = %object, content_type = %image.content_type, size = image.data.len(), "Uploading image");
            if let Err(e) = self.storage.put(&object, image.data).await {
                self.discard_uploads(&id, &uploaded).await;
                return Err(e.into());
            }
            uploaded.push(object);
        }

        let item = ContentItem {
            id: id.clone(),
            owner_id: post.owner_id,
            title: post.title,
            body: post.body,
            category: post.category,
            created_at: now,
            expires_at: Some(self.policy.expiry_for(now)),
            object_refs: uploaded,
        };

        if let Err(e) = self.store.insert(&item) {
            self.discard_uploads(&id, &item.object_refs).await;
            return Err(e.into());
        }

        let urls = item
            .object_refs
            .iter()
            .map(|object| self.storage.public_url(object))
            .collect();

        info!(post_id = %id, owner = %item.owner_id, objects = item.object_refs.len(), "Post created");
        Ok(CreatedPost { item, urls })
    }

    /// Undo uploads of a post that never got its row
    async fn discard_uploads(&self, post_id: &str, uploaded: &[ObjectRef]) {
        if uploaded.is_empty() {
            return;
        }
        let (_, failed) = remove_best_effort(self.storage.as_ref(), uploaded).await;
        if failed.is_empty() {
            return;
        }
        if let Err(e) = self.queue.enqueue_many(&failed) {
            warn!(post_id, count = failed.len(), error = %e, "Could not queue cleanup of abandoned uploads");
        }
    }
}

/// Reduce a client file name to a safe single path segment
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');

    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned.to_string()
    }
}
