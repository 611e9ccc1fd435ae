//! API models for the Sweepbox posts and operator endpoints.
//!
//! - `POST /posts` accepts a [`CreatePostRequest`] and answers with a
//!   [`PostResponse`]
//! - `GET /posts` answers with a [`ListResponse`] of live posts only
//! - `POST /operators/prune` and `POST /operators/drain` answer with the job
//!   reports from [`crate::ledger::PruneReport`] and
//!   [`crate::queue::DrainReport`]
//!
//! # Create payload
//!
//! ```json
//! {
//!   "title": "Lost cat",
//!   "body": "Grey, answers to Miso",
//!   "category": "lost-and-found",
//!   "images": [
//!     { "file_name": "miso.jpg", "content_type": "image/jpeg", "data": "/9j/4AAQ..." }
//!   ]
//! }
//! ```
//!
//! `data` is standard base64. The owner comes from the `X-Sweepbox-Principal`
//! header, never from the body.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::ContentItem;
use crate::observability::MetricsSnapshot;
use crate::storage::BlobStore;

#[derive(Debug, Deserialize, Clone)]
pub struct CreatePostRequest {
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub images: Vec<ImagePayload>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImagePayload {
    pub file_name: String,
    pub content_type: String,
    /// Base64-encoded bytes
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ImageResponse {
    pub namespace: String,
    pub path: String,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PostResponse {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub images: Vec<ImageResponse>,
}

impl PostResponse {
    /// `expires_at` is always the effective expiry, explicit or not
    pub fn from_item(item: ContentItem, expires_at: DateTime<Utc>, storage: &dyn BlobStore) -> Self {
        let images = item
            .object_refs
            .iter()
            .map(|object| ImageResponse {
                namespace: object.namespace.clone(),
                path: object.path.clone(),
                url: storage.public_url(object),
            })
            .collect();

        Self {
            id: item.id,
            owner_id: item.owner_id,
            title: item.title,
            body: item.body,
            category: item.category,
            created_at: item.created_at,
            expires_at,
            images,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ListResponse {
    pub posts: Vec<PostResponse>,
    pub count: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub owner_id: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PruneQuery {
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DeleteResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
    pub posts: Option<usize>,
    pub queued_removals: Option<usize>,
    pub last_prune: Option<DateTime<Utc>>,
    pub metrics: MetricsSnapshot,
}
