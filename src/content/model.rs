//! Content items as the rest of the crate sees them, plus the stored record
//! shape they are decoded from.
//!
//! Rows in the `posts` partition have accumulated a few image layouts over
//! time: a legacy single `image` field, `images` entries that are bare paths
//! in the default namespace, and `images` entries that carry a full
//! namespace + path. [`PostRecord::into_item`] folds all of them into one
//! ordered `object_refs` list, so nothing past the store boundary has to care.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Location of a binary object owned by a single content item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: String,
    pub path: String,
}

impl ObjectRef {
    pub fn new(namespace: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.path)
    }
}

/// A post as surfaced to the lifecycle core and the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub body: String,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub object_refs: Vec<ObjectRef>,
}

/// Image reference as it may appear in a stored row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredImage {
    /// Path inside the default namespace
    Path(String),
    Ref { namespace: String, path: String },
}

impl StoredImage {
    fn into_ref(self, default_namespace: &str) -> ObjectRef {
        match self {
            StoredImage::Path(path) => ObjectRef::new(default_namespace, path),
            StoredImage::Ref { namespace, path } => ObjectRef::new(namespace, path),
        }
    }
}

/// Row layout of the `posts` partition (JSON)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: String,
    pub owner_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<StoredImage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<StoredImage>,
}

impl PostRecord {
    /// Canonical record for an item; always writes full refs into `images`
    pub fn from_item(item: &ContentItem) -> Self {
        Self {
            id: item.id.clone(),
            owner_id: item.owner_id.clone(),
            title: item.title.clone(),
            body: item.body.clone(),
            category: item.category.clone(),
            created_at: item.created_at,
            expires_at: item.expires_at,
            image: None,
            images: item
                .object_refs
                .iter()
                .map(|r| StoredImage::Ref {
                    namespace: r.namespace.clone(),
                    path: r.path.clone(),
                })
                .collect(),
        }
    }

    /// Normalize into a [`ContentItem`]. The legacy `image` comes first;
    /// repeated references collapse to their first occurrence.
    pub fn into_item(self, default_namespace: &str) -> ContentItem {
        let mut object_refs: Vec<ObjectRef> = Vec::with_capacity(self.images.len() + 1);
        for image in self.image.into_iter().chain(self.images) {
            let object_ref = image.into_ref(default_namespace);
            if !object_refs.contains(&object_ref) {
                object_refs.push(object_ref);
            }
        }

        ContentItem {
            id: self.id,
            owner_id: self.owner_id,
            title: self.title,
            body: self.body,
            category: self.category,
            created_at: self.created_at,
            expires_at: self.expires_at,
            object_refs,
        }
    }
}
