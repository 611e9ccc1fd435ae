use std::collections::HashSet;
use std::path::Path;
#[cfg(test)]
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info, warn};

use crate::content::{ContentItem, ExpirationPolicy, PostRecord};

use super::error::{LedgerError, Result};
use super::partitions::{
    EXPIRY_PREFIX, TTL_PREFIX, decode_index_key, decode_post_key, encode_index_key_for,
    encode_index_upper_bound, encode_meta_key, encode_post_key,
};

const META_LAST_PRUNE: &str = "last_prune";

/// Fjall-backed table of record for posts and their expiry index
#[derive(Clone)]
pub struct PostStore {
    keyspace: Keyspace,
    posts: PartitionHandle,
    expiry: PartitionHandle,
    metadata: PartitionHandle,
    default_namespace: String,
    #[cfg(test)]
    fail_next_delete: Arc<AtomicBool>,
}

impl PostStore {
    /// Open or create a post store at the given path.
    ///
    /// `default_namespace` resolves image rows that only carry a path.
    pub fn open<P: AsRef<Path>>(path: P, default_namespace: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening post store at: {}", path.display());

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let posts = keyspace.open_partition("posts", PartitionCreateOptions::default())?;
        let expiry = keyspace.open_partition("expiry", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        info!("Post store opened successfully");
        Ok(Self {
            keyspace,
            posts,
            expiry,
            metadata,
            default_namespace: default_namespace.into(),
            #[cfg(test)]
            fail_next_delete: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    /// Insert a new post together with its expiry index entry
    pub fn insert(&self, item: &ContentItem) -> Result<()> {
        let key = encode_post_key(&item.id);
        if self.posts.contains_key(&key)? {
            return Err(LedgerError::DuplicatePost(item.id.clone()));
        }

        let value = serde_json::to_vec(&PostRecord::from_item(item))?;
        let mut batch = self.keyspace.batch();
        batch.insert(&self.posts, key, value);
        batch.insert(&self.expiry, encode_index_key_for(item), Vec::<u8>::new());
        batch.commit()?;

        debug!(post_id = %item.id, objects = item.object_refs.len(), "Inserted post");
        Ok(())
    }

    /// Get a post by ID, regardless of liveness
    pub fn get(&self, post_id: &str) -> Result<Option<ContentItem>> {
        match self.posts.get(encode_post_key(post_id))? {
            Some(value) => Ok(Some(self.decode(&value)?)),
            None => Ok(None),
        }
    }

    /// All stored posts matching the optional filters, dead ones included.
    /// Callers surfacing results to clients must run them through the read filter.
    ///
    /// Rows that fail to decode are logged and skipped.
    pub fn list(&self, owner_id: Option<&str>, category: Option<&str>) -> Result<Vec<ContentItem>> {
        let mut items = Vec::new();
        for entry in self.posts.iter() {
            let (key, value) = entry?;
            let item = match self.decode(&value) {
                Ok(item) => item,
                Err(e) => {
                    let post_id = decode_post_key(&key).unwrap_or_default();
                    warn!(post_id = %post_id, error = %e, "Skipping undecodable post row");
                    continue;
                }
            };

            if owner_id.is_some_and(|owner| owner != item.owner_id) {
                continue;
            }
            if category.is_some_and(|c| item.category.as_deref() != Some(c)) {
                continue;
            }
            items.push(item);
        }
        Ok(items)
    }

    /// Up to `limit` posts that are dead at `now`.
    ///
    /// Two index scans: posts whose explicit expiry is at or before `now`,
    /// then posts without one created at or before `now - TTL`. Ids in
    /// `exclude` are skipped without counting against the limit. Rows that
    /// fail to decode are logged and skipped. Index entries whose row is gone
    /// are dropped, except on a dry run, which only logs them.
    pub fn expired_candidates(
        &self,
        now: DateTime<Utc>,
        policy: &ExpirationPolicy,
        limit: usize,
        exclude: &HashSet<String>,
        dry_run: bool,
    ) -> Result<Vec<ContentItem>> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        let scans = [
            (EXPIRY_PREFIX, now),
            (TTL_PREFIX, policy.implicit_cutoff(now)),
        ];

        for (prefix, due_at) in scans {
            if candidates.len() >= limit {
                break;
            }

            let start = prefix.as_bytes().to_vec();
            let end = encode_index_upper_bound(prefix, due_at);

            for entry in self.expiry.range(start..end) {
                let (key, _) = entry?;
                let (_, post_id) = decode_index_key(&key)
                    .ok_or_else(|| LedgerError::InvalidKey(String::from_utf8_lossy(&key).into()))?;

                if exclude.contains(&post_id) || !seen.insert(post_id.clone()) {
                    continue;
                }

                let Some(value) = self.posts.get(encode_post_key(&post_id))? else {
                    // Row is gone but its index entry survived
                    if dry_run {
                        warn!(post_id = %post_id, "Found stale expiry index entry");
                    } else {
                        warn!(post_id = %post_id, "Removing stale expiry index entry");
                        self.expiry.remove(key)?;
                    }
                    continue;
                };

                match self.decode(&value) {
                    Ok(item) => candidates.push(item),
                    Err(e) => {
                        warn!(post_id = %post_id, error = %e, "Skipping undecodable expired post");
                        continue;
                    }
                }

                if candidates.len() >= limit {
                    break;
                }
            }
        }

        debug!(count = candidates.len(), limit, "Collected expired candidates");
        Ok(candidates)
    }

    /// Delete one post and its index entry. Returns false if it was already gone.
    pub fn delete(&self, post_id: &str) -> Result<bool> {
        let Some(item) = self.get(post_id)? else {
            return Ok(false);
        };
        self.delete_many(std::slice::from_ref(&item))?;
        Ok(true)
    }

    /// Delete rows and their index entries in a single atomic batch
    pub fn delete_many(&self, items: &[ContentItem]) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }

        #[cfg(test)]
        {
            if self.fail_next_delete.swap(false, Ordering::SeqCst) {
                return Err(LedgerError::Io(std::io::Error::other("injected delete failure")));
            }
        }

        let mut batch = self.keyspace.batch();
        for item in items {
            batch.remove(&self.posts, encode_post_key(&item.id));
            batch.remove(&self.expiry, encode_index_key_for(item));
        }
        batch.commit()?;

        debug!(count = items.len(), "Deleted posts");
        Ok(items.len())
    }

    /// Remember when the last prune run finished
    pub fn record_prune(&self, at: DateTime<Utc>) -> Result<()> {
        self.metadata.insert(
            encode_meta_key(META_LAST_PRUNE),
            at.timestamp_millis().to_string().as_bytes(),
        )?;
        Ok(())
    }

    pub fn last_prune(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(bytes) = self.metadata.get(encode_meta_key(META_LAST_PRUNE))? else {
            return Ok(None);
        };
        let ms = std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| LedgerError::InvalidKey(META_LAST_PRUNE.to_string()))?;
        Ok(DateTime::from_timestamp_millis(ms))
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Get internal statistics (for debugging/monitoring)
    pub fn stats(&self) -> Result<StoreStats> {
        let mut post_count = 0;
        let mut index_count = 0;

        for item in self.posts.iter() {
            item?;
            post_count += 1;
        }

        for item in self.expiry.iter() {
            item?;
            index_count += 1;
        }

        Ok(StoreStats {
            post_count,
            index_count,
        })
    }

    fn decode(&self, value: &[u8]) -> Result<ContentItem> {
        let record: PostRecord = serde_json::from_slice(value)?;
        Ok(record.into_item(&self.default_namespace))
    }

    /// Make the next non-empty `delete_many` fail
    #[cfg(test)]
    pub(crate) fn fail_next_delete(&self) {
        self.fail_next_delete.store(true, Ordering::SeqCst);
    }

    /// Write a raw record as-is, bypassing normalization. Used to seed rows
    /// in older layouts.
    pub fn insert_record(&self, record: &PostRecord) -> Result<()> {
        let item = record.clone().into_item(&self.default_namespace);
        let mut batch = self.keyspace.batch();
        batch.insert(&self.posts, encode_post_key(&record.id), serde_json::to_vec(record)?);
        batch.insert(&self.expiry, encode_index_key_for(&item), Vec::<u8>::new());
        batch.commit()?;
        Ok(())
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub post_count: usize,
    pub index_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ObjectRef, StoredImage};
    use chrono::Duration;
    use tempfile::TempDir;

    fn create_test_store() -> (PostStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = PostStore::open(temp_dir.path().join("test_posts"), "post-images").unwrap();
        (store, temp_dir)
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn create_test_post(id: &str, created_at: DateTime<Utc>, expires_at: Option<DateTime<Utc>>) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            owner_id: "alice".to_string(),
            title: format!("title {id}"),
            body: String::new(),
            category: None,
            created_at,
            expires_at,
            object_refs: vec![ObjectRef::new("post-images", format!("posts/{id}/0.jpg"))],
        }
    }

    #[test]
    fn test_open_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = PostStore::open(temp_dir.path().join("test_posts"), "post-images");
        assert!(store.is_ok());
    }

    #[test]
    fn test_insert_and_get_post() {
        let (store, _temp) = create_test_store();
        let post = create_test_post("post_1", t0(), None);

        store.insert(&post).unwrap();
        let retrieved = store.get("post_1").unwrap().unwrap();
        assert_eq!(retrieved, post);

        assert!(store.get("nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let (store, _temp) = create_test_store();
        let post = create_test_post("post_1", t0(), None);

        store.insert(&post).unwrap();
        let err = store.insert(&post).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicatePost(id) if id == "post_1"));
    }

    #[test]
    fn test_expired_candidates_uses_both_scans() {
        let (store, _temp) = create_test_store();
        let policy = ExpirationPolicy::default();
        let now = t0() + Duration::days(15);

        // explicit expiry in the past
        store.insert(&create_test_post("explicit_dead", t0(), Some(now - Duration::hours(1)))).unwrap();
        // explicit expiry exactly now counts as dead
        store.insert(&create_test_post("explicit_edge", t0(), Some(now))).unwrap();
        // explicit expiry in the future, despite an old creation time
        store.insert(&create_test_post("explicit_alive", t0(), Some(now + Duration::hours(1)))).unwrap();
        // implicit ttl elapsed
        store.insert(&create_test_post("implicit_dead", t0(), None)).unwrap();
        // implicit ttl not yet elapsed
        store.insert(&create_test_post("implicit_alive", now - Duration::days(1), None)).unwrap();

        let mut ids: Vec<String> = store
            .expired_candidates(now, &policy, 100, &HashSet::new(), false)
            .unwrap()
            .into_iter()
            .map(|item| item.id)
            .collect();
        ids.sort();

        assert_eq!(ids, vec!["explicit_dead", "explicit_edge", "implicit_dead"]);
    }

    #[test]
    fn test_expired_candidates_respects_limit_and_exclusions() {
        let (store, _temp) = create_test_store();
        let policy = ExpirationPolicy::default();
        let now = t0() + Duration::days(30);

        for i in 0..5 {
            store
                .insert(&create_test_post(&format!("p{i}"), t0() + Duration::minutes(i), None))
                .unwrap();
        }

        let first = store.expired_candidates(now, &policy, 3, &HashSet::new(), false).unwrap();
        assert_eq!(first.len(), 3);

        let exclude: HashSet<String> = first.iter().map(|i| i.id.clone()).collect();
        let rest = store.expired_candidates(now, &policy, 3, &exclude, false).unwrap();
        assert_eq!(rest.len(), 2);
        assert!(rest.iter().all(|i| !exclude.contains(&i.id)));
    }

    #[test]
    fn test_delete_removes_row_and_index() {
        let (store, _temp) = create_test_store();
        let post = create_test_post("post_1", t0(), None);
        store.insert(&post).unwrap();

        assert!(store.delete("post_1").unwrap());
        assert!(!store.delete("post_1").unwrap());

        let stats = store.stats().unwrap();
        assert_eq!(stats.post_count, 0);
        assert_eq!(stats.index_count, 0);
    }

    #[test]
    fn test_list_filters_by_owner_and_category() {
        let (store, _temp) = create_test_store();

        let mut a = create_test_post("a", t0(), None);
        a.category = Some("events".to_string());
        let mut b = create_test_post("b", t0(), None);
        b.owner_id = "bob".to_string();
        store.insert(&a).unwrap();
        store.insert(&b).unwrap();

        assert_eq!(store.list(None, None).unwrap().len(), 2);
        assert_eq!(store.list(Some("bob"), None).unwrap()[0].id, "b");
        assert_eq!(store.list(None, Some("events")).unwrap()[0].id, "a");
        assert!(store.list(Some("bob"), Some("events")).unwrap().is_empty());
    }

    #[test]
    fn test_legacy_record_is_normalized_on_read() {
        let (store, _temp) = create_test_store();
        let record = PostRecord {
            id: "legacy".to_string(),
            owner_id: "alice".to_string(),
            title: String::new(),
            body: String::new(),
            category: None,
            created_at: t0(),
            expires_at: None,
            image: Some(StoredImage::Path("posts/legacy/cover.jpg".to_string())),
            images: Vec::new(),
        };
        store.insert_record(&record).unwrap();

        let item = store.get("legacy").unwrap().unwrap();
        assert_eq!(
            item.object_refs,
            vec![ObjectRef::new("post-images", "posts/legacy/cover.jpg")]
        );
    }

    fn insert_raw_row(store: &PostStore, id: &str, json: serde_json::Value, created_at: DateTime<Utc>) {
        store
            .posts
            .insert(encode_post_key(id), serde_json::to_vec(&json).unwrap())
            .unwrap();
        let mut index_item = create_test_post(id, created_at, None);
        index_item.object_refs.clear();
        store
            .expiry
            .insert(encode_index_key_for(&index_item), Vec::<u8>::new())
            .unwrap();
    }

    #[test]
    fn test_undecodable_row_is_skipped() {
        let (store, _temp) = create_test_store();
        let policy = ExpirationPolicy::default();
        let now = t0() + Duration::days(15);

        store.insert(&create_test_post("good", t0(), None)).unwrap();
        insert_raw_row(
            &store,
            "bad",
            serde_json::json!({
                "id": "bad",
                "owner_id": "alice",
                "title": "",
                "body": "",
                "created_at": t0().timestamp_millis(),
                "images": [{ "path": "x.jpg" }],
            }),
            t0(),
        );

        let listed: Vec<String> = store.list(None, None).unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(listed, vec!["good"]);

        let expired = store
            .expired_candidates(now, &policy, 10, &HashSet::new(), false)
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "good");
    }

    #[test]
    fn test_dry_run_keeps_stale_index_entries() {
        let (store, _temp) = create_test_store();
        let policy = ExpirationPolicy::default();
        let now = t0() + Duration::days(15);

        store.insert(&create_test_post("gone", t0(), None)).unwrap();
        store.posts.remove(encode_post_key("gone")).unwrap();

        let found = store
            .expired_candidates(now, &policy, 10, &HashSet::new(), true)
            .unwrap();
        assert!(found.is_empty());
        assert_eq!(store.stats().unwrap().index_count, 1);

        store
            .expired_candidates(now, &policy, 10, &HashSet::new(), false)
            .unwrap();
        assert_eq!(store.stats().unwrap().index_count, 0);
    }

    #[test]
    fn test_injected_delete_failure_fires_once() {
        let (store, _temp) = create_test_store();
        let post = create_test_post("post_1", t0(), None);
        store.insert(&post).unwrap();

        store.fail_next_delete();
        assert!(store.delete_many(std::slice::from_ref(&post)).is_err());
        assert!(store.get("post_1").unwrap().is_some());
        assert_eq!(store.delete_many(std::slice::from_ref(&post)).unwrap(), 1);
    }

    #[test]
    fn test_last_prune_roundtrip() {
        let (store, _temp) = create_test_store();
        assert!(store.last_prune().unwrap().is_none());

        store.record_prune(t0()).unwrap();
        assert_eq!(store.last_prune().unwrap(), Some(t0()));
        store.persist().unwrap();
    }
}
