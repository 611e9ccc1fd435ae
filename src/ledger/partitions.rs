/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `posts`: post:{post_id} -> PostRecord (JSON)
/// - `expiry`: exp:{expires_at_ms:020}:{post_id} -> empty (explicit expiry)
///             ttl:{created_at_ms:020}:{post_id} -> empty (no explicit expiry)
/// - `metadata`: meta:{key} -> value (string)
///
/// Timestamps are zero-padded so lexicographic order matches time order and
/// "everything due at or before T" is a single range scan per prefix.
use chrono::{DateTime, Utc};

use crate::content::ContentItem;

pub const EXPIRY_PREFIX: &str = "exp:";
pub const TTL_PREFIX: &str = "ttl:";

/// Encode a post key: post:{post_id}
pub fn encode_post_key(post_id: &str) -> Vec<u8> {
    format!("post:{}", post_id).into_bytes()
}

/// Decode a post key: post:{post_id} -> post_id
pub fn decode_post_key(key: &[u8]) -> Option<String> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix("post:").map(String::from)
}

/// Milliseconds since the epoch, clamped at zero
pub fn timestamp_ms(ts: DateTime<Utc>) -> u64 {
    u64::try_from(ts.timestamp_millis()).unwrap_or(0)
}

fn encode_index_key(prefix: &str, ms: u64, post_id: &str) -> Vec<u8> {
    format!("{}{:020}:{}", prefix, ms, post_id).into_bytes()
}

/// Index entry for a post: explicit expiry when set, creation time otherwise
pub fn encode_index_key_for(item: &ContentItem) -> Vec<u8> {
    match item.expires_at {
        Some(expires_at) => encode_index_key(EXPIRY_PREFIX, timestamp_ms(expires_at), &item.id),
        None => encode_index_key(TTL_PREFIX, timestamp_ms(item.created_at), &item.id),
    }
}

/// Exclusive upper bound covering every entry under `prefix` with a
/// timestamp at or before `ts`
pub fn encode_index_upper_bound(prefix: &str, ts: DateTime<Utc>) -> Vec<u8> {
    format!("{}{:020}:", prefix, timestamp_ms(ts).saturating_add(1)).into_bytes()
}

/// Decode an index key: {prefix}{ms:020}:{post_id} -> (ms, post_id)
pub fn decode_index_key(key: &[u8]) -> Option<(u64, String)> {
    let key_str = std::str::from_utf8(key).ok()?;
    let rest = key_str
        .strip_prefix(EXPIRY_PREFIX)
        .or_else(|| key_str.strip_prefix(TTL_PREFIX))?;
    let (ms, post_id) = rest.split_once(':')?;
    if post_id.is_empty() {
        return None;
    }
    Some((ms.parse().ok()?, post_id.to_string()))
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(expires_at: Option<DateTime<Utc>>) -> ContentItem {
        ContentItem {
            id: "post_123".to_string(),
            owner_id: "alice".to_string(),
            title: String::new(),
            body: String::new(),
            category: None,
            created_at: DateTime::from_timestamp_millis(42).unwrap(),
            expires_at,
            object_refs: Vec::new(),
        }
    }

    #[test]
    fn test_post_key_encoding() {
        let key = encode_post_key("post_123");
        assert_eq!(key, b"post:post_123");
        assert_eq!(decode_post_key(&key).unwrap(), "post_123");
    }

    #[test]
    fn test_index_key_without_expiry_uses_created_at() {
        let key = encode_index_key_for(&post(None));
        assert_eq!(key, b"ttl:00000000000000000042:post_123");

        let (ms, post_id) = decode_index_key(&key).unwrap();
        assert_eq!(ms, 42);
        assert_eq!(post_id, "post_123");
    }

    #[test]
    fn test_index_key_with_expiry() {
        let expires_at = DateTime::from_timestamp_millis(1_000).unwrap();
        let key = encode_index_key_for(&post(Some(expires_at)));
        assert_eq!(key, b"exp:00000000000000001000:post_123");
    }

    #[test]
    fn test_upper_bound_is_inclusive_of_timestamp() {
        let ts = DateTime::from_timestamp_millis(1_000).unwrap();
        let bound = encode_index_upper_bound(EXPIRY_PREFIX, ts);

        let due = encode_index_key(EXPIRY_PREFIX, 1_000, "a");
        let later = encode_index_key(EXPIRY_PREFIX, 1_001, "a");
        assert!(due < bound);
        assert!(later >= bound);
    }

    #[test]
    fn test_decode_rejects_foreign_keys() {
        assert!(decode_index_key(b"post:abc").is_none());
        assert!(decode_index_key(b"exp:notanumber:abc").is_none());
        assert!(decode_index_key(b"exp:00000000000000000001:").is_none());
    }

    #[test]
    fn test_meta_key_encoding() {
        let key = encode_meta_key("last_prune");
        assert_eq!(key, b"meta:last_prune");
    }
}
