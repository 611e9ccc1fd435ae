//! Liveness rules for content items
//!
//! An item is alive strictly before its effective expiry. The effective
//! expiry is the explicit `expires_at` when present and `created_at + TTL`
//! otherwise. [`ReadFilter`] applies the same rule to everything handed to a
//! client, so expired items disappear the moment they expire even when the
//! prune job has not caught up yet.

use chrono::{DateTime, Duration, Utc};

use super::model::ContentItem;

/// Time-to-live applied when a post carries no explicit expiry
pub const DEFAULT_TTL_DAYS: u32 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    ttl: Duration,
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self::from_days(DEFAULT_TTL_DAYS)
    }
}

impl ExpirationPolicy {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn from_days(days: u32) -> Self {
        Self::new(Duration::days(i64::from(days)))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Expiry stamped on newly created posts
    pub fn expiry_for(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        created_at + self.ttl
    }

    /// Posts without an explicit expiry created at or before this instant are dead
    pub fn implicit_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.ttl
    }

    pub fn effective_expiry(&self, item: &ContentItem) -> DateTime<Utc> {
        item.expires_at
            .unwrap_or_else(|| self.expiry_for(item.created_at))
    }

    pub fn is_alive(&self, item: &ContentItem, now: DateTime<Utc>) -> bool {
        self.effective_expiry(item) > now
    }
}

/// Read-time liveness check. Must run on every client-facing read.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadFilter {
    policy: ExpirationPolicy,
}

impl ReadFilter {
    pub fn new(policy: ExpirationPolicy) -> Self {
        Self { policy }
    }

    pub fn apply(&self, items: Vec<ContentItem>, now: DateTime<Utc>) -> Vec<ContentItem> {
        let before = items.len();
        let alive: Vec<ContentItem> = items
            .into_iter()
            .filter(|item| self.policy.is_alive(item, now))
            .collect();

        if alive.len() != before {
            tracing::debug!(hidden = before - alive.len(), "Read filter hid expired posts");
        }
        alive
    }

    pub fn check(&self, item: ContentItem, now: DateTime<Utc>) -> Option<ContentItem> {
        self.policy.is_alive(&item, now).then_some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(created_at: DateTime<Utc>, expires_at: Option<DateTime<Utc>>) -> ContentItem {
        ContentItem {
            id: "p1".to_string(),
            owner_id: "alice".to_string(),
            title: String::new(),
            body: String::new(),
            category: None,
            created_at,
            expires_at,
            object_refs: Vec::new(),
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_explicit_expiry_wins() {
        let policy = ExpirationPolicy::default();
        let explicit = t0() + Duration::hours(1);
        let post = item(t0(), Some(explicit));

        assert_eq!(policy.effective_expiry(&post), explicit);
        assert!(policy.is_alive(&post, explicit - Duration::seconds(1)));
        assert!(!policy.is_alive(&post, explicit));
    }

    #[test]
    fn test_implicit_ttl_threshold() {
        let policy = ExpirationPolicy::default();
        let post = item(t0(), None);
        let ttl = Duration::days(i64::from(DEFAULT_TTL_DAYS));

        assert!(policy.is_alive(&post, t0() + ttl - Duration::seconds(1)));
        assert!(!policy.is_alive(&post, t0() + ttl));
        assert!(!policy.is_alive(&post, t0() + ttl + Duration::seconds(1)));
    }

    #[test]
    fn test_single_threshold_crossing() {
        let policy = ExpirationPolicy::from_days(1);
        let post = item(t0(), None);
        let expiry = policy.effective_expiry(&post);

        let mut was_alive = true;
        for minutes in (0..=3 * 24 * 60).step_by(17) {
            let now = t0() + Duration::minutes(minutes);
            let alive = policy.is_alive(&post, now);
            assert_eq!(alive, now < expiry);
            assert!(was_alive || !alive, "came back to life at {now}");
            was_alive = alive;
        }
    }

    #[test]
    fn test_implicit_cutoff_matches_is_alive() {
        let policy = ExpirationPolicy::default();
        let now = t0() + Duration::days(20);
        let cutoff = policy.implicit_cutoff(now);

        assert!(!policy.is_alive(&item(cutoff, None), now));
        assert!(policy.is_alive(&item(cutoff + Duration::milliseconds(1), None), now));
    }

    #[test]
    fn test_read_filter_drops_dead_items() {
        let filter = ReadFilter::default();
        let now = t0() + Duration::days(15);

        let mut fresh = item(t0() + Duration::days(10), None);
        fresh.id = "fresh".to_string();
        let mut stale = item(t0(), None);
        stale.id = "stale".to_string();
        let mut pinned = item(t0(), Some(now + Duration::days(1)));
        pinned.id = "pinned".to_string();

        let visible = filter.apply(vec![fresh, stale, pinned], now);
        let ids: Vec<_> = visible.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["fresh", "pinned"]);

        assert!(filter.check(item(t0(), None), now).is_none());
    }
}
