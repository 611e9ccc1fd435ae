/// Fjall-based table of record for posts
///
/// The `posts` partition holds one JSON row per post; the `expiry`
/// partition indexes every post by the instant it becomes prunable, split by
/// whether the post carries an explicit expiry or relies on the TTL. The
/// prune job walks that index instead of scanning every row.
///
/// ## Usage
///
/// ```rust,ignore
/// use sweepbox::ledger::PostStore;
///
/// let store = PostStore::open("data/posts", "post-images")?;
/// store.insert(&item)?;
/// let item = store.get("0192...")?;
/// ```

pub mod error;
pub mod partitions;
pub mod pruning;
pub mod store;

pub use error::{LedgerError, Result};
pub use pruning::{PruneJob, PruneReport, PruneSettings};
pub use store::{PostStore, StoreStats};
