pub mod model;
pub mod policy;

pub use model::{ContentItem, ObjectRef, PostRecord, StoredImage};
pub use policy::{DEFAULT_TTL_DAYS, ExpirationPolicy, ReadFilter};
