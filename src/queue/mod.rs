pub mod drain;
pub mod store;

pub use drain::{DrainReport, DrainSettings, QueueDrainJob};
pub use store::{DeletionQueue, DeletionQueueEntry, QueueError};
