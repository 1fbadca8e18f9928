//! Data models for TaskNest

mod entity;
mod list;
mod operation;
mod sync;
mod task;

pub use entity::{CachedRecord, SyncEntity};
pub use list::{List, ListId};
pub use operation::{Operation, OperationId, OperationKind, QueuedRequest};
pub use sync::{Conflict, EntityType, SyncMetadata};
pub use task::{Priority, Task, TaskId};
