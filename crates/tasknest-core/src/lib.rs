//! tasknest-core - Core library for TaskNest
//!
//! This crate contains the offline-first machinery shared by the CLI and the
//! gateway process: the cached models, the libSQL-backed local store with its
//! operation queue, the remote client, the reconciling sync engine, the
//! status/event channel and the network-boundary cache gateway.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod gateway;
pub mod models;
pub mod remote;
pub mod services;
pub mod sync;
pub mod util;

pub use config::{ConfigError, GatewayConfig, RemoteConfig};
pub use error::{Error, Result};
pub use events::{Event, EventChannel, Subscription};
pub use models::{
    Conflict, EntityType, List, ListId, Operation, OperationKind, Priority, SyncMetadata, Task,
    TaskId,
};
pub use remote::{RemoteError, RemoteStore, RestRemoteStore};
pub use services::LocalStore;
pub use sync::{
    ConflictResolution, SyncEngine, SyncError, SyncOutcome, SyncResult, SyncStatus,
};
