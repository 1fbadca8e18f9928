//! Network-boundary cache gateway.
//!
//! Sits between the application and the network, classifies every request,
//! answers it from versioned caches or the upstream origin, and queues API
//! mutations into the local store while offline.

mod cache;
mod host;
mod http;
mod message;
mod policy;
mod upstream;

pub use cache::{CacheStorage, LibSqlCacheStorage};
pub use host::{GatewayHost, LifecycleState};
pub use http::{GatewayRequest, GatewayResponse, CACHE_STATUS_HEADER};
pub use message::{GatewayMessage, MessageReply};
pub use policy::{allowed_caches, api_cache, classify, pages_cache, static_cache, RequestClass};
pub use upstream::{HttpUpstream, Upstream};

use thiserror::Error;

/// Tag of the background-sync registration that drains the queue.
pub const SYNC_TAG: &str = "sync-offline-operations";

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The upstream could not be reached at all
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Install of {version} failed: {reason}")]
    InstallFailed { version: String, reason: String },
    #[error(transparent)]
    Store(#[from] crate::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
