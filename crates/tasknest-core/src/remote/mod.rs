//! Client side of the authoritative remote store.
//!
//! The remote is a tabular service scoped by owning user. The sync engine only
//! talks to it through [`RemoteStore`], so tests and alternative transports
//! can stand in for the PostgREST client.

use std::future::Future;

use serde_json::Value;
use thiserror::Error;

mod rest;

#[cfg(test)]
pub(crate) mod fake;

pub use rest::RestRemoteStore;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Remote request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Per-table access to the remote store.
///
/// Rows travel as JSON objects in the remote's column layout, which matches
/// the serialized form of the cached models.
pub trait RemoteStore: Send + Sync + 'static {
    /// Every row of `table` owned by `user_id`.
    fn select(
        &self,
        table: &str,
        user_id: &str,
    ) -> impl Future<Output = RemoteResult<Vec<Value>>> + Send;

    /// Insert a row, returning the stored representation when the remote
    /// sends one back.
    fn insert(
        &self,
        table: &str,
        row: &Value,
    ) -> impl Future<Output = RemoteResult<Option<Value>>> + Send;

    /// Apply `changes` to the row with the given id, restricted to rows of
    /// `user_id` when one is given.
    ///
    /// An update that matches no row fails with a 404 [`RemoteError::Api`].
    fn update(
        &self,
        table: &str,
        id: &str,
        user_id: Option<&str>,
        changes: &Value,
    ) -> impl Future<Output = RemoteResult<Option<Value>>> + Send;

    /// Delete the row with the given id, restricted to rows of `user_id`
    /// when one is given. Deleting a missing row succeeds.
    fn delete(
        &self,
        table: &str,
        id: &str,
        user_id: Option<&str>,
    ) -> impl Future<Output = RemoteResult<()>> + Send;
}
