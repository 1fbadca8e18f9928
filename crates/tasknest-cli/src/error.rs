use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tasknest_core::Error),
    #[error(transparent)]
    Sync(#[from] tasknest_core::SyncError),
    #[error(transparent)]
    Remote(#[from] tasknest_core::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No title provided")]
    EmptyTitle,
    #[error("ID cannot be empty")]
    EmptyId,
    #[error("Nothing to change; pass at least one field")]
    NothingToEdit,
    #[error("No list or task found for id/prefix: {0}")]
    NotFound(String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Invalid due date '{0}', expected YYYY-MM-DD")]
    InvalidDueDate(String),
    #[error("{0}")]
    InvalidTarget(String),
    #[error("No user selected. Pass --user or set TASKNEST_USER_ID.")]
    MissingUser,
    #[error(
        "Sync is not configured. Set TASKNEST_REMOTE_URL and TASKNEST_REMOTE_ANON_KEY (and TASKNEST_ACCESS_TOKEN for row-level security)."
    )]
    SyncNotConfigured,
    #[error("Configuration error: {0}")]
    Config(#[from] tasknest_core::ConfigError),
    #[error("Sync timed out after {0}s")]
    SyncTimedOut(u64),
}
