//! Bidirectional reconciliation between the local store and the remote store.

mod diff;
mod engine;

pub use diff::{changed_fields, reconcile, Decision};
pub use engine::SyncEngine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::Conflict;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Another pass is running on this engine
    #[error("A sync pass is already in progress")]
    InProgress,
    #[error(transparent)]
    Store(#[from] crate::Error),
}

/// Aggregate result of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// False only when the pass aborted before draining the queue
    pub success: bool,
    /// Records reconciled plus operations applied
    pub synced: usize,
    /// Operations whose remote application failed
    pub failed: usize,
    pub conflicts: Vec<Conflict>,
    pub errors: Vec<String>,
}

impl SyncResult {
    pub fn outcome(&self) -> SyncOutcome {
        if !self.success {
            SyncOutcome::Failed
        } else if self.conflicts.is_empty() {
            SyncOutcome::Success
        } else {
            SyncOutcome::SuccessWithConflicts
        }
    }
}

/// What a status indicator shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    InProgress,
    Success,
    SuccessWithConflicts,
    Failed,
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::InProgress => "in progress",
            Self::Success => "success",
            Self::SuccessWithConflicts => "success with conflicts",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub last_sync: Option<DateTime<Utc>>,
    pub pending_operations: usize,
    pub has_conflicts: bool,
}

/// How the caller settles a reported conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Keep the local values; queued operations already carry them
    KeepLocal,
    /// Adopt the remote snapshot and queue it so it wins after replay
    KeepRemote,
    /// Apply the given comparable-field values locally and queue them
    Merge(Map<String, Value>),
}
