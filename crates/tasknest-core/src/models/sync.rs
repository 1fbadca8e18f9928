//! Sync bookkeeping models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The kinds of records the engine reconciles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    List,
    Task,
}

impl EntityType {
    /// Name of the local and remote table backing this entity
    pub const fn table(self) -> &'static str {
        match self {
            Self::List => "lists",
            Self::Task => "tasks",
        }
    }

    /// Resolve an entity from its table name
    pub fn from_table(table: &str) -> Option<Self> {
        match table {
            "lists" => Some(Self::List),
            "tasks" => Some(Self::Task),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => f.write_str("list"),
            Self::Task => f.write_str("task"),
        }
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "list" | "lists" => Ok(Self::List),
            "task" | "tasks" => Ok(Self::Task),
            other => Err(format!("unknown entity type '{other}'")),
        }
    }
}

/// Persisted sync cursor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    /// Completion time of the last fully successful pass
    pub last_sync: Option<DateTime<Utc>>,
}

/// A divergence between local and remote edits of the same record.
///
/// Derived during reconciliation and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    #[serde(rename = "type")]
    pub entity: EntityType,
    pub record_id: String,
    /// Local record at detection time
    pub local: Value,
    /// Remote record at detection time
    pub remote: Value,
    /// Comparable fields edited on both sides to different values
    pub conflict_fields: Vec<String>,
}
