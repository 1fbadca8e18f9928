//! Queued mutation model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::SyncEntity;

/// A unique identifier for a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What a queued operation does to its target table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    /// Map an HTTP method onto the mutation it performs.
    ///
    /// Returns `None` for methods that do not mutate.
    pub fn from_method(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "POST" => Some(Self::Create),
            "PUT" | "PATCH" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown operation kind '{other}'")),
        }
    }
}

/// An intercepted HTTP request captured while offline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// A mutation waiting to be applied to the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    /// Remote table the mutation targets
    pub table: String,
    /// Id of the targeted record, when known
    #[serde(default)]
    pub record_id: Option<String>,
    /// Owning user, when known
    #[serde(default)]
    pub user_id: Option<String>,
    /// Row values for creates, changed fields for updates
    #[serde(default)]
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Original request, for operations queued at the network boundary
    #[serde(default)]
    pub request: Option<QueuedRequest>,
}

impl Operation {
    /// Create a fresh operation with no retries
    pub fn new(kind: OperationKind, table: impl Into<String>, payload: Value) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            table: table.into(),
            record_id: None,
            user_id: None,
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
            last_error: None,
            request: None,
        }
    }

    #[must_use]
    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_request(mut self, request: QueuedRequest) -> Self {
        self.request = Some(request);
        self
    }

    /// Insert of a full record
    pub fn create<T: SyncEntity>(record: &T) -> crate::Result<Self> {
        Ok(Self::new(
            OperationKind::Create,
            T::ENTITY.table(),
            serde_json::to_value(record)?,
        )
        .with_record_id(record.record_id())
        .with_user_id(record.owner_id()))
    }

    /// Partial update carrying only the changed fields
    pub fn update<T: SyncEntity>(record: &T, changes: Map<String, Value>) -> Self {
        Self::new(
            OperationKind::Update,
            T::ENTITY.table(),
            Value::Object(changes),
        )
        .with_record_id(record.record_id())
        .with_user_id(record.owner_id())
    }

    /// Removal of a record
    pub fn delete<T: SyncEntity>(record: &T) -> Self {
        Self::new(OperationKind::Delete, T::ENTITY.table(), Value::Null)
            .with_record_id(record.record_id())
            .with_user_id(record.owner_id())
    }

    /// Whether this operation belongs to the queue drained for `user_id`.
    ///
    /// Operations without a known owner are drained by any user.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id
            .as_deref()
            .map_or(true, |owner| owner == user_id)
    }

    /// Whether this operation targets the given record
    pub fn targets(&self, table: &str, record_id: &str) -> bool {
        self.table == table && self.record_id.as_deref() == Some(record_id)
    }
}
