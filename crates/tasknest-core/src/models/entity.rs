//! Shared behaviour of records that take part in reconciliation

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::EntityType;
use crate::error::{Error, Result};

/// A record type that is cached locally and reconciled with the remote store.
pub trait SyncEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Entity kind, which also names the backing table
    const ENTITY: EntityType;

    /// Business fields compared during reconciliation.
    ///
    /// Timestamps and ownership ids are never part of this set.
    const COMPARABLE_FIELDS: &'static [&'static str];

    /// Stable identifier shared with the remote store
    fn record_id(&self) -> String;

    /// Owning user id
    fn owner_id(&self) -> &str;

    /// Remote-confirmed update timestamp
    fn updated_at(&self) -> DateTime<Utc>;

    /// Id of the owning parent record, if any
    fn parent_id(&self) -> Option<String> {
        None
    }

    /// The record serialized as a JSON object
    fn to_object(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(Error::InvalidInput(format!(
                "{} did not serialize to an object: {other}",
                Self::ENTITY
            ))),
        }
    }

    /// Values of the comparable fields, missing fields read as `null`
    fn comparable_values(&self) -> Result<Map<String, Value>> {
        let object = self.to_object()?;
        Ok(Self::COMPARABLE_FIELDS
            .iter()
            .map(|field| {
                let value = object.get(*field).cloned().unwrap_or(Value::Null);
                ((*field).to_string(), value)
            })
            .collect())
    }

    /// Return a copy with the given comparable fields overwritten.
    ///
    /// Keys outside `COMPARABLE_FIELDS` are rejected.
    fn with_fields(&self, fields: &Map<String, Value>) -> Result<Self> {
        let mut object = self.to_object()?;
        for (key, value) in fields {
            if !Self::COMPARABLE_FIELDS.contains(&key.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "'{key}' is not an editable {} field",
                    Self::ENTITY
                )));
            }
            object.insert(key.clone(), value.clone());
        }
        Ok(serde_json::from_value(Value::Object(object))?)
    }
}

/// A locally cached record together with its dirty marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRecord<T> {
    /// Current local state
    pub record: T,
    /// Set while the record has local edits the remote has not confirmed
    pub locally_modified_at: Option<DateTime<Utc>>,
    /// Last remote-confirmed snapshot the pending local edits started from
    pub base: Option<T>,
}

impl<T: SyncEntity> CachedRecord<T> {
    /// A record mirroring the remote state
    pub const fn clean(record: T) -> Self {
        Self {
            record,
            locally_modified_at: None,
            base: None,
        }
    }

    /// A record carrying unconfirmed local edits
    pub const fn dirty(record: T, modified_at: DateTime<Utc>, base: Option<T>) -> Self {
        Self {
            record,
            locally_modified_at: Some(modified_at),
            base,
        }
    }

    pub const fn is_dirty(&self) -> bool {
        self.locally_modified_at.is_some()
    }
}
