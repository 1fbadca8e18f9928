//! Database layer for TaskNest

mod cache_repository;
mod connection;
mod metadata_repository;
mod migrations;
mod queue_repository;
mod record_repository;

pub use cache_repository::{CachedEntry, LibSqlCacheRepository};
pub use connection::Database;
pub use metadata_repository::{LibSqlMetadataRepository, MetadataRepository, LAST_SYNC_KEY};
pub use queue_repository::{LibSqlOperationQueue, OperationQueueRepository};
pub use record_repository::{LibSqlRecordRepository, RecordRepository};

use libsql::{Row, Value};

use crate::error::{Error, Result};

fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

fn optional_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |value| Value::Text(value.to_string()))
}

fn optional_integer(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}

fn read_optional_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Text(value) => Ok(Some(value)),
        other => Err(Error::Database(format!(
            "expected TEXT in column {idx}, found {other:?}"
        ))),
    }
}

fn read_optional_integer(row: &Row, idx: i32) -> Result<Option<i64>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Integer(value) => Ok(Some(value)),
        other => Err(Error::Database(format!(
            "expected INTEGER in column {idx}, found {other:?}"
        ))),
    }
}
