//! Sync metadata repository implementation

use chrono::{DateTime, Utc};
use libsql::Connection;

use super::text;
use crate::error::{Error, Result};
use crate::models::SyncMetadata;

/// Metadata key holding the last successful sync cursor
pub const LAST_SYNC_KEY: &str = "lastSync";

/// Trait for sync metadata storage operations (async)
#[allow(async_fn_in_trait)]
pub trait MetadataRepository {
    /// Load the sync metadata
    async fn load(&self) -> Result<SyncMetadata>;

    /// Record the completion time of a fully successful pass
    async fn set_last_sync(&self, at: DateTime<Utc>) -> Result<()>;
}

/// libSQL implementation of `MetadataRepository`
pub struct LibSqlMetadataRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlMetadataRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Read a raw metadata value
    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM metadata WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    /// Write a raw metadata value
    pub async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
                vec![text(key), text(value)],
            )
            .await?;
        Ok(())
    }
}

impl MetadataRepository for LibSqlMetadataRepository<'_> {
    async fn load(&self) -> Result<SyncMetadata> {
        let last_sync = self
            .get_value(LAST_SYNC_KEY)
            .await?
            .map(|value| {
                DateTime::parse_from_rfc3339(&value)
                    .map(|at| at.with_timezone(&Utc))
                    .map_err(|error| {
                        Error::Database(format!("invalid {LAST_SYNC_KEY} value '{value}': {error}"))
                    })
            })
            .transpose()?;

        Ok(SyncMetadata { last_sync })
    }

    async fn set_last_sync(&self, at: DateTime<Utc>) -> Result<()> {
        self.set_value(LAST_SYNC_KEY, &at.to_rfc3339()).await
    }
}
