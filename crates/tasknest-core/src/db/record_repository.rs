//! Cached list/task repository implementation

use std::marker::PhantomData;

use libsql::{Connection, Row, Value};

use super::{optional_integer, optional_text, read_optional_integer, read_optional_text, text};
use crate::error::Result;
use crate::models::{CachedRecord, SyncEntity};
use crate::util::datetime_from_millis;

/// Trait for cached record storage operations (async)
#[allow(async_fn_in_trait)]
pub trait RecordRepository<T: SyncEntity> {
    /// Get a cached record by id
    async fn get(&self, id: &str) -> Result<Option<CachedRecord<T>>>;

    /// List every cached record owned by the user
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<CachedRecord<T>>>;

    /// List cached records whose parent is `parent_id`
    async fn list_by_parent(&self, parent_id: &str) -> Result<Vec<CachedRecord<T>>>;

    /// Insert or overwrite a cached record
    async fn save(&self, cached: &CachedRecord<T>) -> Result<()>;

    /// Remove a cached record; missing ids are a no-op
    async fn remove(&self, id: &str) -> Result<()>;

    /// Drop the dirty marker and base of a record
    async fn mark_clean(&self, id: &str) -> Result<()>;
}

/// libSQL implementation of `RecordRepository`, one table per entity type
pub struct LibSqlRecordRepository<'a, T> {
    conn: &'a Connection,
    _entity: PhantomData<T>,
}

impl<'a, T: SyncEntity> LibSqlRecordRepository<'a, T> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            _entity: PhantomData,
        }
    }

    const fn table() -> &'static str {
        T::ENTITY.table()
    }

    fn parse_record(row: &Row) -> Result<CachedRecord<T>> {
        let data: String = row.get(0)?;
        let record = serde_json::from_str(&data)?;
        let locally_modified_at = read_optional_integer(row, 1)?.map(datetime_from_millis);
        let base = read_optional_text(row, 2)?
            .map(|base| serde_json::from_str(&base))
            .transpose()?;

        Ok(CachedRecord {
            record,
            locally_modified_at,
            base,
        })
    }

    async fn query_records(&self, sql: &str, params: Vec<Value>) -> Result<Vec<CachedRecord<T>>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }
}

impl<T: SyncEntity> RecordRepository<T> for LibSqlRecordRepository<'_, T> {
    async fn get(&self, id: &str) -> Result<Option<CachedRecord<T>>> {
        let sql = format!(
            "SELECT data, locally_modified_at, base FROM {} WHERE id = ?",
            Self::table()
        );
        Ok(self.query_records(&sql, vec![text(id)]).await?.pop())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<CachedRecord<T>>> {
        let sql = format!(
            "SELECT data, locally_modified_at, base FROM {}
             WHERE user_id = ?
             ORDER BY updated_at DESC, id ASC",
            Self::table()
        );
        self.query_records(&sql, vec![text(user_id)]).await
    }

    async fn list_by_parent(&self, parent_id: &str) -> Result<Vec<CachedRecord<T>>> {
        let sql = format!(
            "SELECT data, locally_modified_at, base FROM {}
             WHERE parent_id = ?
             ORDER BY updated_at DESC, id ASC",
            Self::table()
        );
        self.query_records(&sql, vec![text(parent_id)]).await
    }

    async fn save(&self, cached: &CachedRecord<T>) -> Result<()> {
        let record = &cached.record;
        let base = cached
            .base
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let sql = format!(
            "INSERT OR REPLACE INTO {}
             (id, user_id, parent_id, data, updated_at, locally_modified_at, base)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            Self::table()
        );

        self.conn
            .execute(
                &sql,
                vec![
                    text(record.record_id()),
                    text(record.owner_id()),
                    optional_text(record.parent_id().as_deref()),
                    text(serde_json::to_string(record)?),
                    Value::Integer(record.updated_at().timestamp_millis()),
                    optional_integer(cached.locally_modified_at.map(|at| at.timestamp_millis())),
                    optional_text(base.as_deref()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = ?", Self::table());
        self.conn.execute(&sql, vec![text(id)]).await?;
        Ok(())
    }

    async fn mark_clean(&self, id: &str) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET locally_modified_at = NULL, base = NULL WHERE id = ?",
            Self::table()
        );
        self.conn.execute(&sql, vec![text(id)]).await?;
        Ok(())
    }
}
