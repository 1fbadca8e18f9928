//! Gateway response cache repository

use chrono::Utc;
use libsql::{Connection, Row, Value};

use super::text;
use crate::error::Result;

/// A stored response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Unix ms
    pub stored_at: i64,
}

/// libSQL storage for named response caches
pub struct LibSqlCacheRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlCacheRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entry(row: &Row) -> Result<CachedEntry> {
        let status: i64 = row.get(0)?;
        let headers: String = row.get(1)?;
        let body = match row.get_value(2)? {
            Value::Blob(bytes) => bytes,
            Value::Text(text) => text.into_bytes(),
            _ => Vec::new(),
        };
        Ok(CachedEntry {
            status: u16::try_from(status).unwrap_or(200),
            headers: serde_json::from_str(&headers)?,
            body,
            stored_at: row.get(3)?,
        })
    }

    /// Look up a response by cache name and URL
    pub async fn get(&self, cache_name: &str, url: &str) -> Result<Option<CachedEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT status, headers, body, stored_at FROM cache_entries
                 WHERE cache_name = ? AND url = ?",
                vec![text(cache_name), text(url)],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_entry(&row)?)),
            None => Ok(None),
        }
    }

    /// Store or overwrite a response
    pub async fn put(
        &self,
        cache_name: &str,
        url: &str,
        status: u16,
        headers: &[(String, String)],
        body: &[u8],
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO cache_entries
                 (cache_name, url, status, headers, body, stored_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                vec![
                    text(cache_name),
                    text(url),
                    Value::Integer(i64::from(status)),
                    text(serde_json::to_string(headers)?),
                    Value::Blob(body.to_vec()),
                    Value::Integer(Utc::now().timestamp_millis()),
                ],
            )
            .await?;
        Ok(())
    }

    /// Names of every cache holding at least one entry
    pub async fn cache_names(&self) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT DISTINCT cache_name FROM cache_entries ORDER BY cache_name",
                (),
            )
            .await?;
        let mut names = Vec::new();
        while let Some(row) = rows.next().await? {
            names.push(row.get::<String>(0)?);
        }
        Ok(names)
    }

    /// Number of entries in a cache
    pub async fn entry_count(&self, cache_name: &str) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM cache_entries WHERE cache_name = ?",
                [cache_name],
            )
            .await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Delete a whole cache, returning whether it existed
    pub async fn delete_cache(&self, cache_name: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM cache_entries WHERE cache_name = ?",
                [cache_name],
            )
            .await?;
        Ok(removed > 0)
    }
}
