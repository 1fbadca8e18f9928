//! Operation queue repository implementation
//!
//! Every write is a single statement so the gateway process and the main
//! application can share the queue without a cross-context transaction.

use libsql::{Connection, Row, Value};

use super::{optional_text, read_optional_text, text};
use crate::error::{Error, Result};
use crate::models::{Operation, OperationId};
use crate::util::datetime_from_millis;

/// Trait for operation queue storage (async)
#[allow(async_fn_in_trait)]
pub trait OperationQueueRepository {
    /// Append an operation at the tail; re-appending an existing id is a no-op
    async fn append(&self, operation: &Operation) -> Result<()>;

    /// All queued operations in enqueue order
    async fn list(&self) -> Result<Vec<Operation>>;

    /// Fetch a single operation
    async fn get(&self, id: &OperationId) -> Result<Option<Operation>>;

    /// Remove an operation; missing ids are a no-op
    async fn remove(&self, id: &OperationId) -> Result<()>;

    /// Increment the retry count and store the failure message; missing ids
    /// are a no-op
    async fn record_failure(&self, id: &OperationId, error: &str) -> Result<()>;

    /// Whether any queued operation other than `except` targets the record
    async fn has_pending_for(
        &self,
        table: &str,
        record_id: &str,
        except: Option<&OperationId>,
    ) -> Result<bool>;

    /// Number of queued operations
    async fn count(&self) -> Result<usize>;

    /// Drop every queued operation
    async fn clear(&self) -> Result<usize>;
}

/// libSQL implementation of `OperationQueueRepository`
pub struct LibSqlOperationQueue<'a> {
    conn: &'a Connection,
}

const SELECT_COLUMNS: &str = "SELECT id, kind, table_name, record_id, user_id, payload,
        enqueued_at, retry_count, last_error, request
 FROM operation_queue";

impl<'a> LibSqlOperationQueue<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_operation(row: &Row) -> Result<Operation> {
        let id: String = row.get(0)?;
        let kind: String = row.get(1)?;
        let payload: String = row.get(5)?;
        let retry_count: i64 = row.get(7)?;
        let request = read_optional_text(row, 9)?
            .map(|request| serde_json::from_str(&request))
            .transpose()?;

        Ok(Operation {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid operation id '{id}'")))?,
            kind: kind.parse().map_err(Error::Database)?,
            table: row.get(2)?,
            record_id: read_optional_text(row, 3)?,
            user_id: read_optional_text(row, 4)?,
            payload: serde_json::from_str(&payload)?,
            enqueued_at: datetime_from_millis(row.get(6)?),
            retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
            last_error: read_optional_text(row, 8)?,
            request,
        })
    }

    async fn query_operations(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Operation>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut operations = Vec::new();
        while let Some(row) = rows.next().await? {
            operations.push(Self::parse_operation(&row)?);
        }
        Ok(operations)
    }
}

impl OperationQueueRepository for LibSqlOperationQueue<'_> {
    async fn append(&self, operation: &Operation) -> Result<()> {
        let request = operation
            .request
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn
            .execute(
                "INSERT INTO operation_queue
                 (id, kind, table_name, record_id, user_id, payload, enqueued_at, retry_count, last_error, request)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO NOTHING",
                vec![
                    text(operation.id.as_str()),
                    text(operation.kind.as_str()),
                    text(operation.table.as_str()),
                    optional_text(operation.record_id.as_deref()),
                    optional_text(operation.user_id.as_deref()),
                    text(serde_json::to_string(&operation.payload)?),
                    Value::Integer(operation.enqueued_at.timestamp_millis()),
                    Value::Integer(i64::from(operation.retry_count)),
                    optional_text(operation.last_error.as_deref()),
                    optional_text(request.as_deref()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Operation>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY seq ASC");
        self.query_operations(&sql, Vec::new()).await
    }

    async fn get(&self, id: &OperationId) -> Result<Option<Operation>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?");
        Ok(self
            .query_operations(&sql, vec![text(id.as_str())])
            .await?
            .pop())
    }

    async fn remove(&self, id: &OperationId) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM operation_queue WHERE id = ?",
                vec![text(id.as_str())],
            )
            .await?;
        Ok(())
    }

    async fn record_failure(&self, id: &OperationId, error: &str) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE operation_queue
                 SET retry_count = retry_count + 1, last_error = ?
                 WHERE id = ?",
                vec![text(error), text(id.as_str())],
            )
            .await?;

        if rows == 0 {
            tracing::debug!("Operation {id} left the queue before its failure was recorded");
        }
        Ok(())
    }

    async fn has_pending_for(
        &self,
        table: &str,
        record_id: &str,
        except: Option<&OperationId>,
    ) -> Result<bool> {
        let except = except.map(OperationId::as_str);
        let mut rows = self
            .conn
            .query(
                "SELECT EXISTS(
                    SELECT 1 FROM operation_queue
                    WHERE table_name = ? AND record_id = ? AND id IS NOT ?
                )",
                vec![text(table), text(record_id), optional_text(except.as_deref())],
            )
            .await?;

        Ok(match rows.next().await? {
            Some(row) => row.get::<i64>(0)? != 0,
            None => false,
        })
    }

    async fn count(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM operation_queue", ())
            .await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn clear(&self) -> Result<usize> {
        let removed = self.conn.execute("DELETE FROM operation_queue", ()).await?;
        Ok(usize::try_from(removed).unwrap_or_default())
    }
}
