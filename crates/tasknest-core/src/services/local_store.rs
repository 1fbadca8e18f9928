//! The local store: cached records, the operation queue, sync metadata and
//! the gateway's response caches behind one shared libSQL database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::db::{
    CachedEntry, Database, LibSqlCacheRepository, LibSqlMetadataRepository, LibSqlOperationQueue,
    LibSqlRecordRepository, MetadataRepository, OperationQueueRepository, RecordRepository,
};
use crate::models::{CachedRecord, List, Operation, OperationId, SyncEntity, SyncMetadata, Task};
use crate::Result;

/// Thread-safe handle to the local store.
///
/// Clones share one connection; each call is a single self-contained write.
#[derive(Clone)]
pub struct LocalStore {
    pub(super) db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl LocalStore {
    /// Open the store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        tracing::debug!("Opened local store at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Filesystem path of the store, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    // ---------------------------------------------------------------------
    // Cached records
    // ---------------------------------------------------------------------

    /// Fetch a cached record by id.
    pub async fn get_record<T: SyncEntity>(&self, id: &str) -> Result<Option<CachedRecord<T>>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::<T>::new(db.connection()).get(id).await
    }

    /// All cached records of a user.
    pub async fn records_for_user<T: SyncEntity>(
        &self,
        user_id: &str,
    ) -> Result<Vec<CachedRecord<T>>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::<T>::new(db.connection())
            .list_for_user(user_id)
            .await
    }

    /// Insert or overwrite a cached record.
    pub async fn save_record<T: SyncEntity>(&self, cached: &CachedRecord<T>) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::<T>::new(db.connection())
            .save(cached)
            .await
    }

    /// Remove a cached record. Missing ids are a no-op.
    pub async fn remove_record<T: SyncEntity>(&self, id: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::<T>::new(db.connection())
            .remove(id)
            .await
    }

    /// Clear the dirty marker of a cached record.
    pub async fn mark_clean<T: SyncEntity>(&self, id: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::<T>::new(db.connection())
            .mark_clean(id)
            .await
    }

    /// Cached lists of a user, most recently updated first.
    pub async fn lists(&self, user_id: &str) -> Result<Vec<List>> {
        Ok(self
            .records_for_user::<List>(user_id)
            .await?
            .into_iter()
            .map(|cached| cached.record)
            .collect())
    }

    /// Cached tasks belonging to a list.
    pub async fn tasks_in_list(&self, list_id: &str) -> Result<Vec<Task>> {
        let db = self.db.lock().await;
        Ok(LibSqlRecordRepository::<Task>::new(db.connection())
            .list_by_parent(list_id)
            .await?
            .into_iter()
            .map(|cached| cached.record)
            .collect())
    }

    /// Number of cached records of a user still carrying a dirty marker.
    pub async fn dirty_count(&self, user_id: &str) -> Result<usize> {
        let lists = self.records_for_user::<List>(user_id).await?;
        let tasks = self.records_for_user::<Task>(user_id).await?;
        Ok(lists.iter().filter(|cached| cached.is_dirty()).count()
            + tasks.iter().filter(|cached| cached.is_dirty()).count())
    }

    // ---------------------------------------------------------------------
    // Operation queue
    // ---------------------------------------------------------------------

    /// Append an operation to the tail of the queue.
    pub async fn enqueue(&self, operation: &Operation) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlOperationQueue::new(db.connection())
            .append(operation)
            .await?;
        tracing::debug!(
            "Queued {} on {} ({})",
            operation.kind,
            operation.table,
            operation.id
        );
        Ok(())
    }

    /// Every queued operation in enqueue order.
    pub async fn operations(&self) -> Result<Vec<Operation>> {
        let db = self.db.lock().await;
        LibSqlOperationQueue::new(db.connection()).list().await
    }

    /// Queued operations drained by `user_id`, in enqueue order.
    pub async fn operations_for_user(&self, user_id: &str) -> Result<Vec<Operation>> {
        Ok(self
            .operations()
            .await?
            .into_iter()
            .filter(|operation| operation.is_owned_by(user_id))
            .collect())
    }

    /// Fetch a queued operation.
    pub async fn get_operation(&self, id: &OperationId) -> Result<Option<Operation>> {
        let db = self.db.lock().await;
        LibSqlOperationQueue::new(db.connection()).get(id).await
    }

    /// Remove a queued operation. Missing ids are a no-op.
    pub async fn remove_operation(&self, id: &OperationId) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlOperationQueue::new(db.connection()).remove(id).await
    }

    /// Count a failed attempt against a queued operation. Missing ids are a
    /// no-op.
    pub async fn record_operation_failure(&self, id: &OperationId, error: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlOperationQueue::new(db.connection())
            .record_failure(id, error)
            .await
    }

    /// Whether any queued operation other than `except` targets the record.
    pub async fn has_pending_operations_for(
        &self,
        table: &str,
        record_id: &str,
        except: Option<&OperationId>,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlOperationQueue::new(db.connection())
            .has_pending_for(table, record_id, except)
            .await
    }

    /// Number of operations `user_id` would drain.
    pub async fn pending_count(&self, user_id: &str) -> Result<usize> {
        Ok(self.operations_for_user(user_id).await?.len())
    }

    /// Drop every queued operation, returning how many were removed.
    pub async fn clear_queue(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let removed = LibSqlOperationQueue::new(db.connection()).clear().await?;
        tracing::warn!("Cleared {removed} queued operations");
        Ok(removed)
    }

    // ---------------------------------------------------------------------
    // Metadata
    // ---------------------------------------------------------------------

    /// Load the sync cursor.
    pub async fn sync_metadata(&self) -> Result<SyncMetadata> {
        let db = self.db.lock().await;
        LibSqlMetadataRepository::new(db.connection()).load().await
    }

    /// Advance the sync cursor.
    pub async fn set_last_sync(&self, at: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMetadataRepository::new(db.connection())
            .set_last_sync(at)
            .await
    }

    // ---------------------------------------------------------------------
    // Response caches
    // ---------------------------------------------------------------------

    pub async fn cache_get(&self, cache_name: &str, url: &str) -> Result<Option<CachedEntry>> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection())
            .get(cache_name, url)
            .await
    }

    pub async fn cache_put(
        &self,
        cache_name: &str,
        url: &str,
        status: u16,
        headers: &[(String, String)],
        body: &[u8],
    ) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection())
            .put(cache_name, url, status, headers, body)
            .await
    }

    pub async fn cache_names(&self) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection())
            .cache_names()
            .await
    }

    pub async fn cache_entry_count(&self, cache_name: &str) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection())
            .entry_count(cache_name)
            .await
    }

    pub async fn delete_cache(&self, cache_name: &str) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection())
            .delete_cache(cache_name)
            .await
    }
}
