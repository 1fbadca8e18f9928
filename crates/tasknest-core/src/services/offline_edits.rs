//! Local mutations that queue their remote counterpart.
//!
//! Every edit updates the cached record and appends the matching operation in
//! one transaction, so a crash never leaves a dirty record without its queued
//! operation.

use chrono::Utc;
use serde_json::{Map, Value};

use super::LocalStore;
use crate::db::{LibSqlOperationQueue, LibSqlRecordRepository, OperationQueueRepository, RecordRepository};
use crate::error::{Error, Result};
use crate::models::{CachedRecord, List, ListId, Operation, SyncEntity, Task, TaskId};

impl LocalStore {
    /// Cache a new list and queue its insert.
    pub async fn create_list(&self, list: &List) -> Result<()> {
        self.create_record(list).await
    }

    /// Edit comparable fields of a list.
    pub async fn update_list(&self, id: &ListId, changes: Map<String, Value>) -> Result<List> {
        self.update_record::<List>(&id.as_str(), changes).await
    }

    /// Remove a list together with its cached tasks and queue the delete.
    ///
    /// Only the list delete is queued; the remote store owns task cascading.
    pub async fn delete_list(&self, id: &ListId) -> Result<()> {
        let list_id = id.as_str();
        let tasks = self.tasks_in_list(&list_id).await?;
        self.delete_record::<List>(&list_id).await?;
        for task in tasks {
            self.remove_record::<Task>(&task.id.as_str()).await?;
        }
        Ok(())
    }

    /// Cache a new task and queue its insert. The owning list must be cached.
    pub async fn create_task(&self, task: &Task) -> Result<()> {
        if self.get_record::<List>(&task.list_id.as_str()).await?.is_none() {
            return Err(Error::NotFound(format!("list {}", task.list_id)));
        }
        self.create_record(task).await
    }

    /// Edit comparable fields of a task.
    pub async fn update_task(&self, id: &TaskId, changes: Map<String, Value>) -> Result<Task> {
        self.update_record::<Task>(&id.as_str(), changes).await
    }

    pub async fn delete_task(&self, id: &TaskId) -> Result<()> {
        self.delete_record::<Task>(&id.as_str()).await
    }

    pub async fn set_task_completed(&self, id: &TaskId, completed: bool) -> Result<Task> {
        let mut changes = Map::new();
        changes.insert("completed".to_string(), Value::Bool(completed));
        self.update_task(id, changes).await
    }

    /// Cache a new record as dirty (no base) and queue its insert.
    pub async fn create_record<T: SyncEntity>(&self, record: &T) -> Result<()> {
        let operation = Operation::create(record)?;
        let cached = CachedRecord::dirty(record.clone(), Utc::now(), None);

        let db = self.db.lock().await;
        let tx = db.connection().transaction().await?;
        LibSqlRecordRepository::<T>::new(&tx).save(&cached).await?;
        LibSqlOperationQueue::new(&tx).append(&operation).await?;
        tx.commit().await?;

        tracing::debug!("Created {} {} offline", T::ENTITY, record.record_id());
        Ok(())
    }

    /// Apply `changes` to a cached record and queue an update carrying the
    /// fields whose value actually changed.
    ///
    /// The base is captured on the first edit of a clean record and kept
    /// across later edits. An edit that changes nothing queues nothing.
    pub async fn update_record<T: SyncEntity>(
        &self,
        id: &str,
        changes: Map<String, Value>,
    ) -> Result<T> {
        let db = self.db.lock().await;
        let records = LibSqlRecordRepository::<T>::new(db.connection());
        let cached = records
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} {id}", T::ENTITY)))?;

        let updated = cached.record.with_fields(&changes)?;
        let before = cached.record.comparable_values()?;
        let after = updated.comparable_values()?;
        let changed: Map<String, Value> = after
            .into_iter()
            .filter(|(field, value)| before.get(field) != Some(value))
            .collect();
        if changed.is_empty() {
            return Ok(cached.record);
        }

        let base = if cached.is_dirty() {
            cached.base
        } else {
            Some(cached.record)
        };
        let operation = Operation::update(&updated, changed);
        let dirty = CachedRecord::dirty(updated.clone(), Utc::now(), base);

        let tx = db.connection().transaction().await?;
        LibSqlRecordRepository::<T>::new(&tx).save(&dirty).await?;
        LibSqlOperationQueue::new(&tx).append(&operation).await?;
        tx.commit().await?;

        tracing::debug!("Updated {} {id} offline", T::ENTITY);
        Ok(updated)
    }

    /// Drop a cached record and queue its remote delete.
    pub async fn delete_record<T: SyncEntity>(&self, id: &str) -> Result<()> {
        let db = self.db.lock().await;
        let cached = LibSqlRecordRepository::<T>::new(db.connection())
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} {id}", T::ENTITY)))?;
        let operation = Operation::delete(&cached.record);

        let tx = db.connection().transaction().await?;
        LibSqlRecordRepository::<T>::new(&tx).remove(id).await?;
        LibSqlOperationQueue::new(&tx).append(&operation).await?;
        tx.commit().await?;

        tracing::debug!("Deleted {} {id} offline", T::ENTITY);
        Ok(())
    }
}
