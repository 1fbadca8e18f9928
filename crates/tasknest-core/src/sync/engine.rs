//! The sync pass: pull, reconcile, push.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use serde_json::Value;

use super::diff::{reconcile, Decision};
use super::{ConflictResolution, SyncError, SyncResult, SyncStatus};
use crate::error::Error;
use crate::events::{Event, EventChannel};
use crate::models::{
    CachedRecord, Conflict, EntityType, List, Operation, OperationKind, SyncEntity, Task,
};
use crate::remote::{RemoteError, RemoteResult, RemoteStore};
use crate::services::LocalStore;

/// Releases the in-progress flag when the pass ends, however it ends.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Reconciles one local store with one remote store.
///
/// At most one pass runs per engine; a second `perform_sync` while one is in
/// flight is rejected with [`SyncError::InProgress`].
pub struct SyncEngine<R> {
    store: LocalStore,
    remote: R,
    events: EventChannel,
    in_progress: AtomicBool,
    conflicts: Mutex<Vec<Conflict>>,
}

impl<R: RemoteStore> SyncEngine<R> {
    pub fn new(store: LocalStore, remote: R, events: EventChannel) -> Self {
        Self {
            store,
            remote,
            events,
            in_progress: AtomicBool::new(false),
            conflicts: Mutex::new(Vec::new()),
        }
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn events(&self) -> &EventChannel {
        &self.events
    }

    pub fn is_sync_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Conflicts reported by the latest pass that have not been resolved.
    pub fn conflicts(&self) -> Vec<Conflict> {
        self.conflicts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn sync_status(&self, user_id: &str) -> Result<SyncStatus, SyncError> {
        let metadata = self.store.sync_metadata().await?;
        let pending_operations = self.store.pending_count(user_id).await?;
        let has_conflicts = self
            .conflicts()
            .iter()
            .any(|conflict| conflict_owner(conflict).map_or(true, |owner| owner == user_id));

        Ok(SyncStatus {
            last_sync: metadata.last_sync,
            pending_operations,
            has_conflicts,
        })
    }

    /// Run one full pass for `user_id`.
    pub async fn perform_sync(&self, user_id: &str) -> Result<SyncResult, SyncError> {
        let Some(_guard) = PassGuard::acquire(&self.in_progress) else {
            tracing::debug!("Rejected sync for {user_id}: a pass is already running");
            return Err(SyncError::InProgress);
        };

        self.events.emit(&Event::SyncStarted {
            user_id: user_id.to_string(),
        });
        tracing::info!("Starting sync for {user_id}");

        let outcome = self.run_pass(user_id).await;
        let reported = match &outcome {
            Ok(result) => {
                tracing::info!(
                    "Sync for {user_id} finished: success={}, synced={}, failed={}, conflicts={}",
                    result.success,
                    result.synced,
                    result.failed,
                    result.conflicts.len()
                );
                if result.success {
                    *self.conflicts.lock().unwrap_or_else(PoisonError::into_inner) =
                        result.conflicts.clone();
                }
                result.clone()
            }
            Err(error) => {
                tracing::error!("Sync for {user_id} failed: {error}");
                SyncResult {
                    errors: vec![error.to_string()],
                    ..SyncResult::default()
                }
            }
        };
        self.events.emit(&Event::SyncFinished {
            user_id: user_id.to_string(),
            result: reported,
        });

        outcome
    }

    async fn run_pass(&self, user_id: &str) -> Result<SyncResult, SyncError> {
        // Both tables are fetched before any local write so a failed fetch
        // leaves the store untouched.
        let lists = match self.fetch::<List>(user_id).await {
            Ok(rows) => rows,
            Err(message) => return Ok(aborted(message)),
        };
        let tasks = match self.fetch::<Task>(user_id).await {
            Ok(rows) => rows,
            Err(message) => return Ok(aborted(message)),
        };

        let mut result = SyncResult::default();
        let pending = self.store.operations_for_user(user_id).await?;
        self.reconcile_table(user_id, lists, &pending, &mut result)
            .await?;
        self.reconcile_table(user_id, tasks, &pending, &mut result)
            .await?;

        self.drain_queue(user_id, &mut result).await?;

        self.store.set_last_sync(Utc::now()).await?;
        result.success = true;
        Ok(result)
    }

    async fn fetch<T: SyncEntity>(&self, user_id: &str) -> Result<Vec<T>, String> {
        let table = T::ENTITY.table();
        let rows = self
            .remote
            .select(table, user_id)
            .await
            .map_err(|error| format!("Failed to fetch {table}: {error}"))?;

        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row)
                    .map_err(|error| format!("Failed to fetch {table}: invalid row: {error}"))
            })
            .collect()
    }

    async fn reconcile_table<T: SyncEntity>(
        &self,
        user_id: &str,
        remote: Vec<T>,
        pending: &[Operation],
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        let mut remote_by_id: HashMap<String, T> = remote
            .into_iter()
            .map(|record| (record.record_id(), record))
            .collect();

        for cached in self.store.records_for_user::<T>(user_id).await? {
            let id = cached.record.record_id();
            let remote = remote_by_id.remove(&id);
            let decision = reconcile(Some(&cached), remote.as_ref())?;
            self.apply_decision(&id, decision, pending, result).await?;
        }

        let mut remote_only: Vec<(String, T)> = remote_by_id.into_iter().collect();
        remote_only.sort_by(|(left, _), (right, _)| left.cmp(right));
        for (id, remote) in remote_only {
            let decision = reconcile(None, Some(&remote))?;
            self.apply_decision(&id, decision, pending, result).await?;
        }

        Ok(())
    }

    async fn apply_decision<T: SyncEntity>(
        &self,
        id: &str,
        decision: Decision<T>,
        pending: &[Operation],
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        let entity = T::ENTITY;
        let table = entity.table();
        let queued = || pending.iter().filter(move |operation| operation.targets(table, id));

        match decision {
            Decision::Unchanged => {}
            Decision::KeepLocal => {
                tracing::debug!("Keeping local edits of {entity} {id}");
            }
            Decision::Insert(record) => {
                if queued().any(|operation| operation.kind == OperationKind::Delete) {
                    tracing::debug!("Skipping {entity} {id}: a delete is queued");
                } else {
                    self.store.save_record(&CachedRecord::clean(record)).await?;
                    result.synced += 1;
                }
            }
            Decision::Remove => {
                if queued().next().is_some() {
                    tracing::debug!("Keeping {entity} {id}: operations still queued");
                } else {
                    self.store.remove_record::<T>(id).await?;
                    result.synced += 1;
                }
            }
            Decision::Overwrite(record) => {
                if queued().next().is_some() {
                    tracing::debug!("Keeping {entity} {id}: operations still queued");
                } else {
                    self.store.save_record(&CachedRecord::clean(record)).await?;
                    result.synced += 1;
                }
            }
            Decision::Merged(merged) => {
                tracing::debug!("Merged disjoint edits of {entity} {id}");
                self.store.save_record(&merged).await?;
                result.synced += 1;
            }
            Decision::Conflict(conflict, kept) => {
                tracing::info!(
                    "Conflict on {entity} {id}: {}",
                    conflict.conflict_fields.join(", ")
                );
                self.store.save_record(&CachedRecord::clean(kept)).await?;
                result.conflicts.push(conflict);
            }
        }

        Ok(())
    }

    async fn drain_queue(&self, user_id: &str, result: &mut SyncResult) -> Result<(), SyncError> {
        for operation in self.store.operations_for_user(user_id).await? {
            match self.apply_operation(&operation).await {
                Ok(row) => {
                    self.store.remove_operation(&operation.id).await?;
                    result.synced += 1;
                    self.settle(&operation, row).await?;
                }
                Err(error) => {
                    let message = error.to_string();
                    self.store
                        .record_operation_failure(&operation.id, &message)
                        .await?;
                    tracing::warn!(
                        "Operation {} ({} {}) failed: {message}",
                        operation.id,
                        operation.kind,
                        operation.table
                    );
                    result.failed += 1;
                    result.errors.push(format!(
                        "Failed to {} {} {}: {message}",
                        operation.kind,
                        operation.table,
                        operation.record_id.as_deref().unwrap_or("row")
                    ));
                }
            }
        }
        Ok(())
    }

    async fn apply_operation(&self, operation: &Operation) -> RemoteResult<Option<Value>> {
        let table = operation.table.as_str();
        let user_id = operation.user_id.as_deref();
        match operation.kind {
            OperationKind::Create => self.remote.insert(table, &operation.payload).await,
            OperationKind::Update => {
                let id = target_id(operation)?;
                self.remote.update(table, id, user_id, &operation.payload).await
            }
            OperationKind::Delete => {
                let id = target_id(operation)?;
                self.remote.delete(table, id, user_id).await.map(|()| None)
            }
        }
    }

    /// Store the remote's copy of a pushed record once nothing else is queued
    /// for it.
    async fn settle(&self, operation: &Operation, row: Option<Value>) -> Result<(), SyncError> {
        match EntityType::from_table(&operation.table) {
            Some(EntityType::List) => self.settle_record::<List>(operation, row).await,
            Some(EntityType::Task) => self.settle_record::<Task>(operation, row).await,
            None => Ok(()),
        }
    }

    async fn settle_record<T: SyncEntity>(
        &self,
        operation: &Operation,
        row: Option<Value>,
    ) -> Result<(), SyncError> {
        if operation.kind == OperationKind::Delete {
            return Ok(());
        }

        let returned = row.and_then(|row| match serde_json::from_value::<T>(row) {
            Ok(record) => Some(record),
            Err(error) => {
                tracing::warn!("Ignoring unparseable {} row: {error}", T::ENTITY);
                None
            }
        });
        let Some(record_id) = operation
            .record_id
            .clone()
            .or_else(|| returned.as_ref().map(T::record_id))
        else {
            return Ok(());
        };

        if self
            .store
            .has_pending_operations_for(T::ENTITY.table(), &record_id, None)
            .await?
        {
            return Ok(());
        }

        match returned {
            Some(record) => self.store.save_record(&CachedRecord::clean(record)).await?,
            None => self.store.mark_clean::<T>(&record_id).await?,
        }
        Ok(())
    }

    /// Settle a reported conflict the way the caller chose.
    ///
    /// `KeepRemote` and `Merge` edit the local record like any offline edit,
    /// so the change reaches the remote through the queue.
    pub async fn resolve_conflict(
        &self,
        user_id: &str,
        conflict: &Conflict,
        resolution: ConflictResolution,
    ) -> Result<(), SyncError> {
        if conflict_owner(conflict).is_some_and(|owner| owner != user_id) {
            return Err(Error::InvalidInput(format!(
                "{} {} does not belong to {user_id}",
                conflict.entity, conflict.record_id
            ))
            .into());
        }

        match conflict.entity {
            EntityType::List => self.resolve::<List>(conflict, &resolution).await?,
            EntityType::Task => self.resolve::<Task>(conflict, &resolution).await?,
        }

        self.conflicts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|known| {
                known.entity != conflict.entity || known.record_id != conflict.record_id
            });
        tracing::info!(
            "Resolved conflict on {} {} with {resolution:?}",
            conflict.entity,
            conflict.record_id
        );
        Ok(())
    }

    async fn resolve<T: SyncEntity>(
        &self,
        conflict: &Conflict,
        resolution: &ConflictResolution,
    ) -> Result<(), SyncError> {
        match resolution {
            ConflictResolution::KeepLocal => {}
            ConflictResolution::KeepRemote => {
                let remote: T = serde_json::from_value(conflict.remote.clone())
                    .map_err(Error::from)?;
                self.store
                    .update_record::<T>(&conflict.record_id, remote.comparable_values()?)
                    .await?;
            }
            ConflictResolution::Merge(fields) => {
                self.store
                    .update_record::<T>(&conflict.record_id, fields.clone())
                    .await?;
            }
        }
        Ok(())
    }
}

fn aborted(message: String) -> SyncResult {
    tracing::warn!("Sync aborted: {message}");
    SyncResult {
        success: false,
        errors: vec![message],
        ..SyncResult::default()
    }
}

fn target_id(operation: &Operation) -> RemoteResult<&str> {
    operation.record_id.as_deref().ok_or_else(|| {
        RemoteError::InvalidPayload(format!(
            "{} on {} has no record id",
            operation.kind, operation.table
        ))
    })
}

fn conflict_owner(conflict: &Conflict) -> Option<&str> {
    conflict.local.get("user_id").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;
    use crate::remote::fake::FakeRemote;
    use crate::sync::SyncOutcome;
    use chrono::{DateTime, Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};
    use std::sync::Arc;

    const USER: &str = "user-1";

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn row<T: SyncEntity>(record: &T) -> Value {
        serde_json::to_value(record).unwrap()
    }

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    async fn setup() -> (SyncEngine<FakeRemote>, LocalStore, FakeRemote) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let remote = FakeRemote::new();
        let engine = SyncEngine::new(store.clone(), remote.clone(), EventChannel::new());
        (engine, store, remote)
    }

    fn seeded_task() -> (List, Task) {
        let mut list = List::new(USER, "Work");
        list.updated_at = at(0);
        let mut task = Task::new(list.id, USER, "Write report");
        task.updated_at = at(0);
        (list, task)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_pass_without_changes_syncs_nothing() {
        let (engine, store, remote) = setup().await;
        let (list, task) = seeded_task();
        remote.put_row("lists", row(&list));
        remote.put_row("tasks", row(&task));

        let first = engine.perform_sync(USER).await.unwrap();
        assert!(first.success);
        assert_eq!(first.synced, 2);
        assert_eq!(store.lists(USER).await.unwrap(), vec![list]);

        let second = engine.perform_sync(USER).await.unwrap();
        assert!(second.success);
        assert_eq!(second.synced, 0);
        assert_eq!(second.failed, 0);
        assert!(second.conflicts.is_empty());
        assert_eq!(second.outcome(), SyncOutcome::Success);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn disjoint_edits_merge_without_conflict() {
        let (engine, store, remote) = setup().await;
        let (list, task) = seeded_task();
        remote.put_row("lists", row(&list));
        remote.put_row("tasks", row(&task));
        engine.perform_sync(USER).await.unwrap();

        store
            .update_task(&task.id, fields(json!({"priority": "high"})))
            .await
            .unwrap();
        let mut remote_task = task.clone();
        remote_task.completed = true;
        remote_task.updated_at = at(10);
        remote.put_row("tasks", row(&remote_task));

        let result = engine.perform_sync(USER).await.unwrap();
        assert!(result.success);
        assert!(result.conflicts.is_empty());

        let cached = store
            .get_record::<Task>(&task.id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert!(!cached.is_dirty());
        assert_eq!(cached.record.priority, Priority::High);
        assert!(cached.record.completed);

        let stored = &remote.rows("tasks")[0];
        assert_eq!(stored["priority"], "high");
        assert_eq!(stored["completed"], true);
        assert!(store.operations().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn merged_record_stays_dirty_until_its_push_succeeds() {
        let (engine, store, remote) = setup().await;
        let (list, task) = seeded_task();
        remote.put_row("lists", row(&list));
        remote.put_row("tasks", row(&task));
        engine.perform_sync(USER).await.unwrap();

        store
            .update_task(&task.id, fields(json!({"priority": "high"})))
            .await
            .unwrap();
        let mut remote_task = task.clone();
        remote_task.completed = true;
        remote_task.updated_at = at(10);
        remote.put_row("tasks", row(&remote_task));
        remote.fail_writes(1);

        let first = engine.perform_sync(USER).await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(store.operations().await.unwrap().len(), 1);
        let cached = store
            .get_record::<Task>(&task.id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert!(cached.is_dirty());
        assert_eq!(cached.base, Some(remote_task.clone()));
        assert!(cached.record.completed);
        assert_eq!(cached.record.priority, Priority::High);

        let mut latest = remote_task.clone();
        latest.priority = Priority::Low;
        latest.updated_at = at(20);
        remote.put_row("tasks", row(&latest));

        let second = engine.perform_sync(USER).await.unwrap();
        assert_eq!(second.conflicts.len(), 1);
        assert_eq!(
            second.conflicts[0].conflict_fields,
            vec!["priority".to_string()]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overlapping_edits_report_exactly_the_overlap() {
        let (engine, store, remote) = setup().await;
        let (list, task) = seeded_task();
        remote.put_row("lists", row(&list));
        remote.put_row("tasks", row(&task));
        engine.perform_sync(USER).await.unwrap();

        store
            .update_task(
                &task.id,
                fields(json!({"title": "Write the report", "priority": "low"})),
            )
            .await
            .unwrap();
        let mut remote_task = task.clone();
        remote_task.title = "Draft report".to_string();
        remote_task.completed = true;
        remote_task.updated_at = at(10);
        remote.put_row("tasks", row(&remote_task));

        let result = engine.perform_sync(USER).await.unwrap();
        assert!(result.success);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].entity, EntityType::Task);
        assert_eq!(result.conflicts[0].conflict_fields, vec!["title".to_string()]);
        assert_eq!(result.outcome(), SyncOutcome::SuccessWithConflicts);

        assert_eq!(engine.conflicts(), result.conflicts);
        assert!(engine.sync_status(USER).await.unwrap().has_conflicts);

        let cached = store
            .get_record::<Task>(&task.id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert!(!cached.is_dirty());
        assert_eq!(cached.record.title, "Write the report");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_local_list_conflicts_with_newer_remote() {
        let (engine, store, remote) = setup().await;
        let mut local = List::new(USER, "Local");
        local.updated_at = at(0);
        store
            .save_record(&CachedRecord::dirty(local.clone(), at(1), None))
            .await
            .unwrap();
        let mut newer = local.clone();
        newer.name = "Remote".to_string();
        newer.updated_at = at(2);
        remote.put_row("lists", row(&newer));

        let result = engine.perform_sync(USER).await.unwrap();
        assert_eq!(result.conflicts.len(), 1);
        let conflict = &result.conflicts[0];
        assert_eq!(conflict.entity, EntityType::List);
        assert_eq!(conflict.record_id, local.id.as_str());
        assert_eq!(conflict.conflict_fields, vec!["name".to_string()]);
        assert_eq!(serde_json::to_value(conflict).unwrap()["type"], "list");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queued_create_without_owner_is_pushed() {
        let (engine, store, remote) = setup().await;
        store
            .enqueue(&Operation::new(
                OperationKind::Create,
                "lists",
                json!({"name": "New List"}),
            ))
            .await
            .unwrap();

        let result = engine.perform_sync(USER).await.unwrap();
        assert!(result.success);
        assert_eq!(result.synced, 1);
        assert!(store.operations().await.unwrap().is_empty());
        assert_eq!(remote.rows("lists")[0]["name"], "New List");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pushed_create_is_stored_clean_from_remote_row() {
        let (engine, store, remote) = setup().await;
        let list = List::new(USER, "Errands");
        store.create_list(&list).await.unwrap();

        let result = engine.perform_sync(USER).await.unwrap();
        assert_eq!(result.synced, 1);

        let cached = store
            .get_record::<List>(&list.id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert!(!cached.is_dirty());
        assert_eq!(
            row(&cached.record)["updated_at"],
            remote.rows("lists")[0]["updated_at"]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_fetch_aborts_without_touching_the_store() {
        let (engine, store, remote) = setup().await;
        let stale = List::new(USER, "Gone remotely");
        store
            .save_record(&CachedRecord::clean(stale.clone()))
            .await
            .unwrap();
        let (list, _) = seeded_task();
        remote.put_row("lists", row(&list));
        remote.fail_select("tasks");

        let result = engine.perform_sync(USER).await.unwrap();
        assert!(!result.success);
        assert!(result.errors[0].contains("tasks"));
        assert_eq!(result.outcome(), SyncOutcome::Failed);
        assert_eq!(store.lists(USER).await.unwrap(), vec![stale]);
        assert!(store.sync_metadata().await.unwrap().last_sync.is_none());

        remote.fail_select("lists");
        let result = engine.perform_sync(USER).await.unwrap();
        assert!(result.errors[0].contains("lists"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failing_operation_is_retained_then_removed_once() {
        let (engine, store, remote) = setup().await;
        let list = List::new(USER, "Retry me");
        store.create_list(&list).await.unwrap();
        remote.fail_writes(3);

        for attempt in 1..=3 {
            let result = engine.perform_sync(USER).await.unwrap();
            assert!(result.success);
            assert_eq!(result.failed, 1);
            let queued = store.operations().await.unwrap();
            assert_eq!(queued.len(), 1);
            assert_eq!(queued[0].retry_count, attempt);
            assert!(queued[0].last_error.is_some());
        }

        let operation_id = store.operations().await.unwrap()[0].id;
        let result = engine.perform_sync(USER).await.unwrap();
        assert_eq!(result.failed, 0);
        assert!(store.get_operation(&operation_id).await.unwrap().is_none());
        assert!(store.operations().await.unwrap().is_empty());

        engine.perform_sync(USER).await.unwrap();
        assert_eq!(
            remote.writes(),
            vec![format!("insert lists {}", list.id)]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_of_vanished_remote_row_stays_queued() {
        let (engine, store, remote) = setup().await;
        let (list, _) = seeded_task();
        remote.put_row("lists", row(&list));
        engine.perform_sync(USER).await.unwrap();

        store
            .update_list(&list.id, fields(json!({"name": "Renamed"})))
            .await
            .unwrap();
        remote.drop_row("lists", &list.id.as_str());

        let result = engine.perform_sync(USER).await.unwrap();
        assert!(result.success);
        assert_eq!(result.failed, 1);
        assert!(result.errors[0].contains("No lists row"));
        let queued = store.operations().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].retry_count, 1);
        assert!(remote.writes().is_empty());

        engine.perform_sync(USER).await.unwrap();
        let cached = store
            .get_record::<List>(&list.id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert!(cached.is_dirty());
        assert_eq!(cached.record.name, "Renamed");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_is_scoped_to_the_owning_user() {
        let (engine, store, remote) = setup().await;
        let (list, _) = seeded_task();
        remote.put_row("lists", row(&list));
        engine.perform_sync(USER).await.unwrap();

        store
            .update_list(&list.id, fields(json!({"name": "Renamed"})))
            .await
            .unwrap();
        let mut foreign = row(&list);
        foreign["user_id"] = json!("user-2");
        remote.put_row("lists", foreign);

        let result = engine.perform_sync(USER).await.unwrap();
        assert_eq!(result.failed, 1);
        assert_eq!(remote.rows("lists")[0]["name"], "Work");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queued_delete_blocks_reinsert() {
        let (engine, store, remote) = setup().await;
        let (list, _) = seeded_task();
        remote.put_row("lists", row(&list));
        store.enqueue(&Operation::delete(&list)).await.unwrap();

        let result = engine.perform_sync(USER).await.unwrap();
        assert_eq!(result.synced, 1);
        assert!(store.lists(USER).await.unwrap().is_empty());
        assert!(remote.rows("lists").is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_pass_is_rejected_immediately() {
        let (remote, gate) = FakeRemote::gated();
        let store = LocalStore::open_in_memory().await.unwrap();
        store.create_list(&List::new(USER, "Pending")).await.unwrap();
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            remote,
            EventChannel::new(),
        ));

        let running = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.perform_sync(USER).await })
        };
        gate.entered.notified().await;
        assert!(engine.is_sync_in_progress());

        let rejected = engine.perform_sync(USER).await;
        assert!(matches!(rejected, Err(SyncError::InProgress)));
        assert_eq!(store.operations().await.unwrap().len(), 1);

        gate.release.notify_one();
        let result = running.await.unwrap().unwrap();
        assert!(result.success);
        assert!(!engine.is_sync_in_progress());
        assert!(store.operations().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pass_emits_started_and_finished() {
        let (engine, _store, _remote) = setup().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _subscription = engine.events().subscribe(move |event| {
            let name = match event {
                Event::SyncStarted { .. } => "started",
                Event::SyncFinished { result, .. } if result.success => "finished",
                _ => "other",
            };
            sink.lock().unwrap().push(name);
        });

        engine.perform_sync(USER).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["started", "finished"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn keep_remote_queues_remote_values() {
        let (engine, store, remote) = setup().await;
        let mut local = List::new(USER, "Local");
        local.updated_at = at(0);
        store
            .save_record(&CachedRecord::dirty(local.clone(), at(1), None))
            .await
            .unwrap();
        let mut newer = local.clone();
        newer.name = "Remote".to_string();
        newer.updated_at = at(2);
        remote.put_row("lists", row(&newer));

        let result = engine.perform_sync(USER).await.unwrap();
        let conflict = result.conflicts[0].clone();
        engine
            .resolve_conflict(USER, &conflict, ConflictResolution::KeepRemote)
            .await
            .unwrap();

        assert!(engine.conflicts().is_empty());
        let queued = store.operations().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].payload, json!({"name": "Remote"}));

        let result = engine.perform_sync(USER).await.unwrap();
        assert!(result.conflicts.is_empty());
        assert_eq!(remote.rows("lists")[0]["name"], "Remote");
        assert_eq!(store.lists(USER).await.unwrap()[0].name, "Remote");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn merge_resolution_applies_chosen_fields() {
        let (engine, store, remote) = setup().await;
        let mut local = List::new(USER, "Local");
        local.updated_at = at(0);
        store
            .save_record(&CachedRecord::dirty(local.clone(), at(1), None))
            .await
            .unwrap();
        let mut newer = local.clone();
        newer.name = "Remote".to_string();
        newer.updated_at = at(2);
        remote.put_row("lists", row(&newer));

        let conflict = engine.perform_sync(USER).await.unwrap().conflicts[0].clone();
        engine
            .resolve_conflict(
                USER,
                &conflict,
                ConflictResolution::Merge(fields(json!({"name": "Local + Remote"}))),
            )
            .await
            .unwrap();

        let cached = store
            .get_record::<List>(&local.id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert!(cached.is_dirty());
        assert_eq!(cached.record.name, "Local + Remote");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_rejects_foreign_conflict() {
        let (engine, _store, _remote) = setup().await;
        let list = List::new("someone-else", "Theirs");
        let conflict = Conflict {
            entity: EntityType::List,
            record_id: list.id.as_str(),
            local: row(&list),
            remote: row(&list),
            conflict_fields: vec!["name".to_string()],
        };

        let result = engine
            .resolve_conflict(USER, &conflict, ConflictResolution::KeepLocal)
            .await;
        assert!(matches!(result, Err(SyncError::Store(Error::InvalidInput(_)))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_counts_pending_operations() {
        let (engine, store, _remote) = setup().await;
        let list = List::new(USER, "Inbox");
        store.create_list(&list).await.unwrap();
        store
            .create_task(&Task::new(list.id, USER, "Call mom"))
            .await
            .unwrap();

        let status = engine.sync_status(USER).await.unwrap();
        assert_eq!(status.pending_operations, 2);
        assert!(status.last_sync.is_none());
        assert!(!status.has_conflicts);

        engine.perform_sync(USER).await.unwrap();
        let status = engine.sync_status(USER).await.unwrap();
        assert_eq!(status.pending_operations, 0);
        assert!(status.last_sync.is_some());
    }
}
