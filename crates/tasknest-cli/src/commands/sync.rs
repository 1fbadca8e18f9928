use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tasknest_core::{
    ConflictResolution, EventChannel, LocalStore, RemoteStore, RestRemoteStore, SyncEngine,
    SyncResult,
};

use crate::cli::ConflictStrategy;
use crate::commands::common::{format_timestamp, open_store, remote_config_from_env, short_id};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub user_id: String,
    pub last_sync: Option<chrono::DateTime<chrono::Utc>>,
    pub pending_operations: usize,
    pub unsynced_records: usize,
}

impl From<ConflictStrategy> for ConflictResolution {
    fn from(strategy: ConflictStrategy) -> Self {
        match strategy {
            ConflictStrategy::KeepLocal => Self::KeepLocal,
            ConflictStrategy::KeepRemote => Self::KeepRemote,
        }
    }
}

pub async fn run_sync(
    timeout_secs: Option<u64>,
    on_conflict: Option<ConflictStrategy>,
    as_json: bool,
    user_id: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let config = remote_config_from_env()?;
    let remote = RestRemoteStore::from_config(&config)?;
    let store = open_store(db_path).await?;

    let result = sync_with_remote(store, remote, user_id, timeout_secs, on_conflict).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    for line in format_sync_result_lines(&result) {
        println!("{line}");
    }
    if let Some(strategy) = on_conflict.filter(|_| !result.conflicts.is_empty()) {
        println!("Resolved {} conflicts ({strategy:?})", result.conflicts.len());
    }
    Ok(())
}

/// Run one pass and optionally settle the conflicts it reports.
pub async fn sync_with_remote<R: RemoteStore>(
    store: LocalStore,
    remote: R,
    user_id: &str,
    timeout_secs: Option<u64>,
    on_conflict: Option<ConflictStrategy>,
) -> Result<SyncResult, CliError> {
    let engine = SyncEngine::new(store, remote, EventChannel::new());
    let _subscription = engine
        .events()
        .subscribe(|event| tracing::debug!("Sync event: {event:?}"));

    let pass = engine.perform_sync(user_id);
    let result = match timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), pass)
            .await
            .map_err(|_| CliError::SyncTimedOut(secs))??,
        None => pass.await?,
    };

    if let Some(strategy) = on_conflict {
        for conflict in &result.conflicts {
            engine
                .resolve_conflict(user_id, conflict, strategy.into())
                .await?;
        }
    }

    Ok(result)
}

pub fn format_sync_result_lines(result: &SyncResult) -> Vec<String> {
    let mut lines = vec![format!(
        "Sync {}: {} synced, {} failed",
        result.outcome(),
        result.synced,
        result.failed
    )];
    lines.extend(result.conflicts.iter().map(|conflict| {
        format!(
            "conflict  {:<4}  {}  fields={}",
            conflict.entity.to_string(),
            short_id(&conflict.record_id),
            conflict.conflict_fields.join(",")
        )
    }));
    lines.extend(result.errors.iter().map(|error| format!("error  {error}")));
    lines
}

pub async fn load_status(user_id: &str, store: &LocalStore) -> Result<StatusItem, CliError> {
    Ok(StatusItem {
        user_id: user_id.to_string(),
        last_sync: store.sync_metadata().await?.last_sync,
        pending_operations: store.pending_count(user_id).await?,
        unsynced_records: store.dirty_count(user_id).await?,
    })
}

pub async fn run_status(as_json: bool, user_id: &str, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let status = load_status(user_id, &store).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("User:               {}", status.user_id);
    println!("Last sync:          {}", format_timestamp(status.last_sync));
    println!("Pending operations: {}", status.pending_operations);
    println!("Unsynced records:   {}", status.unsynced_records);
    Ok(())
}
