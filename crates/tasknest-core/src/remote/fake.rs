//! In-memory remote store for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Notify;

use super::{RemoteError, RemoteResult, RemoteStore};

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<Value>>,
    failing_selects: HashSet<String>,
    failing_writes: u32,
    writes: Vec<String>,
}

/// Pauses the first `select` until released, so a pass can be held in flight.
pub struct Gate {
    armed: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<State>>,
    gate: Option<Arc<Gate>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> (Self, Arc<Gate>) {
        let gate = Arc::new(Gate {
            armed: AtomicBool::new(true),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let remote = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (remote, gate)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn put_row(&self, table: &str, row: Value) {
        self.with_state(|state| {
            let rows = state.tables.entry(table.to_string()).or_default();
            rows.retain(|existing| existing["id"] != row["id"]);
            rows.push(row);
        });
    }

    pub fn drop_row(&self, table: &str, id: &str) {
        self.with_state(|state| {
            if let Some(rows) = state.tables.get_mut(table) {
                rows.retain(|row| row["id"] != id);
            }
        });
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.with_state(|state| state.tables.get(table).cloned().unwrap_or_default())
    }

    pub fn fail_select(&self, table: &str) {
        self.with_state(|state| {
            state.failing_selects.insert(table.to_string());
        });
    }

    /// Make the next `count` writes fail.
    pub fn fail_writes(&self, count: u32) {
        self.with_state(|state| state.failing_writes = count);
    }

    /// Log of applied writes, e.g. `insert lists a1`.
    pub fn writes(&self) -> Vec<String> {
        self.with_state(|state| state.writes.clone())
    }

    fn take_write_failure(state: &mut State) -> RemoteResult<()> {
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(RemoteError::Api {
                status: 503,
                message: "remote unavailable".to_string(),
            });
        }
        Ok(())
    }
}

fn stamp(row: &mut Value) {
    if let Value::Object(object) = row {
        object.insert(
            "updated_at".to_string(),
            serde_json::to_value(Utc::now()).unwrap_or(Value::Null),
        );
    }
}

fn row_id(row: &Value) -> String {
    row["id"].as_str().unwrap_or_default().to_string()
}

fn matches_row(row: &Value, id: &str, user_id: Option<&str>) -> bool {
    row["id"] == id && user_id.map_or(true, |user_id| row["user_id"] == user_id)
}

impl RemoteStore for FakeRemote {
    async fn select(&self, table: &str, user_id: &str) -> RemoteResult<Vec<Value>> {
        if let Some(gate) = self
            .gate
            .as_ref()
            .filter(|gate| gate.armed.swap(false, Ordering::SeqCst))
        {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.with_state(|state| {
            if state.failing_selects.contains(table) {
                return Err(RemoteError::Api {
                    status: 500,
                    message: format!("{table} unavailable"),
                });
            }
            Ok(state
                .tables
                .get(table)
                .map(|rows| {
                    rows.iter()
                        .filter(|row| row["user_id"] == user_id)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    async fn insert(&self, table: &str, row: &Value) -> RemoteResult<Option<Value>> {
        self.with_state(|state| {
            Self::take_write_failure(state)?;
            let mut stored = row.clone();
            stamp(&mut stored);
            state.writes.push(format!("insert {table} {}", row_id(&stored)));
            let rows = state.tables.entry(table.to_string()).or_default();
            rows.retain(|existing| existing["id"] != stored["id"]);
            rows.push(stored.clone());
            Ok(Some(stored))
        })
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        user_id: Option<&str>,
        changes: &Value,
    ) -> RemoteResult<Option<Value>> {
        self.with_state(|state| {
            Self::take_write_failure(state)?;
            let Some(row) = state
                .tables
                .get_mut(table)
                .and_then(|rows| rows.iter_mut().find(|row| matches_row(row, id, user_id)))
            else {
                return Err(RemoteError::Api {
                    status: 404,
                    message: format!("No {table} row with id {id}"),
                });
            };
            if let (Value::Object(target), Value::Object(changes)) = (&mut *row, changes) {
                for (key, value) in changes {
                    target.insert(key.clone(), value.clone());
                }
            }
            stamp(row);
            let updated = row.clone();
            state.writes.push(format!("update {table} {id}"));
            Ok(Some(updated))
        })
    }

    async fn delete(&self, table: &str, id: &str, user_id: Option<&str>) -> RemoteResult<()> {
        self.with_state(|state| {
            Self::take_write_failure(state)?;
            state.writes.push(format!("delete {table} {id}"));
            if let Some(rows) = state.tables.get_mut(table) {
                rows.retain(|row| !matches_row(row, id, user_id));
            }
            Ok(())
        })
    }
}
