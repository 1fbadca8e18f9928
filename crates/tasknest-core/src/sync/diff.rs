//! Per-record reconciliation decisions.
//!
//! Pure functions: given the cached copy and the remote copy of one record,
//! decide what the local store should end up holding.

use serde_json::{Map, Value};

use crate::error::Result;
use crate::models::{CachedRecord, Conflict, SyncEntity};

/// What to do with one record id seen locally, remotely or both.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision<T> {
    /// Local and remote agree
    Unchanged,
    /// Remote-only record to cache (subject to queued deletes)
    Insert(T),
    /// Clean local record no longer exists remotely
    Remove,
    /// Clean local record replaced by the newer remote copy
    Overwrite(T),
    /// Local edits stand; their queued operations push them
    KeepLocal,
    /// Disjoint edits combined into one record. It stays dirty, based on the
    /// remote copy, until its queued local fields are pushed.
    Merged(CachedRecord<T>),
    /// Overlapping edits; the local record is stored clean as given
    Conflict(Conflict, T),
}

/// Comparable fields whose values differ between two snapshots, in declared
/// field order.
pub fn changed_fields<T: SyncEntity>(
    left: &Map<String, Value>,
    right: &Map<String, Value>,
) -> Vec<&'static str> {
    T::COMPARABLE_FIELDS
        .iter()
        .copied()
        .filter(|field| left.get(*field) != right.get(*field))
        .collect()
}

pub fn reconcile<T: SyncEntity>(
    local: Option<&CachedRecord<T>>,
    remote: Option<&T>,
) -> Result<Decision<T>> {
    match (local, remote) {
        (None, None) => Ok(Decision::Unchanged),
        (None, Some(remote)) => Ok(Decision::Insert(remote.clone())),
        (Some(local), None) if local.is_dirty() => Ok(Decision::KeepLocal),
        (Some(_), None) => Ok(Decision::Remove),
        (Some(local), Some(remote)) if !local.is_dirty() => {
            let same_fields = local.record.comparable_values()? == remote.comparable_values()?;
            if same_fields && local.record.updated_at() == remote.updated_at() {
                Ok(Decision::Unchanged)
            } else {
                Ok(Decision::Overwrite(remote.clone()))
            }
        }
        (Some(local), Some(remote)) => reconcile_dirty(local, remote),
    }
}

fn reconcile_dirty<T: SyncEntity>(local: &CachedRecord<T>, remote: &T) -> Result<Decision<T>> {
    let local_values = local.record.comparable_values()?;
    let remote_values = remote.comparable_values()?;
    let base_values = local
        .base
        .as_ref()
        .map(T::comparable_values)
        .transpose()?;

    let remote_untouched = remote.updated_at() <= local.record.updated_at()
        || base_values.as_ref() == Some(&remote_values);
    if remote_untouched {
        return Ok(Decision::KeepLocal);
    }

    let (local_changed, remote_changed) = match &base_values {
        Some(base) => (
            changed_fields::<T>(&local_values, base),
            changed_fields::<T>(&remote_values, base),
        ),
        None => {
            let differing = changed_fields::<T>(&local_values, &remote_values);
            (differing.clone(), differing)
        }
    };

    let conflict_fields: Vec<String> = local_changed
        .iter()
        .filter(|field| remote_changed.contains(*field))
        .filter(|field| local_values.get(**field) != remote_values.get(**field))
        .map(|field| (*field).to_string())
        .collect();

    if !conflict_fields.is_empty() {
        let conflict = Conflict {
            entity: T::ENTITY,
            record_id: local.record.record_id(),
            local: Value::Object(local.record.to_object()?),
            remote: Value::Object(remote.to_object()?),
            conflict_fields,
        };
        let kept = remote.with_fields(&local_values)?;
        return Ok(Decision::Conflict(conflict, kept));
    }

    let local_edits: Map<String, Value> = local_changed
        .iter()
        .filter_map(|field| {
            local_values
                .get(*field)
                .map(|value| ((*field).to_string(), value.clone()))
        })
        .collect();
    let merged = remote.with_fields(&local_edits)?;
    let unpushed = merged.comparable_values()? != remote_values;
    Ok(Decision::Merged(match local.locally_modified_at {
        Some(modified_at) if unpushed => {
            CachedRecord::dirty(merged, modified_at, Some(remote.clone()))
        }
        _ => CachedRecord::clean(merged),
    }))
}
