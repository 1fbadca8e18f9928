use std::path::Path;

use serde_json::{json, Map, Value};
use tasknest_core::Priority;

use crate::commands::common::{open_store, parse_due_date, resolve_target, resolve_task, Target};
use crate::error::CliError;

/// Field changes requested on the command line
#[derive(Debug, Default)]
pub struct EditArgs {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub due: Option<String>,
}

impl EditArgs {
    const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.due.is_none()
    }

    fn list_changes(&self) -> Result<Map<String, Value>, CliError> {
        if self.priority.is_some() || self.due.is_some() {
            return Err(CliError::InvalidTarget(
                "lists have no priority or due date".to_string(),
            ));
        }

        let mut changes = Map::new();
        if let Some(name) = &self.title {
            changes.insert("name".to_string(), json!(required_text(name)?));
        }
        if let Some(description) = &self.description {
            changes.insert("description".to_string(), optional_text(description));
        }
        Ok(changes)
    }

    fn task_changes(&self) -> Result<Map<String, Value>, CliError> {
        let mut changes = Map::new();
        if let Some(title) = &self.title {
            changes.insert("title".to_string(), json!(required_text(title)?));
        }
        if let Some(description) = &self.description {
            changes.insert("description".to_string(), optional_text(description));
        }
        if let Some(priority) = self.priority {
            changes.insert("priority".to_string(), json!(priority));
        }
        if let Some(due) = &self.due {
            let value = if due.trim().is_empty() {
                Value::Null
            } else {
                json!(parse_due_date(due)?)
            };
            changes.insert("due_date".to_string(), value);
        }
        Ok(changes)
    }
}

fn required_text(value: &str) -> Result<String, CliError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyTitle)
    } else {
        Ok(trimmed.to_string())
    }
}

fn optional_text(value: &str) -> Value {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Value::Null
    } else {
        json!(trimmed)
    }
}

pub async fn run_edit(
    id: &str,
    edit: EditArgs,
    user_id: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    if edit.is_empty() {
        return Err(CliError::NothingToEdit);
    }

    let store = open_store(db_path).await?;
    match resolve_target(id, user_id, &store).await? {
        Target::List(list) => {
            let updated = store.update_list(&list.id, edit.list_changes()?).await?;
            println!("{}", updated.id);
        }
        Target::Task(task) => {
            let updated = store.update_task(&task.id, edit.task_changes()?).await?;
            println!("{}", updated.id);
        }
    }

    Ok(())
}

pub async fn run_complete(
    id: &str,
    completed: bool,
    user_id: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let task = resolve_task(id, user_id, &store).await?;
    let updated = store.set_task_completed(&task.id, completed).await?;

    let mark = if updated.completed { "[x]" } else { "[ ]" };
    println!("{mark} {}", updated.title);
    Ok(())
}
