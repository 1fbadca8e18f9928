use std::path::Path;

use tasknest_core::{List, Priority, Task};

use crate::commands::common::{normalize_title, open_store, parse_due_date, resolve_list};
use crate::error::CliError;

pub async fn run_add_list(
    name_parts: &[String],
    description: Option<&str>,
    user_id: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let name = normalize_title(name_parts)?;
    let mut list = List::new(user_id, name);
    if let Some(description) = description.map(str::trim).filter(|text| !text.is_empty()) {
        list = list.with_description(description);
    }

    let store = open_store(db_path).await?;
    store.create_list(&list).await?;

    println!("{}", list.id);
    Ok(())
}

pub async fn run_add_task(
    list_query: &str,
    title_parts: &[String],
    priority: Option<Priority>,
    due: Option<&str>,
    user_id: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let title = normalize_title(title_parts)?;
    let due_date = due.map(parse_due_date).transpose()?;

    let store = open_store(db_path).await?;
    let list = resolve_list(list_query, user_id, &store).await?;

    let mut task = Task::new(list.id, user_id, title);
    if let Some(priority) = priority {
        task = task.with_priority(priority);
    }
    if let Some(due_date) = due_date {
        task = task.with_due_date(due_date);
    }
    store.create_task(&task).await?;

    println!("{}", task.id);
    Ok(())
}
