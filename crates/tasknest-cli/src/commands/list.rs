use std::path::Path;

use chrono::Utc;

use crate::commands::common::{
    format_list_lines, format_task_lines, list_to_item, open_store, resolve_list, sort_tasks,
    task_to_item, ListItem, TaskItem,
};
use crate::error::CliError;

pub async fn run_lists(user_id: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let mut lists = Vec::new();
    for list in store.lists(user_id).await? {
        let open_tasks = store
            .tasks_in_list(&list.id.to_string())
            .await?
            .iter()
            .filter(|task| !task.completed)
            .count();
        lists.push((list, open_tasks));
    }

    if as_json {
        let json_items = lists
            .iter()
            .map(|(list, open_tasks)| list_to_item(list, *open_tasks))
            .collect::<Vec<ListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if lists.is_empty() {
        println!("No lists yet. Create one with `tasknest add-list <name>`.");
    } else {
        for line in format_list_lines(&lists) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn run_tasks(
    list_query: &str,
    include_completed: bool,
    as_json: bool,
    user_id: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let list = resolve_list(list_query, user_id, &store).await?;
    let mut tasks = store.tasks_in_list(&list.id.to_string()).await?;
    if !include_completed {
        tasks.retain(|task| !task.completed);
    }
    sort_tasks(&mut tasks);

    let today = Utc::now().date_naive();
    if as_json {
        let json_items = tasks
            .iter()
            .map(|task| task_to_item(task, today))
            .collect::<Vec<TaskItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        println!("{}", list.name);
        for line in format_task_lines(&tasks, today) {
            println!("  {line}");
        }
    }

    Ok(())
}
