use std::env;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tasknest_core::{ConfigError, List, LocalStore, Operation, RemoteConfig, Task};

use crate::error::CliError;

const SHORT_ID_LEN: usize = 13;

#[derive(Debug, Serialize)]
pub struct ListItem {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub open_tasks: usize,
    pub updated_at: DateTime<Utc>,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct TaskItem {
    pub id: String,
    pub list_id: String,
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
    pub priority: String,
    pub due_date: Option<NaiveDate>,
    pub overdue: bool,
    pub updated_at: DateTime<Utc>,
}

/// A list or task matched by id or id prefix
#[derive(Debug)]
pub enum Target {
    List(List),
    Task(Task),
}

impl Target {
    pub fn id(&self) -> String {
        match self {
            Self::List(list) => list.id.to_string(),
            Self::Task(task) => task.id.to_string(),
        }
    }
}

pub async fn open_store(path: &Path) -> Result<LocalStore, CliError> {
    Ok(LocalStore::open_path(path).await?)
}

/// Resolve a list or task of `user_id` from a full id or a unique prefix.
pub async fn resolve_target(
    query: &str,
    user_id: &str,
    store: &LocalStore,
) -> Result<Target, CliError> {
    let query = normalize_identifier(query)?;
    let lists = store.lists(user_id).await?;
    let tasks = store
        .records_for_user::<Task>(user_id)
        .await?
        .into_iter()
        .map(|cached| cached.record)
        .collect::<Vec<_>>();

    if let Some(list) = lists.iter().find(|list| list.id.to_string() == query) {
        return Ok(Target::List(list.clone()));
    }
    if let Some(task) = tasks.iter().find(|task| task.id.to_string() == query) {
        return Ok(Target::Task(task.clone()));
    }

    let mut matches = lists
        .into_iter()
        .filter(|list| list.id.to_string().starts_with(&query))
        .map(Target::List)
        .chain(
            tasks
                .into_iter()
                .filter(|task| task.id.to_string().starts_with(&query))
                .map(Target::Task),
        )
        .collect::<Vec<_>>();

    match matches.len() {
        0 => Err(CliError::NotFound(query)),
        1 => Ok(matches.remove(0)),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|target| short_id(&target.id()))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub async fn resolve_list(
    query: &str,
    user_id: &str,
    store: &LocalStore,
) -> Result<List, CliError> {
    match resolve_target(query, user_id, store).await? {
        Target::List(list) => Ok(list),
        Target::Task(task) => Err(CliError::InvalidTarget(format!(
            "{} is a task, expected a list",
            short_id(&task.id.to_string())
        ))),
    }
}

pub async fn resolve_task(
    query: &str,
    user_id: &str,
    store: &LocalStore,
) -> Result<Task, CliError> {
    match resolve_target(query, user_id, store).await? {
        Target::Task(task) => Ok(task),
        Target::List(list) => Err(CliError::InvalidTarget(format!(
            "{} is a list, expected a task",
            short_id(&list.id.to_string())
        ))),
    }
}

/// Open tasks first, then by priority, due date and age.
pub fn sort_tasks(tasks: &mut [Task]) {
    tasks.sort_by(|left, right| {
        left.completed
            .cmp(&right.completed)
            .then_with(|| priority_rank(right).cmp(&priority_rank(left)))
            .then_with(|| match (left.due_date, right.due_date) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| left.created_at.cmp(&right.created_at))
    });
}

const fn priority_rank(task: &Task) -> u8 {
    match task.priority {
        tasknest_core::Priority::Low => 0,
        tasknest_core::Priority::Medium => 1,
        tasknest_core::Priority::High => 2,
    }
}

pub fn format_list_lines(lists: &[(List, usize)]) -> Vec<String> {
    let now = Utc::now();
    lists
        .iter()
        .map(|(list, open_tasks)| {
            let short_id = short_id(&list.id.to_string());
            let name = preview(&list.name, 32);
            let relative_time = format_relative_time(list.updated_at, now);
            format!("{short_id:<13}  {name:<32}  {open_tasks:>3} open  {relative_time}")
        })
        .collect()
}

pub fn list_to_item(list: &List, open_tasks: usize) -> ListItem {
    ListItem {
        id: list.id.to_string(),
        name: list.name.clone(),
        description: list.description.clone(),
        open_tasks,
        updated_at: list.updated_at,
        relative_time: format_relative_time(list.updated_at, Utc::now()),
    }
}

pub fn format_task_lines(tasks: &[Task], today: NaiveDate) -> Vec<String> {
    tasks
        .iter()
        .map(|task| {
            let short_id = short_id(&task.id.to_string());
            let mark = if task.completed { "[x]" } else { "[ ]" };
            let title = preview(&task.title, 40);
            let priority = task.priority.to_string();
            let mut line = format!("{short_id:<13}  {mark}  {title:<40}  {priority:<6}");
            if let Some(due) = task.due_date {
                line.push_str(&format!("  due {due}"));
                if task.is_overdue(today) {
                    line.push_str(" (overdue)");
                }
            }
            line.trim_end().to_string()
        })
        .collect()
}

pub fn task_to_item(task: &Task, today: NaiveDate) -> TaskItem {
    TaskItem {
        id: task.id.to_string(),
        list_id: task.list_id.to_string(),
        title: task.title.clone(),
        description: task.description.clone(),
        completed: task.completed,
        priority: task.priority.to_string(),
        due_date: task.due_date,
        overdue: task.is_overdue(today),
        updated_at: task.updated_at,
    }
}

pub fn format_operation_lines(operations: &[Operation]) -> Vec<String> {
    operations
        .iter()
        .map(|operation| {
            let record = operation
                .record_id
                .as_deref()
                .map_or_else(|| "-".to_string(), short_id);
            let mut line = format!(
                "{}  {:<6}  {:<6}  {record:<13}  retries={}",
                short_id(&operation.id.to_string()),
                operation.kind.to_string(),
                operation.table,
                operation.retry_count
            );
            if let Some(error) = &operation.last_error {
                line.push_str(&format!("  last_error={}", preview(error, 60)));
            }
            line
        })
        .collect()
}

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

pub fn preview(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_timestamp(timestamp: Option<DateTime<Utc>>) -> String {
    timestamp.map_or_else(
        || "never".to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now
        .signed_duration_since(timestamp)
        .num_milliseconds()
        .max(0);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn normalize_title(parts: &[String]) -> Result<String, CliError> {
    let joined = parts.join(" ");
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyTitle)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn parse_due_date(value: &str) -> Result<NaiveDate, CliError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| CliError::InvalidDueDate(value.to_string()))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("TASKNEST_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tasknest")
        .join("tasknest.db")
}

pub fn resolve_user_id(cli_user: Option<String>) -> Result<String, CliError> {
    cli_user
        .or_else(|| env::var("TASKNEST_USER_ID").ok())
        .map(|user| user.trim().to_string())
        .filter(|user| !user.is_empty())
        .ok_or(CliError::MissingUser)
}

/// Remote settings, with missing variables reported as an unconfigured sync.
pub fn remote_config_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<RemoteConfig, CliError> {
    match RemoteConfig::from_lookup(lookup) {
        Ok(config) => Ok(config),
        Err(ConfigError::MissingVar(_)) => Err(CliError::SyncNotConfigured),
        Err(error) => Err(error.into()),
    }
}

pub fn remote_config_from_env() -> Result<RemoteConfig, CliError> {
    remote_config_from_lookup(|name| env::var(name).ok())
}
