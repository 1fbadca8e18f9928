use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Duration, NaiveDate, Utc};
use tasknest_core::{
    Conflict, EntityType, List, LocalStore, OperationKind, Priority, SyncResult, Task,
};

use crate::cli::CompletionShell;
use crate::commands::add::{run_add_list, run_add_task};
use crate::commands::common::{
    format_relative_time, format_task_lines, normalize_identifier, normalize_title, parse_due_date,
    preview, remote_config_from_lookup, resolve_target, resolve_user_id, sort_tasks, Target,
};
use crate::commands::completions::run_completions;
use crate::commands::delete::run_delete;
use crate::commands::edit::{run_complete, run_edit, EditArgs};
use crate::commands::sync::{format_sync_result_lines, load_status};
use crate::error::CliError;

const USER: &str = "user-1";

#[test]
fn normalize_title_trims_and_rejects_empty() {
    assert_eq!(
        normalize_title(&["  Buy".to_string(), "milk  ".to_string()]).unwrap(),
        "Buy milk"
    );
    assert!(matches!(
        normalize_title(&[" \t ".to_string()]),
        Err(CliError::EmptyTitle)
    ));
}

#[test]
fn normalize_identifier_rejects_empty() {
    assert!(matches!(normalize_identifier("   "), Err(CliError::EmptyId)));
    assert_eq!(normalize_identifier(" abc ").unwrap(), "abc");
}

#[test]
fn parse_due_date_accepts_iso_dates_only() {
    assert_eq!(
        parse_due_date("2026-03-01").unwrap(),
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    );
    assert!(matches!(
        parse_due_date("03/01/2026"),
        Err(CliError::InvalidDueDate(_))
    ));
}

#[test]
fn format_relative_time_units() {
    let now = Utc::now();
    assert_eq!(format_relative_time(now - Duration::seconds(30), now), "just now");
    assert_eq!(format_relative_time(now - Duration::minutes(2), now), "2m ago");
    assert_eq!(format_relative_time(now - Duration::hours(2), now), "2h ago");
    assert_eq!(format_relative_time(now + Duration::hours(1), now), "just now");
}

#[test]
fn preview_truncates_with_ellipsis() {
    assert_eq!(
        preview("This is a very long sentence that should be shortened", 20),
        "This is a very lo..."
    );
    assert_eq!(preview("first line\nsecond", 20), "first line");
}

#[test]
fn resolve_user_id_prefers_cli_value() {
    assert_eq!(resolve_user_id(Some(" user-9 ".to_string())).unwrap(), "user-9");
}

#[test]
fn sort_tasks_puts_open_high_priority_first() {
    let list = List::new(USER, "Inbox");
    let mut done = Task::new(list.id, USER, "Done").with_priority(Priority::High);
    done.completed = true;
    let low = Task::new(list.id, USER, "Low").with_priority(Priority::Low);
    let high = Task::new(list.id, USER, "High").with_priority(Priority::High);
    let mut tasks = vec![done, low, high];

    sort_tasks(&mut tasks);

    let titles = tasks.iter().map(|task| task.title.as_str()).collect::<Vec<_>>();
    assert_eq!(titles, vec!["High", "Low", "Done"]);
}

#[test]
fn format_task_lines_flags_overdue_tasks() {
    let list = List::new(USER, "Inbox");
    let task = Task::new(list.id, USER, "Pay rent")
        .with_due_date(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
    let today = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();

    let lines = format_task_lines(&[task], today);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("[ ]"));
    assert!(lines[0].contains("Pay rent"));
    assert!(lines[0].contains("due 2026-01-01 (overdue)"));
}

#[test]
fn remote_config_reports_missing_variables_as_unconfigured() {
    let error = remote_config_from_lookup(|_| None).unwrap_err();
    assert!(matches!(error, CliError::SyncNotConfigured));

    let values = HashMap::from([
        ("TASKNEST_REMOTE_URL".to_string(), "ftp://nope".to_string()),
        ("TASKNEST_REMOTE_ANON_KEY".to_string(), "anon".to_string()),
    ]);
    let error = remote_config_from_lookup(move |key| values.get(key).cloned()).unwrap_err();
    assert!(matches!(error, CliError::Config(_)));
}

#[test]
fn format_sync_result_lines_include_conflicts_and_errors() {
    let result = SyncResult {
        success: true,
        synced: 3,
        failed: 1,
        conflicts: vec![Conflict {
            entity: EntityType::List,
            record_id: "0190a1b2-c3d4-7000-8000-000000000001".to_string(),
            local: serde_json::json!({"name": "Local"}),
            remote: serde_json::json!({"name": "Remote"}),
            conflict_fields: vec!["name".to_string()],
        }],
        errors: vec!["Failed to update tasks 1: boom".to_string()],
    };

    let lines = format_sync_result_lines(&result);
    assert_eq!(lines[0], "Sync success with conflicts: 3 synced, 1 failed");
    assert!(lines[1].contains("list"));
    assert!(lines[1].contains("0190a1b2-c3d4"));
    assert!(lines[1].contains("fields=name"));
    assert_eq!(lines[2], "error  Failed to update tasks 1: boom");
}

#[tokio::test(flavor = "current_thread")]
async fn add_commands_cache_records_and_queue_creates() {
    let db_path = unique_test_db_path();

    run_add_list(&["Groceries".to_string()], Some("weekly"), USER, &db_path)
        .await
        .unwrap();
    let store = LocalStore::open_path(&db_path).await.unwrap();
    let lists = store.lists(USER).await.unwrap();
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0].description.as_deref(), Some("weekly"));
    drop(store);

    let list_id = lists[0].id.to_string();
    run_add_task(
        &list_id[..13],
        &["Milk".to_string()],
        Some(Priority::High),
        Some("2026-05-01"),
        USER,
        &db_path,
    )
    .await
    .unwrap();

    let store = LocalStore::open_path(&db_path).await.unwrap();
    let tasks = store.tasks_in_list(&list_id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Milk");
    assert_eq!(tasks[0].priority, Priority::High);

    let kinds = store
        .operations()
        .await
        .unwrap()
        .iter()
        .map(|operation| (operation.kind, operation.table.clone()))
        .collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![
            (OperationKind::Create, "lists".to_string()),
            (OperationKind::Create, "tasks".to_string()),
        ]
    );

    cleanup_db_files(&db_path);
}

#[tokio::test(flavor = "current_thread")]
async fn resolve_target_supports_exact_and_prefix_id() {
    let db_path = unique_test_db_path();
    let store = LocalStore::open_path(&db_path).await.unwrap();
    let list = List::new(USER, "Work");
    store.create_list(&list).await.unwrap();
    let task = Task::new(list.id, USER, "Ship it");
    store.create_task(&task).await.unwrap();

    let exact = resolve_target(&task.id.to_string(), USER, &store).await.unwrap();
    assert!(matches!(exact, Target::Task(found) if found.id == task.id));

    let by_prefix = resolve_target(&list.id.to_string()[..30], USER, &store)
        .await
        .unwrap();
    assert!(matches!(by_prefix, Target::List(found) if found.id == list.id));

    let list_id = list.id.to_string();
    let task_id = task.id.to_string();
    let shared = list_id
        .chars()
        .zip(task_id.chars())
        .take_while(|(left, right)| left == right)
        .map(|(left, _)| left)
        .collect::<String>();
    assert!(!shared.is_empty());
    let ambiguous = resolve_target(&shared, USER, &store).await.unwrap_err();
    assert!(matches!(ambiguous, CliError::AmbiguousId(_)));

    let missing = resolve_target("ffffffff", USER, &store).await.unwrap_err();
    assert!(matches!(missing, CliError::NotFound(_)));

    let foreign = resolve_target(&list_id, "user-2", &store).await.unwrap_err();
    assert!(matches!(foreign, CliError::NotFound(_)));

    cleanup_db_files(&db_path);
}

#[tokio::test(flavor = "current_thread")]
async fn edit_and_complete_queue_updates() {
    let db_path = unique_test_db_path();
    let list = List::new(USER, "Home");
    let task = Task::new(list.id, USER, "Vacuum");
    {
        let store = LocalStore::open_path(&db_path).await.unwrap();
        store.create_list(&list).await.unwrap();
        store.create_task(&task).await.unwrap();
    }

    let rename = EditArgs {
        title: Some("House".to_string()),
        ..EditArgs::default()
    };
    run_edit(&list.id.to_string(), rename, USER, &db_path)
        .await
        .unwrap();

    let invalid = EditArgs {
        priority: Some(Priority::Low),
        ..EditArgs::default()
    };
    let error = run_edit(&list.id.to_string(), invalid, USER, &db_path)
        .await
        .unwrap_err();
    assert!(matches!(error, CliError::InvalidTarget(_)));

    let error = run_edit(&task.id.to_string(), EditArgs::default(), USER, &db_path)
        .await
        .unwrap_err();
    assert!(matches!(error, CliError::NothingToEdit));

    run_complete(&task.id.to_string(), true, USER, &db_path)
        .await
        .unwrap();

    let store = LocalStore::open_path(&db_path).await.unwrap();
    assert_eq!(store.lists(USER).await.unwrap()[0].name, "House");
    let tasks = store.tasks_in_list(&list.id.to_string()).await.unwrap();
    assert!(tasks[0].completed);
    let operations = store.operations().await.unwrap();
    assert_eq!(operations.len(), 4);
    assert_eq!(operations[2].kind, OperationKind::Update);
    assert_eq!(operations[2].payload, serde_json::json!({"name": "House"}));
    assert_eq!(operations[3].payload, serde_json::json!({"completed": true}));

    cleanup_db_files(&db_path);
}

#[tokio::test(flavor = "current_thread")]
async fn run_delete_removes_task_and_queues_delete() {
    let db_path = unique_test_db_path();
    let list = List::new(USER, "Errands");
    let task = Task::new(list.id, USER, "Post office");
    {
        let store = LocalStore::open_path(&db_path).await.unwrap();
        store.create_list(&list).await.unwrap();
        store.create_task(&task).await.unwrap();
    }

    run_delete(&task.id.to_string(), USER, &db_path)
        .await
        .unwrap();

    let store = LocalStore::open_path(&db_path).await.unwrap();
    assert!(store
        .tasks_in_list(&list.id.to_string())
        .await
        .unwrap()
        .is_empty());
    let last = store.operations().await.unwrap().pop().unwrap();
    assert_eq!(last.kind, OperationKind::Delete);
    assert_eq!(last.record_id, Some(task.id.to_string()));

    cleanup_db_files(&db_path);
}

#[tokio::test(flavor = "current_thread")]
async fn load_status_counts_pending_work() {
    let db_path = unique_test_db_path();
    let store = LocalStore::open_path(&db_path).await.unwrap();
    store.create_list(&List::new(USER, "One")).await.unwrap();
    store.create_list(&List::new(USER, "Two")).await.unwrap();
    store.create_list(&List::new("user-2", "Other")).await.unwrap();

    let status = load_status(USER, &store).await.unwrap();
    assert_eq!(status.user_id, USER);
    assert_eq!(status.last_sync, None);
    assert_eq!(status.pending_operations, 2);
    assert_eq!(status.unsynced_records, 2);

    cleanup_db_files(&db_path);
}

#[test]
fn run_completions_writes_bash_script_file() {
    let output_path = std::env::temp_dir().join(format!(
        "tasknest-completions-test-{}.bash",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_nanos())
    ));

    run_completions(CompletionShell::Bash, Some(&output_path)).unwrap();

    let script = std::fs::read_to_string(&output_path).unwrap();
    assert!(script.contains("_tasknest()"));
    assert!(script.contains("complete -F _tasknest"));

    let _ = std::fs::remove_file(output_path);
}

fn unique_test_db_path() -> PathBuf {
    static NEXT_TEST_DB_ID: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    let sequence = NEXT_TEST_DB_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("tasknest-cli-test-{timestamp}-{sequence}.db"))
}

fn cleanup_db_files(path: &PathBuf) {
    // libsql can keep file handles alive briefly after drop on Windows.
    if cfg!(windows) {
        return;
    }

    let _ = std::fs::remove_file(path);
    let _ = std::fs::remove_file(path.with_extension("db-shm"));
    let _ = std::fs::remove_file(path.with_extension("db-wal"));
}
