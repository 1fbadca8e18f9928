use std::path::Path;

use crate::commands::common::{format_operation_lines, open_store};
use crate::error::CliError;

pub async fn run_queue_list(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let operations = store.operations().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&operations)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for line in format_operation_lines(&operations) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_queue_clear(db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let removed = store.clear_queue().await?;
    println!("Cleared {removed} queued operations");
    Ok(())
}
