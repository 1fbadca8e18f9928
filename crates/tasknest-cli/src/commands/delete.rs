use std::path::Path;

use crate::commands::common::{open_store, resolve_target, Target};
use crate::error::CliError;

pub async fn run_delete(id: &str, user_id: &str, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let target = resolve_target(id, user_id, &store).await?;

    match &target {
        Target::List(list) => store.delete_list(&list.id).await?,
        Target::Task(task) => store.delete_task(&task.id).await?,
    }

    println!("{}", target.id());
    Ok(())
}
