use std::path::Path;

use crate::commands::common::open_store;
use crate::error::CliError;

pub async fn run_cache_list(db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let names = store.cache_names().await?;
    if names.is_empty() {
        println!("No caches.");
        return Ok(());
    }

    for name in names {
        let entries = store.cache_entry_count(&name).await?;
        println!("{name:<24}  {entries} entries");
    }
    Ok(())
}

pub async fn run_cache_clear(db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let mut deleted = 0usize;
    for name in store.cache_names().await? {
        if store.delete_cache(&name).await? {
            deleted += 1;
        }
    }
    println!("Deleted {deleted} caches");
    Ok(())
}
