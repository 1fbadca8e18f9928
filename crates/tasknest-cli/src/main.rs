//! TaskNest CLI - offline-first task lists from the terminal
//!
//! Every edit lands in the local store first and is queued for the remote;
//! `tasknest sync` reconciles both sides.

mod cli;
mod commands;
mod error;
#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{CacheCommands, Cli, Commands, QueueCommands};
use crate::commands::common::{resolve_db_path, resolve_user_id};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tasknest=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Completions { shell, output } => {
            commands::completions::run_completions(shell, output.as_deref())?;
        }
        Commands::Queue {
            command: QueueCommands::List { json },
        } => commands::queue::run_queue_list(json, &db_path).await?,
        Commands::Queue {
            command: QueueCommands::Clear,
        } => commands::queue::run_queue_clear(&db_path).await?,
        Commands::Cache {
            command: CacheCommands::List,
        } => commands::cache::run_cache_list(&db_path).await?,
        Commands::Cache {
            command: CacheCommands::Clear,
        } => commands::cache::run_cache_clear(&db_path).await?,
        command => {
            let user_id = resolve_user_id(cli.user)?;
            run_user_command(command, &user_id, &db_path).await?;
        }
    }

    Ok(())
}

async fn run_user_command(
    command: Commands,
    user_id: &str,
    db_path: &std::path::Path,
) -> Result<(), CliError> {
    match command {
        Commands::Lists { json } => commands::list::run_lists(user_id, json, db_path).await,
        Commands::Tasks { list, all, json } => {
            commands::list::run_tasks(&list, all, json, user_id, db_path).await
        }
        Commands::AddList { name, description } => {
            commands::add::run_add_list(&name, description.as_deref(), user_id, db_path).await
        }
        Commands::Add {
            list,
            title,
            priority,
            due,
        } => {
            commands::add::run_add_task(&list, &title, priority, due.as_deref(), user_id, db_path)
                .await
        }
        Commands::Edit {
            id,
            title,
            description,
            priority,
            due,
        } => {
            let edit = commands::edit::EditArgs {
                title,
                description,
                priority,
                due,
            };
            commands::edit::run_edit(&id, edit, user_id, db_path).await
        }
        Commands::Complete { id, undo } => {
            commands::edit::run_complete(&id, !undo, user_id, db_path).await
        }
        Commands::Delete { id } => commands::delete::run_delete(&id, user_id, db_path).await,
        Commands::Sync {
            timeout_secs,
            on_conflict,
            json,
        } => commands::sync::run_sync(timeout_secs, on_conflict, json, user_id, db_path).await,
        Commands::Status { json } => commands::sync::run_status(json, user_id, db_path).await,
        Commands::Queue { .. } | Commands::Cache { .. } | Commands::Completions { .. } => Ok(()),
    }
}
