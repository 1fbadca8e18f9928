use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tasknest_core::Priority;

#[derive(Parser)]
#[command(name = "tasknest")]
#[command(about = "Offline-first task lists from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// User whose lists are shown (defaults to TASKNEST_USER_ID)
    #[arg(long, global = true, value_name = "ID")]
    pub user: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show cached lists
    Lists {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the tasks of a list
    Tasks {
        /// List ID or unique ID prefix
        list: String,
        /// Include completed tasks
        #[arg(short, long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a new list
    #[command(name = "add-list")]
    AddList {
        /// List name
        name: Vec<String>,
        /// Optional description
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Create a new task in a list
    #[command(alias = "add-task")]
    Add {
        /// List ID or unique ID prefix
        list: String,
        /// Task title
        title: Vec<String>,
        /// Task priority
        #[arg(short, long, value_parser = parse_priority)]
        priority: Option<Priority>,
        /// Due date (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        due: Option<String>,
    },
    /// Edit a list or a task
    Edit {
        /// List or task ID, or a unique ID prefix
        id: String,
        /// New list name or task title
        #[arg(long)]
        title: Option<String>,
        /// New description (empty clears it)
        #[arg(long)]
        description: Option<String>,
        /// New task priority
        #[arg(long, value_parser = parse_priority)]
        priority: Option<Priority>,
        /// New due date (YYYY-MM-DD, empty clears it)
        #[arg(long, value_name = "DATE")]
        due: Option<String>,
    },
    /// Mark a task as completed
    #[command(alias = "done")]
    Complete {
        /// Task ID or unique ID prefix
        id: String,
        /// Mark the task as not completed instead
        #[arg(long)]
        undo: bool,
    },
    /// Delete a list or a task
    Delete {
        /// List or task ID, or a unique ID prefix
        id: String,
    },
    /// Run a sync pass against the remote store
    Sync {
        /// Abort the pass after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout_secs: Option<u64>,
        /// Settle conflicts reported by the pass
        #[arg(long, value_enum)]
        on_conflict: Option<ConflictStrategy>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect or clear the offline operation queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Manage the gateway's response caches
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ConflictStrategy {
    /// Keep local values and push them on the next pass
    KeepLocal,
    /// Discard local values in favour of the remote ones
    KeepRemote,
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List queued operations
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop every queued operation
    Clear,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// List caches and their entry counts
    List,
    /// Delete every cache
    Clear,
}

fn parse_priority(value: &str) -> Result<Priority, String> {
    value.parse()
}
