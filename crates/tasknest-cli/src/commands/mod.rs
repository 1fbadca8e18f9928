pub mod add;
pub mod cache;
pub mod common;
pub mod completions;
pub mod delete;
pub mod edit;
pub mod list;
pub mod queue;
pub mod sync;
