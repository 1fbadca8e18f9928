//! Shared service wrappers used across clients.

mod local_store;
mod offline_edits;

pub use local_store::LocalStore;
