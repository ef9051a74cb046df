//! Durable state on a local filesystem: plan, task index, per-task
//! records, status, results, checkpoints, and backups.

mod checkpoint;
mod store;

pub use store::{StateSnapshot, StateStore, Versioned};
