//! SQLite storage backend.

pub mod schema;

mod comments;
mod config;
mod dependencies;
mod issues;
mod labels;
mod purge;
mod queries;
mod store;
mod transaction;

pub use store::{SqliteStore, with_retry};
