pub mod repository;
pub mod sqlite;

pub use sqlite::{open_database, open_memory_database};

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Migration v{version} failed: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Cannot create data directory {0}")]
    DataDir(PathBuf),

    #[error("Stored payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Internal lock error")]
    LockPoisoned,
}
