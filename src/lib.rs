//! Embeddable persistent key-value storage.
//!
//! Records live in an in-memory map rebuilt at startup from an append-only
//! write-ahead log. Records may carry an absolute expiration time; a background
//! sweeper deletes them once due, logging the deletion like any other write.

use std::path::PathBuf;

use thiserror::Error;

pub mod commands;
pub mod config;
pub mod expiry;
pub mod persistence;
pub mod storage;

pub use config::EngineConfig;
pub use persistence::{Action, Event, Record};
pub use storage::{Engine, Storage};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupted log at line {line}: {reason}")]
    Corruption { line: usize, reason: String },

    #[error("Record of {size} bytes exceeds the {max} byte limit")]
    RecordTooLarge { size: usize, max: usize },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Write-ahead log is closed")]
    Closed,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Command error: {0}")]
    Command(String),
}

pub type Result<T> = std::result::Result<T, Error>;
