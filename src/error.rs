//! Engine-wide error types.

use crate::access::{Rid, Value};
use crate::storage::page::PageId;
use std::fmt;
use thiserror::Error;

/// The thing a `NotFound` error failed to find.
#[derive(Debug, Clone, PartialEq)]
pub enum Missing {
    Record(Rid),
    Key(Value),
    Table(String),
    Page(PageId),
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Missing::Record(rid) => write!(f, "record {}", rid),
            Missing::Key(key) => write!(f, "key {}", key),
            Missing::Table(name) => write!(f, "table '{}'", name),
            Missing::Page(page_id) => write!(f, "resident page {}", page_id),
        }
    }
}

/// Errors surfaced by the bufferpool, tables, persistence and database.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Not found: {0}")]
    NotFound(Missing),

    #[error("Duplicate key: {0}")]
    DuplicateKey(Value),

    #[error("Table '{0}' already exists")]
    DuplicateTable(String),

    #[error("Key index {key_index} out of range for {num_columns} columns")]
    InvalidKeyIndex { key_index: usize, num_columns: usize },

    #[error("Invalid column count {0} (must be between 1 and 64)")]
    InvalidColumnCount(usize),

    #[error("Expected {expected} values, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Column {column} out of range for {num_columns} columns")]
    InvalidColumn { column: usize, num_columns: usize },

    #[error("Value of {len} bytes does not fit a {max}-byte slot")]
    ValueTooWide { len: usize, max: usize },

    #[error("Invalid table name: '{0}'")]
    InvalidTableName(String),

    #[error("Bufferpool exhausted: all {frames} frames are pinned")]
    CapacityExhausted { frames: usize },

    #[error("Corrupt data: {0}")]
    CorruptData(String),

    #[error("Database path is not set")]
    NoPathSet,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        DbError::CorruptData(msg.into())
    }
}

impl From<bincode::Error> for DbError {
    fn from(e: bincode::Error) -> Self {
        DbError::CorruptData(format!("codec: {}", e))
    }
}

/// Result type for engine operations.
pub type DbResult<T> = Result<T, DbError>;
