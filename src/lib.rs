pub mod access;
pub mod config;
pub mod database;
pub mod error;
pub mod persist;
pub mod storage;

pub use access::{Index, Record, Rid, Table, Value};
pub use config::DatabaseConfig;
pub use database::{Database, LoadWarning};
pub use error::{DbError, DbResult, Missing};
