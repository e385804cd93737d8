//! Persistence for tables.
//!
//! A table is saved by taking its `TableImage`, walking that into a tagged
//! `Node` tree and encoding the tree as one self-describing blob. Loading
//! reverses the steps and reseeds the pages into a bufferpool. The pool itself
//! is never part of a blob; a loaded table is simply handed the pool of the
//! database loading it.

pub mod catalog;
pub mod codec;
pub mod entity;
pub mod node;

pub use catalog::{read_catalog, write_catalog};
pub use codec::write_atomic;
pub use entity::Entity;
pub use node::{Node, Persist, Tag, Walk};

use crate::access::{Table, TableImage};
use crate::error::{DbError, DbResult};
use crate::storage::buffer::BufferPoolManager;
use std::path::Path;

/// Encode a table snapshot as a blob.
pub fn encode_image(image: &TableImage) -> DbResult<Vec<u8>> {
    codec::encode(&image.to_node())
}

/// Decode a blob that must hold a table at its root.
pub fn decode_image(bytes: &[u8]) -> DbResult<TableImage> {
    match Entity::from_node(codec::decode(bytes)?)? {
        Entity::Table(image) => Ok(image),
        other => Err(DbError::corrupt(format!(
            "expected a table blob, found a {}",
            other.tag()
        ))),
    }
}

pub fn save(table: &Table) -> DbResult<Vec<u8>> {
    encode_image(&table.image()?)
}

pub fn load(bytes: &[u8], buffer_pool: BufferPoolManager, merge_threshold: usize) -> DbResult<Table> {
    Table::from_image(decode_image(bytes)?, buffer_pool, merge_threshold)
}

/// Save `table` to `path`, replacing any previous blob atomically.
pub fn save_to(table: &Table, path: &Path) -> DbResult<()> {
    write_atomic(path, &save(table)?)
}
