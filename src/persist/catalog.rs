//! Lightweight listing of every table's metadata.
//!
//! Written next to the table blobs on close so a directory can be inspected
//! without materialising any pages.

use crate::access::TableMeta;
use crate::error::DbResult;
use crate::persist::codec;
use crate::persist::node::{Persist, Walk};
use log::debug;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub fn write_catalog(path: &Path, tables: &[TableMeta]) -> DbResult<()> {
    let node = Walk::new().visit_all(tables);
    codec::write_atomic(path, &codec::encode(&node)?)?;
    debug!("wrote catalog with {} tables to {}", tables.len(), path.display());
    Ok(())
}

/// Read the catalog at `path`. A missing file lists no tables.
pub fn read_catalog(path: &Path) -> DbResult<Vec<TableMeta>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    codec::decode(&bytes)?
        .into_seq()?
        .into_iter()
        .map(TableMeta::from_node)
        .collect()
}
