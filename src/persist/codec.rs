//! Byte framing for node trees and atomic file writes.
//!
//! Blob layout: 4-byte magic, little-endian u32 format version, then the
//! bincode encoding of the root `Node`.

use crate::error::{DbError, DbResult};
use crate::persist::node::Node;
use bincode::Options;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

pub const MAGIC: [u8; 4] = *b"CSDB";
pub const FORMAT_VERSION: u32 = 1;
const HEADER_SIZE: usize = 8;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

pub fn encode(node: &Node) -> DbResult<Vec<u8>> {
    let mut out = Vec::with_capacity(HEADER_SIZE);
    out.extend_from_slice(&MAGIC);
    out.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    options().serialize_into(&mut out, node)?;
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> DbResult<Node> {
    if bytes.len() < HEADER_SIZE {
        return Err(DbError::corrupt(format!(
            "blob of {} bytes is shorter than its header",
            bytes.len()
        )));
    }
    if bytes[..4] != MAGIC {
        return Err(DbError::corrupt("bad magic number"));
    }
    let version = LittleEndian::read_u32(&bytes[4..HEADER_SIZE]);
    if version != FORMAT_VERSION {
        return Err(DbError::corrupt(format!(
            "unsupported format version {}",
            version
        )));
    }

    let body = &bytes[HEADER_SIZE..];
    // Nothing decoded can be larger than the input itself
    let node = options()
        .with_limit(body.len() as u64)
        .deserialize(body)?;
    Ok(node)
}

/// Replace `path` with `bytes`: write a sibling temp file, sync, rename.
/// Either the old or the new contents survive an interruption.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> DbResult<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| DbError::Io(e.error))?;
    Ok(())
}
