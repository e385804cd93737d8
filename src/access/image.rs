//! Pool-free snapshots of a table's durable state.
//!
//! A `TableImage` owns everything a table needs to be rebuilt: metadata,
//! index contents, range bookkeeping and the bytes of every page. It holds no
//! bufferpool handle, so the persistence layer can flatten it without ever
//! touching the cache.

use crate::access::{Index, PageRange, Rid};
use crate::storage::page::{PageId, TableId};

/// Lightweight table description, also listed in the catalog file.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMeta {
    pub name: String,
    pub table_id: TableId,
    pub num_columns: usize,
    pub key_column: usize,
    pub next_rid: Rid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageImage {
    pub page_id: PageId,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeImage {
    pub range: PageRange,
    pub pages: Vec<PageImage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableImage {
    pub meta: TableMeta,
    pub primary: Index,
    pub secondary: Vec<Index>,
    pub ranges: Vec<RangeImage>,
}
