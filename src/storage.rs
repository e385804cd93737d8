//! Storage layer for colstore.
//!
//! This module owns the physical side of the engine:
//!
//! - **Page**: Fixed-size (4KB) blocks holding one column's fixed-width slots
//! - **PageStore**: Backing location for pages that leave the cache
//! - **BufferPool**: Bounded in-memory cache of pages with LRU eviction
//!
//! Nothing in here knows about RIDs, versions or indexes. The access layer
//! decides which page a value lives on; this layer only caches, pins and
//! writes pages back.

pub mod buffer;
pub mod disk;
pub mod page;

pub use buffer::{BufferPoolManager, PageHandle};
pub use disk::{MemoryStore, PageStore, SpillFile};
pub use page::{ColumnPage, ColumnPageMut, PageId, PageKind, TableId};

/// Size of every page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Raw page bytes as held by a bufferpool frame.
pub type PageBuf = [u8; PAGE_SIZE];
