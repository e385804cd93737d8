//! Backing locations for pages evicted or flushed from the bufferpool.

pub mod spill_file;

use crate::error::DbResult;
use crate::storage::page::PageId;
use crate::storage::PageBuf;
use std::collections::HashMap;
use std::fmt::Debug;

pub use spill_file::SpillFile;

/// Where the bufferpool writes pages back to and reloads them from.
pub trait PageStore: Send + Debug {
    /// Fill `buf` with the stored bytes. Returns false if the page was
    /// never written, leaving `buf` untouched.
    fn read_page(&mut self, page_id: PageId, buf: &mut PageBuf) -> DbResult<bool>;

    /// Store a whole page, replacing any previous copy.
    fn write_page(&mut self, page_id: PageId, data: &PageBuf) -> DbResult<()>;

    /// Forget a page. Removing an unknown page is not an error.
    fn remove_page(&mut self, page_id: PageId) -> DbResult<()>;

    fn contains(&self, page_id: PageId) -> bool;

    /// Make previous writes durable.
    fn sync(&mut self) -> DbResult<()>;

    fn num_pages(&self) -> usize;
}

/// Heap-backed store for databases without a directory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pages: HashMap<PageId, Box<PageBuf>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageStore for MemoryStore {
    fn read_page(&mut self, page_id: PageId, buf: &mut PageBuf) -> DbResult<bool> {
        match self.pages.get(&page_id) {
            Some(data) => {
                buf.copy_from_slice(data.as_ref());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn write_page(&mut self, page_id: PageId, data: &PageBuf) -> DbResult<()> {
        self.pages.insert(page_id, Box::new(*data));
        Ok(())
    }

    fn remove_page(&mut self, page_id: PageId) -> DbResult<()> {
        self.pages.remove(&page_id);
        Ok(())
    }

    fn contains(&self, page_id: PageId) -> bool {
        self.pages.contains_key(&page_id)
    }

    fn sync(&mut self) -> DbResult<()> {
        Ok(())
    }

    fn num_pages(&self) -> usize {
        self.pages.len()
    }
}
