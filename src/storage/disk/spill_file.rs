use crate::error::DbResult;
use crate::storage::disk::PageStore;
use crate::storage::page::PageId;
use crate::storage::{PageBuf, PAGE_SIZE};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Scratch file holding pages that were pushed out of the bufferpool.
///
/// Pages are placed in fixed-size slots; the page-to-slot directory lives in
/// memory only. The file is truncated on creation, since the durable copy of
/// every page is the owning table's serialized blob.
#[derive(Debug)]
pub struct SpillFile {
    path: PathBuf,
    file: File,
    slots: HashMap<PageId, u64>,
    free_slots: Vec<u64>,
    next_slot: u64,
}

impl SpillFile {
    pub fn create(path: &Path) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            slots: HashMap::new(),
            free_slots: Vec::new(),
            next_slot: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn slot_offset(slot: u64) -> u64 {
        slot * PAGE_SIZE as u64
    }
}

impl PageStore for SpillFile {
    fn read_page(&mut self, page_id: PageId, buf: &mut PageBuf) -> DbResult<bool> {
        let Some(&slot) = self.slots.get(&page_id) else {
            return Ok(false);
        };

        self.file.seek(SeekFrom::Start(Self::slot_offset(slot)))?;
        self.file.read_exact(buf)?;
        Ok(true)
    }

    fn write_page(&mut self, page_id: PageId, data: &PageBuf) -> DbResult<()> {
        let slot = match self.slots.get(&page_id) {
            Some(&slot) => slot,
            None => {
                let slot = self.free_slots.pop().unwrap_or_else(|| {
                    let slot = self.next_slot;
                    self.next_slot += 1;
                    slot
                });
                self.slots.insert(page_id, slot);
                slot
            }
        };

        self.file.seek(SeekFrom::Start(Self::slot_offset(slot)))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn remove_page(&mut self, page_id: PageId) -> DbResult<()> {
        if let Some(slot) = self.slots.remove(&page_id) {
            self.free_slots.push(slot);
        }
        Ok(())
    }

    fn contains(&self, page_id: PageId) -> bool {
        self.slots.contains_key(&page_id)
    }

    fn sync(&mut self) -> DbResult<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn num_pages(&self) -> usize {
        self.slots.len()
    }
}
