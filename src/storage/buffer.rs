pub mod lru;
pub mod replacer;

use crate::error::{DbError, DbResult, Missing};
use crate::storage::disk::PageStore;
use crate::storage::page::PageId;
use crate::storage::{PageBuf, PAGE_SIZE};
use dashmap::DashMap;
use log::debug;
use lru::LruReplacer;
use parking_lot::{Mutex, RwLock};
use replacer::{FrameId, Replacer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

type FrameData = Arc<RwLock<Box<PageBuf>>>;

struct Frame {
    data: FrameData,
    page_id: Option<PageId>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
    /// Page was discarded while pinned; drop it on the last unpin.
    discarded: AtomicBool,
}

impl Frame {
    fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(Box::new([0u8; PAGE_SIZE]))),
            page_id: None,
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            discarded: AtomicBool::new(false),
        }
    }

    fn reset(&mut self) {
        self.page_id = None;
        self.pin_count.store(0, Ordering::SeqCst);
        self.is_dirty.store(false, Ordering::SeqCst);
        self.discarded.store(false, Ordering::SeqCst);
        self.data.write().fill(0);
    }
}

/// Bounded page cache shared by every table of a database.
///
/// Cloning is cheap and yields another handle to the same pool.
#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    page_table: DashMap<PageId, FrameId>,
    frames: RwLock<HashMap<FrameId, Frame>>,
    free_frames: Mutex<Vec<FrameId>>,
    replacer: Mutex<Box<dyn Replacer>>,
    store: Mutex<Box<dyn PageStore>>,
    next_frame_id: AtomicU32,
    max_frames: usize,
}

impl BufferPoolManager {
    pub fn new(store: Box<dyn PageStore>, replacer: Box<dyn Replacer>, max_frames: usize) -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                page_table: DashMap::new(),
                frames: RwLock::new(HashMap::with_capacity(max_frames)),
                free_frames: Mutex::new(Vec::new()),
                replacer: Mutex::new(replacer),
                store: Mutex::new(store),
                next_frame_id: AtomicU32::new(0),
                max_frames,
            }),
        }
    }

    /// Pool with the default LRU policy.
    pub fn with_lru(store: Box<dyn PageStore>, max_frames: usize) -> Self {
        Self::new(store, Box::new(LruReplacer::new(max_frames)), max_frames)
    }

    pub fn capacity(&self) -> usize {
        self.inner.max_frames
    }

    /// Pin `page_id` and return a handle to it.
    ///
    /// Resident pages are returned directly. Otherwise the page is read from
    /// the backing store, or starts out zeroed if it was never written.
    pub fn get_page(&self, page_id: PageId) -> DbResult<PageHandle> {
        self.fetch(page_id, false)
    }

    /// Pin `page_id` as a fresh zeroed, dirty page, replacing any stale copy.
    pub fn new_page(&self, page_id: PageId) -> DbResult<PageHandle> {
        self.fetch(page_id, true)
    }

    fn fetch(&self, page_id: PageId, fresh: bool) -> DbResult<PageHandle> {
        // Check if page is already in buffer pool
        if let Some(frame_id) = self.inner.page_table.get(&page_id).map(|e| *e.value()) {
            let frames = self.inner.frames.read();
            if let Some(frame) = frames.get(&frame_id) {
                frame.pin_count.fetch_add(1, Ordering::SeqCst);
                frame.discarded.store(false, Ordering::SeqCst);
                self.inner.replacer.lock().pin(frame_id);
                if fresh {
                    frame.data.write().fill(0);
                    frame.is_dirty.store(true, Ordering::SeqCst);
                }

                return Ok(PageHandle {
                    inner: self.inner.clone(),
                    page_id,
                    frame_id,
                    data: frame.data.clone(),
                });
            }
        }

        // Page not in buffer pool, claim a frame for it
        let frame_id = self.get_frame()?;

        let loaded = {
            let mut frames = self.inner.frames.write();
            let frame = frames
                .get_mut(&frame_id)
                .ok_or_else(|| DbError::corrupt(format!("frame {} vanished", frame_id)))?;

            let found = if fresh {
                Ok(false)
            } else {
                let mut data = frame.data.write();
                let mut store = self.inner.store.lock();
                store.read_page(page_id, &mut data)
            };

            match found {
                Ok(found) => {
                    if !found {
                        frame.data.write().fill(0);
                    }
                    frame.page_id = Some(page_id);
                    frame.pin_count.store(1, Ordering::SeqCst);
                    frame.is_dirty.store(!found, Ordering::SeqCst);
                    frame.discarded.store(false, Ordering::SeqCst);
                    Ok(frame.data.clone())
                }
                Err(e) => {
                    frame.reset();
                    Err(e)
                }
            }
        };

        let data = match loaded {
            Ok(data) => data,
            Err(e) => {
                self.inner.free_frames.lock().push(frame_id);
                return Err(e);
            }
        };

        self.inner.page_table.insert(page_id, frame_id);
        self.inner.replacer.lock().pin(frame_id);

        Ok(PageHandle {
            inner: self.inner.clone(),
            page_id,
            frame_id,
            data,
        })
    }

    /// Add a pin to a resident page.
    pub fn pin(&self, page_id: PageId) -> DbResult<()> {
        let frame_id = self.resident_frame(page_id)?;
        let frames = self.inner.frames.read();
        if let Some(frame) = frames.get(&frame_id) {
            frame.pin_count.fetch_add(1, Ordering::SeqCst);
            self.inner.replacer.lock().pin(frame_id);
        }
        Ok(())
    }

    /// Release one pin taken with [`pin`](Self::pin). Unpinning an
    /// unpinned page is a no-op.
    pub fn unpin(&self, page_id: PageId) -> DbResult<()> {
        let frame_id = self.resident_frame(page_id)?;
        self.inner.release(frame_id);
        Ok(())
    }

    pub fn mark_dirty(&self, page_id: PageId) -> DbResult<()> {
        let frame_id = self.resident_frame(page_id)?;
        self.inner.mark_dirty(frame_id);
        Ok(())
    }

    /// Seed the bytes of a page, e.g. when a table is rebuilt on load.
    pub fn install_page(&self, page_id: PageId, bytes: &[u8]) -> DbResult<()> {
        if bytes.len() != PAGE_SIZE {
            return Err(DbError::corrupt(format!(
                "page {} has {} bytes, expected {}",
                page_id,
                bytes.len(),
                PAGE_SIZE
            )));
        }

        if let Some(frame_id) = self.inner.page_table.get(&page_id).map(|e| *e.value()) {
            let frames = self.inner.frames.read();
            if let Some(frame) = frames.get(&frame_id) {
                frame.data.write().copy_from_slice(bytes);
                frame.is_dirty.store(true, Ordering::SeqCst);
                return Ok(());
            }
        }

        let mut buf = [0u8; PAGE_SIZE];
        buf.copy_from_slice(bytes);
        self.inner.store.lock().write_page(page_id, &buf)
    }

    /// Drop a page from the cache and the backing store.
    ///
    /// A pinned page stays readable by its holders and is dropped, without
    /// write-back, once the last pin is released.
    pub fn discard_page(&self, page_id: PageId) -> DbResult<()> {
        if let Some(frame_id) = self.inner.page_table.get(&page_id).map(|e| *e.value()) {
            let pinned = {
                let frames = self.inner.frames.read();
                match frames.get(&frame_id) {
                    Some(frame) if frame.pin_count.load(Ordering::SeqCst) > 0 => {
                        frame.discarded.store(true, Ordering::SeqCst);
                        true
                    }
                    _ => false,
                }
            };
            if !pinned {
                self.inner.drop_frame(frame_id);
            }
        }
        self.inner.store.lock().remove_page(page_id)
    }

    pub fn flush_page(&self, page_id: PageId) -> DbResult<()> {
        if let Some(frame_id) = self.inner.page_table.get(&page_id).map(|e| *e.value()) {
            let frames = self.inner.frames.read();
            if let Some(frame) = frames.get(&frame_id) {
                if frame.is_dirty.load(Ordering::SeqCst) {
                    let data = frame.data.read();
                    self.inner.store.lock().write_page(page_id, &data)?;
                    frame.is_dirty.store(false, Ordering::SeqCst);
                }
            }
        }
        Ok(())
    }

    /// Write every dirty resident page back and clear its dirty flag.
    /// Nothing is evicted.
    pub fn flush_all(&self) -> DbResult<()> {
        let frames = self.inner.frames.read();
        let mut store = self.inner.store.lock();

        let mut written = 0;
        for frame in frames.values() {
            if let Some(page_id) = frame.page_id {
                if frame.is_dirty.load(Ordering::SeqCst) && !frame.discarded.load(Ordering::SeqCst)
                {
                    let data = frame.data.read();
                    store.write_page(page_id, &data)?;
                    frame.is_dirty.store(false, Ordering::SeqCst);
                    written += 1;
                }
            }
        }
        store.sync()?;

        debug!("flushed {} dirty pages", written);
        Ok(())
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.inner.page_table.contains_key(&page_id)
    }

    /// Page is cached or has been written to the backing store.
    pub fn contains_page(&self, page_id: PageId) -> bool {
        self.is_resident(page_id) || self.inner.store.lock().contains(page_id)
    }

    pub fn resident_pages(&self) -> usize {
        self.inner.page_table.len()
    }

    /// Pages held by the backing store (written back at least once).
    pub fn stored_pages(&self) -> usize {
        self.inner.store.lock().num_pages()
    }

    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        self.with_resident(page_id, |frame| frame.pin_count.load(Ordering::SeqCst))
    }

    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        self.with_resident(page_id, |frame| frame.is_dirty.load(Ordering::SeqCst))
    }

    fn with_resident<R>(&self, page_id: PageId, f: impl FnOnce(&Frame) -> R) -> Option<R> {
        let frame_id = self.inner.page_table.get(&page_id).map(|e| *e.value())?;
        let frames = self.inner.frames.read();
        frames.get(&frame_id).map(f)
    }

    fn resident_frame(&self, page_id: PageId) -> DbResult<FrameId> {
        self.inner
            .page_table
            .get(&page_id)
            .map(|e| *e.value())
            .ok_or(DbError::NotFound(Missing::Page(page_id)))
    }

    fn get_frame(&self) -> DbResult<FrameId> {
        if let Some(frame_id) = self.inner.free_frames.lock().pop() {
            return Ok(frame_id);
        }

        // Try to allocate new frame if under limit
        {
            let mut frames = self.inner.frames.write();
            if frames.len() < self.inner.max_frames {
                let frame_id = self.inner.next_frame_id.fetch_add(1, Ordering::SeqCst);
                frames.insert(frame_id, Frame::new());
                return Ok(frame_id);
            }
        }

        // Need to evict a frame
        let evict_frame_id = self
            .inner
            .replacer
            .lock()
            .evict()
            .ok_or(DbError::CapacityExhausted {
                frames: self.inner.max_frames,
            })?;

        let mut frames = self.inner.frames.write();
        let Some(frame) = frames.get_mut(&evict_frame_id) else {
            return Ok(evict_frame_id);
        };

        if let Some(page_id) = frame.page_id {
            if frame.is_dirty.load(Ordering::SeqCst) {
                let data = frame.data.read();
                if let Err(e) = self.inner.store.lock().write_page(page_id, &data) {
                    // Keep the page cached and evictable rather than lose it
                    drop(data);
                    self.inner.replacer.lock().unpin(evict_frame_id);
                    return Err(e);
                }
                debug!("evicted dirty page {} with write-back", page_id);
            }
            self.inner.page_table.remove(&page_id);
        }
        frame.reset();

        Ok(evict_frame_id)
    }
}

impl BufferPoolInner {
    fn mark_dirty(&self, frame_id: FrameId) {
        let frames = self.frames.read();
        if let Some(frame) = frames.get(&frame_id) {
            frame.is_dirty.store(true, Ordering::SeqCst);
        }
    }

    fn release(&self, frame_id: FrameId) {
        let (last_pin, discarded) = {
            let frames = self.frames.read();
            match frames.get(&frame_id) {
                Some(frame) => {
                    let released = frame
                        .pin_count
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                            count.checked_sub(1)
                        });
                    (
                        released == Ok(1),
                        frame.discarded.load(Ordering::SeqCst),
                    )
                }
                None => (false, false),
            }
        };

        if last_pin {
            if discarded {
                self.drop_frame(frame_id);
            } else {
                self.replacer.lock().unpin(frame_id);
            }
        }
    }

    /// Forget the frame's page without write-back and recycle the frame.
    fn drop_frame(&self, frame_id: FrameId) {
        let mut frames = self.frames.write();
        if let Some(frame) = frames.get_mut(&frame_id) {
            if let Some(page_id) = frame.page_id {
                self.page_table.remove(&page_id);
            }
            frame.reset();
            self.replacer.lock().remove(frame_id);
            self.free_frames.lock().push(frame_id);
        }
    }
}

/// A pinned page. The pin is released when the handle is dropped.
pub struct PageHandle {
    inner: Arc<BufferPoolInner>,
    page_id: PageId,
    frame_id: FrameId,
    data: FrameData,
}

impl PageHandle {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read<R>(&self, f: impl FnOnce(&PageBuf) -> R) -> R {
        let data = self.data.read();
        f(&**data)
    }

    /// Mutate the page bytes; the page is marked dirty.
    pub fn write<R>(&self, f: impl FnOnce(&mut PageBuf) -> R) -> R {
        self.inner.mark_dirty(self.frame_id);
        let mut data = self.data.write();
        f(&mut **data)
    }
}

impl Drop for PageHandle {
    fn drop(&mut self) {
        self.inner.release(self.frame_id);
    }
}
