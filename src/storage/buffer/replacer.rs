use std::fmt::Debug;

pub type FrameId = u32;

/// Eviction policy over bufferpool frames.
///
/// Only frames the pool has reported as unpinned are candidates.
pub trait Replacer: Send + Sync + Debug {
    /// Select a frame to evict. Returns None if no frame can be evicted.
    fn evict(&mut self) -> Option<FrameId>;

    /// Frame is in use and must not be chosen.
    fn pin(&mut self, frame_id: FrameId);

    /// Frame became evictable; counts as its most recent use.
    fn unpin(&mut self, frame_id: FrameId);

    /// Forget a frame entirely (its page was discarded).
    fn remove(&mut self, frame_id: FrameId);

    /// Number of evictable frames.
    fn size(&self) -> usize;
}
