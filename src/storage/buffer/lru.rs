use super::replacer::{FrameId, Replacer};
use std::collections::{BTreeMap, HashMap};

/// Strict LRU over unpinned frames, ordered by the time of their last unpin.
#[derive(Debug)]
pub struct LruReplacer {
    /// Evictable frames keyed by recency stamp (oldest first)
    by_recency: BTreeMap<u64, FrameId>,
    /// Stamp of each evictable frame for O(log n) removal
    stamps: HashMap<FrameId, u64>,
    clock: u64,
    max_size: usize,
}

impl LruReplacer {
    pub fn new(max_size: usize) -> Self {
        Self {
            by_recency: BTreeMap::new(),
            stamps: HashMap::with_capacity(max_size),
            clock: 0,
            max_size,
        }
    }
}

impl Replacer for LruReplacer {
    fn evict(&mut self) -> Option<FrameId> {
        let (_, frame_id) = self.by_recency.pop_first()?;
        self.stamps.remove(&frame_id);
        Some(frame_id)
    }

    fn pin(&mut self, frame_id: FrameId) {
        self.remove(frame_id);
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if self.stamps.contains_key(&frame_id) || self.stamps.len() >= self.max_size {
            return;
        }
        self.clock += 1;
        self.by_recency.insert(self.clock, frame_id);
        self.stamps.insert(frame_id, self.clock);
    }

    fn remove(&mut self, frame_id: FrameId) {
        if let Some(stamp) = self.stamps.remove(&frame_id) {
            self.by_recency.remove(&stamp);
        }
    }

    fn size(&self) -> usize {
        self.stamps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eviction_follows_unpin_order() {
        let mut replacer = LruReplacer::new(4);
        assert_eq!(replacer.evict(), None);

        for frame_id in [7, 3, 5] {
            replacer.unpin(frame_id);
        }
        assert_eq!(replacer.size(), 3);

        let order: Vec<_> = std::iter::from_fn(|| replacer.evict()).collect();
        assert_eq!(order, vec![7, 3, 5]);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_pin_unpin() {
        let mut replacer = LruReplacer::new(3);

        replacer.unpin(1);
        replacer.unpin(2);
        replacer.pin(1);
        assert_eq!(replacer.size(), 1);

        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), None);

        replacer.unpin(1);
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn test_reuse_refreshes_recency() {
        let mut replacer = LruReplacer::new(3);

        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);

        // Touch frame 1: pinned for use, then released again
        replacer.pin(1);
        replacer.unpin(1);

        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn test_duplicate_unpin() {
        let mut replacer = LruReplacer::new(2);

        replacer.unpin(1);
        replacer.unpin(1);
        assert_eq!(replacer.size(), 1);
    }

    #[test]
    fn test_remove_and_pin_unknown() {
        let mut replacer = LruReplacer::new(2);

        replacer.pin(999);
        replacer.remove(999);
        assert_eq!(replacer.size(), 0);

        replacer.unpin(4);
        replacer.remove(4);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_capacity_bounds_candidates() {
        let mut replacer = LruReplacer::new(2);
        for frame_id in 10..14 {
            replacer.unpin(frame_id);
        }
        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.evict(), Some(10));
    }
}
