//! Page ranges: the unit that groups base records with their tail updates.
//!
//! Column values live in pages. The per-record bookkeeping (which tail entry
//! is newest, which columns a tail entry changed, what it supersedes) lives
//! here, in an arena of tail entries addressed by tail sequence number.

use crate::access::Rid;
use crate::error::{DbError, DbResult};
use crate::storage::page::SLOTS_PER_PAGE;

/// Base records per page range: one base page per column.
pub const RANGE_CAPACITY: usize = SLOTS_PER_PAGE;

/// Bookkeeping for one base record.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseSlot {
    pub rid: Rid,
    /// Newest tail entry for this record, `None` if the base is current.
    pub latest: Option<u64>,
    pub deleted: bool,
}

/// One update, appended to the range's tail.
#[derive(Debug, Clone, PartialEq)]
pub struct TailEntry {
    pub rid: Rid,
    /// Tail entry this one supersedes, `None` when it sits on the base.
    pub prev: Option<u64>,
    /// Bit `c` set when column `c` was written by this entry.
    pub schema: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageRange {
    pub id: u32,
    /// Base generation; merge installs generation + 1.
    pub generation: u32,
    pub base: Vec<BaseSlot>,
    /// Retained tail entries, `tails[i]` has sequence `tail_offset + i`.
    pub tails: Vec<TailEntry>,
    /// First tail sequence still retained. Always page aligned.
    pub tail_offset: u64,
}

impl PageRange {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            generation: 0,
            base: Vec::new(),
            tails: Vec::new(),
            tail_offset: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.base.len() >= RANGE_CAPACITY
    }

    pub fn next_tail_seq(&self) -> u64 {
        self.tail_offset + self.tails.len() as u64
    }

    pub fn tail(&self, seq: u64) -> Option<&TailEntry> {
        let idx = seq.checked_sub(self.tail_offset)?;
        self.tails.get(idx as usize)
    }

    /// Tail page number and slot holding tail sequence `seq`.
    pub fn tail_location(seq: u64) -> (u32, usize) {
        let per_page = SLOTS_PER_PAGE as u64;
        ((seq / per_page) as u32, (seq % per_page) as usize)
    }

    /// Tail page numbers that may hold retained tail entries.
    pub fn tail_pages(&self) -> std::ops::Range<u32> {
        let per_page = SLOTS_PER_PAGE as u64;
        let first = self.tail_offset / per_page;
        let end = self.next_tail_seq().div_ceil(per_page);
        first as u32..end as u32
    }

    /// Drop every retained tail entry after a merge. The next tail entry
    /// starts on a fresh page so no discarded tail page is reused.
    pub fn truncate_tails(&mut self) {
        let per_page = SLOTS_PER_PAGE as u64;
        self.tail_offset = self.next_tail_seq().div_ceil(per_page) * per_page;
        self.tails.clear();
        for slot in &mut self.base {
            slot.latest = None;
        }
    }

    /// Check the invariants a freshly loaded range must satisfy.
    pub fn validate(&self, num_columns: usize) -> DbResult<()> {
        let corrupt = |msg: String| DbError::corrupt(format!("range {}: {}", self.id, msg));
        let first_rid = self.id as u64 * RANGE_CAPACITY as u64;

        if self.base.len() > RANGE_CAPACITY {
            return Err(corrupt(format!("{} base records", self.base.len())));
        }
        if self.tail_offset % SLOTS_PER_PAGE as u64 != 0 {
            return Err(corrupt(format!("unaligned tail offset {}", self.tail_offset)));
        }

        let column_mask = if num_columns >= 64 {
            u64::MAX
        } else {
            (1u64 << num_columns) - 1
        };

        for (i, entry) in self.tails.iter().enumerate() {
            let seq = self.tail_offset + i as u64;
            if let Some(prev) = entry.prev {
                // Chains only point backwards, which keeps them acyclic
                if prev >= seq || prev < self.tail_offset {
                    return Err(corrupt(format!("tail {} points at {}", seq, prev)));
                }
                if self.tail(prev).map(|p| p.rid) != Some(entry.rid) {
                    return Err(corrupt(format!("tail {} chains to another record", seq)));
                }
            }
            if entry.schema == 0 || entry.schema & !column_mask != 0 {
                return Err(corrupt(format!("tail {} has schema {:#x}", seq, entry.schema)));
            }
        }

        for (slot, base) in self.base.iter().enumerate() {
            if base.rid.0 != first_rid + slot as u64 {
                return Err(corrupt(format!("slot {} holds {}", slot, base.rid)));
            }
            if let Some(latest) = base.latest {
                if self.tail(latest).map(|t| t.rid) != Some(base.rid) {
                    return Err(corrupt(format!("{} points at tail {}", base.rid, latest)));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_with_chain() -> PageRange {
        let mut range = PageRange::new(0);
        range.base.push(BaseSlot {
            rid: Rid(0),
            latest: Some(1),
            deleted: false,
        });
        range.tails.push(TailEntry {
            rid: Rid(0),
            prev: None,
            schema: 0b10,
        });
        range.tails.push(TailEntry {
            rid: Rid(0),
            prev: Some(0),
            schema: 0b01,
        });
        range
    }

    #[test]
    fn test_tail_location() {
        assert_eq!(PageRange::tail_location(0), (0, 0));
        assert_eq!(PageRange::tail_location(254), (0, 254));
        assert_eq!(PageRange::tail_location(255), (1, 0));
    }

    #[test]
    fn test_valid_chain() {
        let range = range_with_chain();
        range.validate(2).unwrap();
        assert_eq!(range.next_tail_seq(), 2);
        assert_eq!(range.tail_pages(), 0..1);
    }

    #[test]
    fn test_forward_pointer_rejected() {
        let mut range = range_with_chain();
        range.tails[0].prev = Some(1);
        assert!(matches!(range.validate(2), Err(DbError::CorruptData(_))));
    }

    #[test]
    fn test_schema_outside_columns_rejected() {
        let range = range_with_chain();
        assert!(range.validate(1).is_err());
    }

    #[test]
    fn test_truncate_tails_moves_to_fresh_page() {
        let mut range = range_with_chain();
        range.truncate_tails();

        assert!(range.tails.is_empty());
        assert_eq!(range.tail_offset, SLOTS_PER_PAGE as u64);
        assert_eq!(range.base[0].latest, None);
        assert_eq!(range.tail_pages(), 1..1);
        assert_eq!(PageRange::tail_location(range.next_tail_seq()).0, 1);
        range.validate(2).unwrap();
    }
}
