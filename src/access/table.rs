//! Column-oriented tables with append-only version chains.
//!
//! Every record gets a base entry in its page range when inserted. Updates
//! never touch base pages: they append a tail entry carrying only the changed
//! columns plus a pointer to the version it supersedes. Reading a record
//! walks that chain from the newest tail entry back to the base, taking each
//! column from the first entry that wrote it.
//!
//! RIDs are handed out sequentially and a page range holds a fixed number of
//! base records, so a RID alone determines its range and slot.

use crate::access::image::{PageImage, RangeImage, TableImage, TableMeta};
use crate::access::range::{BaseSlot, PageRange, TailEntry, RANGE_CAPACITY};
use crate::access::{Index, Record, Rid, Value};
use crate::error::{DbError, DbResult, Missing};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::{ColumnPage, ColumnPageMut, PageId, PageKind, TableId};
use log::{debug, info};
use std::collections::BTreeMap;

/// Upper bound imposed by the per-entry column bitmask.
pub const MAX_COLUMNS: usize = 64;

pub struct Table {
    meta: TableMeta,
    buffer_pool: BufferPoolManager,
    primary: Index,
    secondary: BTreeMap<usize, Index>,
    ranges: Vec<PageRange>,
    merge_threshold: usize,
}

impl Table {
    pub fn new(
        name: &str,
        table_id: TableId,
        num_columns: usize,
        key_column: usize,
        buffer_pool: BufferPoolManager,
        merge_threshold: usize,
    ) -> DbResult<Self> {
        Self::validate_schema(num_columns, key_column)?;
        Ok(Self {
            meta: TableMeta {
                name: name.to_string(),
                table_id,
                num_columns,
                key_column,
                next_rid: Rid(0),
            },
            buffer_pool,
            primary: Index::primary(key_column),
            secondary: BTreeMap::new(),
            ranges: Vec::new(),
            merge_threshold: merge_threshold.max(1),
        })
    }

    pub fn validate_schema(num_columns: usize, key_column: usize) -> DbResult<()> {
        if num_columns == 0 || num_columns > MAX_COLUMNS {
            return Err(DbError::InvalidColumnCount(num_columns));
        }
        if key_column >= num_columns {
            return Err(DbError::InvalidKeyIndex {
                key_index: key_column,
                num_columns,
            });
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn table_id(&self) -> TableId {
        self.meta.table_id
    }

    pub fn num_columns(&self) -> usize {
        self.meta.num_columns
    }

    pub fn key_column(&self) -> usize {
        self.meta.key_column
    }

    /// RID the next successful insert will receive.
    pub fn next_rid(&self) -> Rid {
        self.meta.next_rid
    }

    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    pub fn primary_index(&self) -> &Index {
        &self.primary
    }

    pub fn secondary_index(&self, column: usize) -> Option<&Index> {
        self.secondary.get(&column)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// Tail entries retained across all ranges.
    pub fn tail_len(&self) -> usize {
        self.ranges.iter().map(|r| r.tails.len()).sum()
    }

    pub fn num_ranges(&self) -> usize {
        self.ranges.len()
    }

    /// Insert a full row and return its RID.
    pub fn insert(&mut self, values: Vec<Value>) -> DbResult<Rid> {
        if values.len() != self.meta.num_columns {
            return Err(DbError::ArityMismatch {
                expected: self.meta.num_columns,
                actual: values.len(),
            });
        }
        for value in &values {
            value.check_width()?;
        }

        let key = values[self.meta.key_column].clone();
        if self.primary.contains_key(&key) {
            return Err(DbError::DuplicateKey(key));
        }

        let rid = self.meta.next_rid;
        let (range_idx, slot) = Self::position(rid);
        let generation = match self.ranges.get(range_idx) {
            Some(range) => {
                if range.base.len() != slot {
                    return Err(DbError::corrupt(format!(
                        "range {} has {} records, expected {}",
                        range_idx,
                        range.base.len(),
                        slot
                    )));
                }
                range.generation
            }
            None => 0,
        };

        // Page bytes first; the record only becomes visible below
        for (column, value) in values.iter().enumerate() {
            let page_id = self.base_page_id(column, range_idx, generation);
            self.write_slot(page_id, slot, value)?;
        }

        if range_idx == self.ranges.len() {
            self.ranges.push(PageRange::new(range_idx as u32));
        }
        self.ranges[range_idx].base.push(BaseSlot {
            rid,
            latest: None,
            deleted: false,
        });
        self.meta.next_rid = rid.next();

        self.primary.insert(key, rid)?;
        for (column, index) in self.secondary.iter_mut() {
            index.insert(values[*column].clone(), rid)?;
        }

        debug!("inserted {} into '{}'", rid, self.meta.name);
        Ok(rid)
    }

    /// Append a new version of `rid` that changes the given columns.
    ///
    /// Columns not mentioned are inherited from the previous version.
    pub fn update<I>(&mut self, rid: Rid, changes: I) -> DbResult<()>
    where
        I: IntoIterator<Item = (usize, Value)>,
    {
        let (range_idx, slot) = self.live_slot(rid)?;
        let num_columns = self.meta.num_columns;

        let mut row: Vec<Option<Value>> = vec![None; num_columns];
        let mut schema = 0u64;
        for (column, value) in changes {
            if column >= num_columns {
                return Err(DbError::InvalidColumn {
                    column,
                    num_columns,
                });
            }
            value.check_width()?;
            row[column] = Some(value);
            schema |= 1 << column;
        }
        if schema == 0 {
            return Ok(());
        }

        let current = self.materialize(range_idx, slot, 0)?;
        let key_column = self.meta.key_column;
        if let Some(new_key) = &row[key_column] {
            if *new_key != current[key_column] && self.primary.contains_key(new_key) {
                return Err(DbError::DuplicateKey(new_key.clone()));
            }
        }

        let seq = self.ranges[range_idx].next_tail_seq();
        let (tail_page, tail_slot) = PageRange::tail_location(seq);
        for (column, value) in row.iter().enumerate() {
            if let Some(value) = value {
                let page_id =
                    PageId::tail(self.meta.table_id, column as u16, range_idx as u32, tail_page);
                self.write_slot(page_id, tail_slot, value)?;
            }
        }

        let range = &mut self.ranges[range_idx];
        let prev = range.base[slot].latest;
        range.tails.push(TailEntry { rid, prev, schema });
        range.base[slot].latest = Some(seq);

        if let Some(new_key) = row[key_column].take() {
            if new_key != current[key_column] {
                self.primary.remove(&current[key_column]);
                self.primary.insert(new_key, rid)?;
            }
        }
        for (column, index) in self.secondary.iter_mut() {
            if let Some(value) = &row[*column] {
                if *value != current[*column] {
                    index.remove_entry(&current[*column], rid);
                    index.insert(value.clone(), rid)?;
                }
            }
        }

        debug!("updated {} in '{}' (tail {})", rid, self.meta.name, seq);
        Ok(())
    }

    /// Newest visible version of `rid`.
    pub fn select(&self, rid: Rid) -> DbResult<Record> {
        self.select_version(rid, 0)
    }

    /// The version `back` updates before the newest. Asking for more
    /// history than is retained yields the base version.
    pub fn select_version(&self, rid: Rid, back: usize) -> DbResult<Record> {
        let (range_idx, slot) = self.live_slot(rid)?;
        let columns = self.materialize(range_idx, slot, back)?;
        Ok(Record::new(
            rid,
            columns[self.meta.key_column].clone(),
            columns,
        ))
    }

    pub fn select_by_key(&self, key: &Value) -> DbResult<Record> {
        let rid = self.primary.lookup(key)?;
        self.select(rid)
    }

    /// Hide `rid` from every later read and drop its index entries.
    pub fn delete(&mut self, rid: Rid) -> DbResult<()> {
        let (range_idx, slot) = self.live_slot(rid)?;
        let current = self.materialize(range_idx, slot, 0)?;

        self.ranges[range_idx].base[slot].deleted = true;
        self.primary.remove(&current[self.meta.key_column]);
        for (column, index) in self.secondary.iter_mut() {
            index.remove_entry(&current[*column], rid);
        }

        debug!("deleted {} from '{}'", rid, self.meta.name);
        Ok(())
    }

    /// Live RIDs in ascending order.
    pub fn rids(&self) -> Vec<Rid> {
        self.ranges
            .iter()
            .flat_map(|range| range.base.iter())
            .filter(|slot| !slot.deleted)
            .map(|slot| slot.rid)
            .collect()
    }

    /// Newest version of every live record, by RID.
    pub fn scan(&self) -> DbResult<Vec<Record>> {
        self.rids().into_iter().map(|rid| self.select(rid)).collect()
    }

    /// Build a secondary index over `column`. Indexing the key column, or a
    /// column that already has an index, is a no-op.
    pub fn create_index(&mut self, column: usize) -> DbResult<()> {
        self.check_column(column)?;
        if column == self.meta.key_column || self.secondary.contains_key(&column) {
            return Ok(());
        }

        let mut index = Index::secondary(column);
        for rid in self.rids() {
            let record = self.select(rid)?;
            index.insert(record.columns[column].clone(), rid)?;
        }
        self.secondary.insert(column, index);
        Ok(())
    }

    /// Drop the secondary index on `column`. The primary index stays.
    pub fn drop_index(&mut self, column: usize) -> bool {
        self.secondary.remove(&column).is_some()
    }

    pub fn has_index(&self, column: usize) -> bool {
        column == self.meta.key_column || self.secondary.contains_key(&column)
    }

    /// RIDs whose current `column` equals `value`.
    pub fn locate(&self, column: usize, value: &Value) -> DbResult<Vec<Rid>> {
        self.locate_range(column, value, value)
    }

    /// RIDs whose current `column` lies in `[lo, hi]`, ordered by value then
    /// RID.
    pub fn locate_range(&self, column: usize, lo: &Value, hi: &Value) -> DbResult<Vec<Rid>> {
        self.check_column(column)?;

        let index = if column == self.meta.key_column {
            Some(&self.primary)
        } else {
            self.secondary.get(&column)
        };
        if let Some(index) = index {
            return Ok(index.range(lo, hi).map(|(_, rid)| rid).collect());
        }

        let mut hits = Vec::new();
        for record in self.scan()? {
            let value = &record.columns[column];
            if lo <= value && value <= hi {
                hits.push((value.clone(), record.rid));
            }
        }
        hits.sort();
        Ok(hits.into_iter().map(|(_, rid)| rid).collect())
    }

    /// Compact every page range whose tail reached the merge threshold.
    /// Returns the number of ranges compacted.
    pub fn merge(&mut self) -> DbResult<usize> {
        self.merge_ranges(self.merge_threshold)
    }

    /// Compact every page range with at least one tail entry.
    pub fn merge_all(&mut self) -> DbResult<usize> {
        self.merge_ranges(1)
    }

    fn merge_ranges(&mut self, threshold: usize) -> DbResult<usize> {
        let mut merged = 0;
        for range_idx in 0..self.ranges.len() {
            if self.ranges[range_idx].tails.len() >= threshold {
                self.merge_range(range_idx)?;
                merged += 1;
            }
        }
        Ok(merged)
    }

    /// Materialize the newest version of every record of one range into a
    /// new base generation, then retire the old base and tail pages.
    ///
    /// The new pages are complete before the range switches to them, and old
    /// pages still pinned elsewhere stay readable until released.
    fn merge_range(&mut self, range_idx: usize) -> DbResult<()> {
        let range = &self.ranges[range_idx];
        let new_generation = range.generation + 1;
        let retired = self.range_page_ids(range);

        let mut rows = Vec::with_capacity(range.base.len());
        for slot in 0..range.base.len() {
            rows.push(self.materialize(range_idx, slot, 0)?);
        }

        let mut built = Vec::with_capacity(self.meta.num_columns);
        for column in 0..self.meta.num_columns {
            let page_id = self.base_page_id(column, range_idx, new_generation);
            let result = self.build_base_page(page_id, &rows, column);
            built.push(page_id);
            if let Err(e) = result {
                for page_id in built {
                    self.buffer_pool.discard_page(page_id)?;
                }
                return Err(e);
            }
        }

        let range = &mut self.ranges[range_idx];
        let merged_tails = range.tails.len();
        range.generation = new_generation;
        range.truncate_tails();

        for page_id in retired {
            self.buffer_pool.discard_page(page_id)?;
        }

        info!(
            "merged range {} of '{}': {} tail records folded into generation {}",
            range_idx, self.meta.name, merged_tails, new_generation
        );
        Ok(())
    }

    fn build_base_page(&self, page_id: PageId, rows: &[Vec<Value>], column: usize) -> DbResult<()> {
        let handle = self.buffer_pool.new_page(page_id)?;
        handle.write(|buf| -> DbResult<()> {
            let mut page = ColumnPageMut::init(buf, PageKind::Base);
            for (slot, row) in rows.iter().enumerate() {
                page.set(slot, &row[column])?;
            }
            Ok(())
        })
    }

    /// Snapshot of the durable state, pages read through the bufferpool.
    pub fn image(&self) -> DbResult<TableImage> {
        let mut ranges = Vec::with_capacity(self.ranges.len());
        for range in &self.ranges {
            let mut pages = Vec::new();
            for page_id in self.range_page_ids(range) {
                let handle = self.buffer_pool.get_page(page_id)?;
                pages.push(PageImage {
                    page_id,
                    bytes: handle.read(|buf| buf.to_vec()),
                });
            }
            ranges.push(RangeImage {
                range: range.clone(),
                pages,
            });
        }

        Ok(TableImage {
            meta: self.meta.clone(),
            primary: self.primary.clone(),
            secondary: self.secondary.values().cloned().collect(),
            ranges,
        })
    }

    /// Rebuild a table from a snapshot, seeding its pages into the pool.
    pub fn from_image(
        image: TableImage,
        buffer_pool: BufferPoolManager,
        merge_threshold: usize,
    ) -> DbResult<Self> {
        let TableImage {
            meta,
            primary,
            secondary,
            ranges,
        } = image;
        Self::validate_schema(meta.num_columns, meta.key_column)
            .map_err(|e| DbError::corrupt(format!("table '{}': {}", meta.name, e)))?;

        if !primary.is_unique() || primary.column() != meta.key_column {
            return Err(DbError::corrupt(format!(
                "table '{}': primary index does not cover key column {}",
                meta.name, meta.key_column
            )));
        }

        let mut secondary_by_column = BTreeMap::new();
        for index in secondary {
            if index.is_unique()
                || index.column() >= meta.num_columns
                || index.column() == meta.key_column
            {
                return Err(DbError::corrupt(format!(
                    "table '{}': bad secondary index on column {}",
                    meta.name,
                    index.column()
                )));
            }
            secondary_by_column.insert(index.column(), index);
        }

        let mut table_ranges = Vec::with_capacity(ranges.len());
        let mut record_count = 0u64;
        let mut live_count = 0usize;
        let last = ranges.len().saturating_sub(1);
        for (i, RangeImage { range, pages }) in ranges.into_iter().enumerate() {
            if range.id as usize != i {
                return Err(DbError::corrupt(format!(
                    "table '{}': range {} stored at position {}",
                    meta.name, range.id, i
                )));
            }
            if i < last && !range.is_full() {
                return Err(DbError::corrupt(format!(
                    "table '{}': range {} is not full",
                    meta.name, i
                )));
            }
            range.validate(meta.num_columns)?;

            for page in pages {
                let id = page.page_id;
                if id.table != meta.table_id
                    || id.range != range.id
                    || id.column as usize >= meta.num_columns
                {
                    return Err(DbError::corrupt(format!(
                        "table '{}': foreign page {}",
                        meta.name, id
                    )));
                }
                buffer_pool.install_page(id, &page.bytes)?;
            }

            record_count += range.base.len() as u64;
            live_count += range.base.iter().filter(|slot| !slot.deleted).count();
            table_ranges.push(range);
        }

        if record_count != meta.next_rid.0 {
            return Err(DbError::corrupt(format!(
                "table '{}': {} records but next rid is {}",
                meta.name, record_count, meta.next_rid.0
            )));
        }
        if primary.entry_count() != live_count {
            return Err(DbError::corrupt(format!(
                "table '{}': primary index has {} entries for {} live records",
                meta.name,
                primary.entry_count(),
                live_count
            )));
        }

        Ok(Self {
            meta,
            buffer_pool,
            primary,
            secondary: secondary_by_column,
            ranges: table_ranges,
            merge_threshold: merge_threshold.max(1),
        })
    }

    /// Every page this table has written.
    pub fn page_ids(&self) -> Vec<PageId> {
        self.ranges
            .iter()
            .flat_map(|range| self.range_page_ids(range))
            .collect()
    }

    /// Remove all of this table's pages from the bufferpool.
    pub fn discard_pages(&self) -> DbResult<()> {
        for page_id in self.page_ids() {
            self.buffer_pool.discard_page(page_id)?;
        }
        Ok(())
    }

    fn range_page_ids(&self, range: &PageRange) -> Vec<PageId> {
        let mut ids = Vec::new();
        for column in 0..self.meta.num_columns {
            ids.push(self.base_page_id(column, range.id as usize, range.generation));
            for tail_page in range.tail_pages() {
                ids.push(PageId::tail(
                    self.meta.table_id,
                    column as u16,
                    range.id,
                    tail_page,
                ));
            }
        }
        ids.retain(|id| self.buffer_pool.contains_page(*id));
        ids
    }

    /// Layer tail entries over the base, newest first, skipping the `back`
    /// newest entries. The newest entry that wrote a column wins; equal
    /// positions cannot occur since sequence numbers are unique.
    fn materialize(&self, range_idx: usize, slot: usize, back: usize) -> DbResult<Vec<Value>> {
        let range = &self.ranges[range_idx];
        let num_columns = self.meta.num_columns;
        let mut values: Vec<Option<Value>> = vec![None; num_columns];
        let mut pending = if num_columns >= 64 {
            u64::MAX
        } else {
            (1u64 << num_columns) - 1
        };

        let mut skip = back;
        let mut cursor = range.base[slot].latest;
        while let Some(seq) = cursor {
            if pending == 0 {
                break;
            }
            let entry = range.tail(seq).ok_or_else(|| {
                DbError::corrupt(format!("range {} lost tail {}", range_idx, seq))
            })?;
            cursor = entry.prev;
            if skip > 0 {
                skip -= 1;
                continue;
            }

            let (tail_page, tail_slot) = PageRange::tail_location(seq);
            for (column, value) in values.iter_mut().enumerate() {
                if entry.schema & pending & (1 << column) != 0 {
                    let page_id = PageId::tail(
                        self.meta.table_id,
                        column as u16,
                        range.id,
                        tail_page,
                    );
                    *value = Some(self.read_slot(page_id, tail_slot)?);
                }
            }
            pending &= !entry.schema;
        }

        for (column, value) in values.iter_mut().enumerate() {
            if value.is_none() {
                let page_id = self.base_page_id(column, range_idx, range.generation);
                *value = Some(self.read_slot(page_id, slot)?);
            }
        }

        Ok(values.into_iter().flatten().collect())
    }

    fn position(rid: Rid) -> (usize, usize) {
        let capacity = RANGE_CAPACITY as u64;
        ((rid.0 / capacity) as usize, (rid.0 % capacity) as usize)
    }

    fn live_slot(&self, rid: Rid) -> DbResult<(usize, usize)> {
        let (range_idx, slot) = Self::position(rid);
        match self.ranges.get(range_idx).and_then(|r| r.base.get(slot)) {
            Some(base) if !base.deleted => Ok((range_idx, slot)),
            _ => Err(DbError::NotFound(Missing::Record(rid))),
        }
    }

    fn check_column(&self, column: usize) -> DbResult<()> {
        if column >= self.meta.num_columns {
            return Err(DbError::InvalidColumn {
                column,
                num_columns: self.meta.num_columns,
            });
        }
        Ok(())
    }

    fn base_page_id(&self, column: usize, range_idx: usize, generation: u32) -> PageId {
        PageId::base(
            self.meta.table_id,
            column as u16,
            range_idx as u32,
            generation,
        )
    }

    fn read_slot(&self, page_id: PageId, slot: usize) -> DbResult<Value> {
        let handle = self.buffer_pool.get_page(page_id)?;
        handle
            .read(|buf| ColumnPage::from_data(buf).get(slot))?
            .ok_or_else(|| DbError::corrupt(format!("empty slot {} on page {}", slot, page_id)))
    }

    fn write_slot(&self, page_id: PageId, slot: usize, value: &Value) -> DbResult<()> {
        let handle = self.buffer_pool.get_page(page_id)?;
        handle.write(|buf| {
            let initialised = ColumnPage::from_data(buf).kind().is_some();
            let mut page = if initialised {
                ColumnPageMut::from_data(buf)
            } else {
                ColumnPageMut::init(buf, page_id.kind)
            };
            page.set(slot, value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::MemoryStore;
    use crate::storage::page::SLOTS_PER_PAGE;

    fn pool(frames: usize) -> BufferPoolManager {
        BufferPoolManager::with_lru(Box::new(MemoryStore::new()), frames)
    }

    fn grades(frames: usize) -> Table {
        Table::new("Grades", TableId(1), 4, 0, pool(frames), 8).unwrap()
    }

    fn row(key: i64, a: &str, b: &str, c: &str) -> Vec<Value> {
        vec![key.into(), a.into(), b.into(), c.into()]
    }

    #[test]
    fn test_schema_validation() {
        assert!(matches!(
            Table::new("t", TableId(1), 2, 2, pool(4), 8),
            Err(DbError::InvalidKeyIndex {
                key_index: 2,
                num_columns: 2
            })
        ));
        assert!(matches!(
            Table::new("t", TableId(1), 0, 0, pool(4), 8),
            Err(DbError::InvalidColumnCount(0))
        ));
        assert!(Table::new("t", TableId(1), 65, 0, pool(4), 8).is_err());
    }

    #[test]
    fn test_insert_select_update_delete() -> DbResult<()> {
        let mut table = grades(16);

        let rid = table.insert(row(1, "A", "B", "C"))?;
        assert_eq!(rid, Rid(0));

        table.update(rid, [(2, Value::from("Z"))])?;
        let record = table.select(rid)?;
        assert_eq!(record.columns, row(1, "A", "Z", "C"));
        assert_eq!(record.key, Value::Int(1));

        table.delete(rid)?;
        assert!(matches!(
            table.select(rid),
            Err(DbError::NotFound(Missing::Record(Rid(0))))
        ));
        assert!(matches!(
            table.update(rid, [(1, Value::from("Q"))]),
            Err(DbError::NotFound(_))
        ));
        assert!(table.delete(rid).is_err());
        assert!(table.primary_index().is_empty());

        Ok(())
    }

    #[test]
    fn test_duplicate_key_consumes_no_rid() -> DbResult<()> {
        let mut table = Table::new("T", TableId(1), 2, 0, pool(8), 8)?;
        table.insert(vec![1.into(), 10.into()])?;

        let result = table.insert(vec![1.into(), 20.into()]);
        assert!(matches!(result, Err(DbError::DuplicateKey(Value::Int(1)))));
        assert_eq!(table.next_rid(), Rid(1));

        assert_eq!(table.insert(vec![2.into(), 20.into()])?, Rid(1));
        Ok(())
    }

    #[test]
    fn test_arity_and_width_checked() {
        let mut table = grades(8);
        assert!(matches!(
            table.insert(vec![1.into()]),
            Err(DbError::ArityMismatch {
                expected: 4,
                actual: 1
            })
        ));
        assert!(matches!(
            table.insert(row(1, "this is far too wide", "", "")),
            Err(DbError::ValueTooWide { .. })
        ));
        assert_eq!(table.next_rid(), Rid(0));
    }

    #[test]
    fn test_update_rejects_bad_column() -> DbResult<()> {
        let mut table = grades(8);
        let rid = table.insert(row(1, "A", "B", "C"))?;
        assert!(matches!(
            table.update(rid, [(4, Value::Int(0))]),
            Err(DbError::InvalidColumn {
                column: 4,
                num_columns: 4
            })
        ));
        assert_eq!(table.tail_len(), 0);
        Ok(())
    }

    #[test]
    fn test_version_chain_layers_columns() -> DbResult<()> {
        let mut table = grades(16);
        let rid = table.insert(row(7, "a0", "b0", "c0"))?;

        table.update(rid, [(1, Value::from("a1"))])?;
        table.update(rid, [(2, Value::from("b2")), (3, Value::from("c2"))])?;
        table.update(rid, [(1, Value::from("a3"))])?;

        assert_eq!(table.select(rid)?.columns, row(7, "a3", "b2", "c2"));
        assert_eq!(table.select_version(rid, 1)?.columns, row(7, "a1", "b2", "c2"));
        assert_eq!(table.select_version(rid, 2)?.columns, row(7, "a1", "b0", "c0"));
        assert_eq!(table.select_version(rid, 3)?.columns, row(7, "a0", "b0", "c0"));
        assert_eq!(table.select_version(rid, 10)?.columns, row(7, "a0", "b0", "c0"));
        Ok(())
    }

    #[test]
    fn test_later_update_of_same_column_wins() -> DbResult<()> {
        let mut table = grades(16);
        let rid = table.insert(row(1, "A", "B", "C"))?;
        table.update(rid, [(3, Value::from("first"))])?;
        table.update(rid, [(3, Value::from("second"))])?;
        assert_eq!(table.select(rid)?.columns[3], Value::from("second"));
        Ok(())
    }

    #[test]
    fn test_key_update_rekeys_index() -> DbResult<()> {
        let mut table = grades(16);
        let a = table.insert(row(1, "A", "", ""))?;
        table.insert(row(2, "B", "", ""))?;

        assert!(matches!(
            table.update(a, [(0, Value::Int(2))]),
            Err(DbError::DuplicateKey(_))
        ));
        assert_eq!(table.tail_len(), 0);

        table.update(a, [(0, Value::Int(10))])?;
        assert_eq!(table.primary_index().lookup(&Value::Int(10))?, a);
        assert!(!table.primary_index().contains_key(&Value::Int(1)));
        assert_eq!(table.select_by_key(&Value::Int(10))?.columns[1], Value::from("A"));

        // Re-writing the same key is not a conflict
        table.update(a, [(0, Value::Int(10)), (1, Value::from("AA"))])?;
        assert_eq!(table.select(a)?.columns[1], Value::from("AA"));
        Ok(())
    }

    #[test]
    fn test_rids_span_ranges() -> DbResult<()> {
        let mut table = Table::new("wide", TableId(2), 2, 0, pool(8), 8)?;
        let total = SLOTS_PER_PAGE as i64 + 10;
        for key in 0..total {
            let rid = table.insert(vec![key.into(), (key * 2).into()])?;
            assert_eq!(rid, Rid(key as u64));
        }
        assert_eq!(table.num_ranges(), 2);
        assert_eq!(table.len(), total as usize);

        let last = Rid(total as u64 - 1);
        assert_eq!(table.select(last)?.columns[1], Value::Int((total - 1) * 2));
        assert!(table.select(Rid(total as u64)).is_err());
        Ok(())
    }

    #[test]
    fn test_secondary_index_maintenance() -> DbResult<()> {
        let mut table = grades(16);
        let a = table.insert(row(1, "x", "B", "C"))?;
        let b = table.insert(row(2, "y", "B", "C"))?;
        table.create_index(1)?;
        assert!(table.has_index(1));

        table.insert(row(3, "x", "B", "C"))?;
        assert_eq!(table.locate(1, &Value::from("x"))?, vec![a, Rid(2)]);

        table.update(b, [(1, Value::from("x"))])?;
        table.delete(a)?;
        assert_eq!(table.locate(1, &Value::from("x"))?, vec![b, Rid(2)]);
        assert!(table.locate(1, &Value::from("y"))?.is_empty());

        assert!(table.drop_index(1));
        assert!(!table.drop_index(1));
        // Same answer without the index
        assert_eq!(table.locate(1, &Value::from("x"))?, vec![b, Rid(2)]);
        Ok(())
    }

    #[test]
    fn test_locate_range_without_index() -> DbResult<()> {
        let mut table = Table::new("nums", TableId(3), 2, 0, pool(8), 8)?;
        for (key, v) in [(1, 30), (2, 10), (3, 20), (4, 40)] {
            table.insert(vec![Value::Int(key), Value::Int(v)])?;
        }
        let hits = table.locate_range(1, &Value::Int(10), &Value::Int(30))?;
        assert_eq!(hits, vec![Rid(1), Rid(2), Rid(0)]);

        let keys = table.locate_range(0, &Value::Int(2), &Value::Int(3))?;
        assert_eq!(keys, vec![Rid(1), Rid(2)]);

        assert!(table.locate_range(5, &Value::Int(0), &Value::Int(1)).is_err());
        Ok(())
    }

    #[test]
    fn test_merge_folds_tails_into_new_base() -> DbResult<()> {
        let buffer_pool = pool(32);
        let mut table = Table::new("m", TableId(4), 3, 0, buffer_pool.clone(), 4)?;
        for key in 0..5 {
            table.insert(vec![Value::Int(key), Value::Int(0), Value::Int(0)])?;
        }
        for round in 1..=3 {
            for key in 0..5u64 {
                table.update(Rid(key), [(1, Value::Int(round))])?;
            }
        }
        table.delete(Rid(4))?;
        let before = table.scan()?;
        let old_tail = PageId::tail(TableId(4), 1, 0, 0);
        assert!(buffer_pool.contains_page(old_tail));

        assert_eq!(table.merge()?, 1);
        assert_eq!(table.tail_len(), 0);
        assert_eq!(table.scan()?, before);
        assert!(!buffer_pool.contains_page(old_tail));
        assert!(!buffer_pool.contains_page(PageId::base(TableId(4), 0, 0, 0)));
        assert!(buffer_pool.contains_page(PageId::base(TableId(4), 0, 0, 1)));

        // Below threshold: nothing to do
        table.update(Rid(0), [(2, Value::Int(9))])?;
        assert_eq!(table.merge()?, 0);
        assert_eq!(table.select(Rid(0))?.columns, vec![0.into(), 3.into(), 9.into()]);

        assert_eq!(table.merge_all()?, 1);
        assert_eq!(table.select(Rid(0))?.columns, vec![0.into(), 3.into(), 9.into()]);
        assert!(table.select(Rid(4)).is_err());
        Ok(())
    }

    #[test]
    fn test_merge_keeps_pinned_old_page_readable() -> DbResult<()> {
        let buffer_pool = pool(32);
        let mut table = Table::new("p", TableId(5), 2, 0, buffer_pool.clone(), 1)?;
        table.insert(vec![Value::Int(1), Value::Int(100)])?;
        table.update(Rid(0), [(1, Value::Int(200))])?;

        let old_base = PageId::base(TableId(5), 1, 0, 0);
        let held = buffer_pool.get_page(old_base)?;

        table.merge()?;
        let old_value = held.read(|buf| ColumnPage::from_data(buf).get(0))?;
        assert_eq!(old_value, Some(Value::Int(100)));
        assert_eq!(table.select(Rid(0))?.columns[1], Value::Int(200));

        drop(held);
        assert!(!buffer_pool.is_resident(old_base));
        Ok(())
    }

    #[test]
    fn test_merge_leaves_other_ranges_alone() -> DbResult<()> {
        let buffer_pool = pool(16);
        let table_id = TableId(7);
        let mut table = Table::new("two", table_id, 2, 0, buffer_pool.clone(), 4)?;
        for key in 0..(RANGE_CAPACITY as i64 + 5) {
            table.insert(vec![key.into(), 0.into()])?;
        }
        assert_eq!(table.num_ranges(), 2);

        // Range 0 stays below the threshold, range 1 reaches it
        table.update(Rid(3), [(1, Value::Int(-3))])?;
        let second = RANGE_CAPACITY as u64;
        for round in 1..=4 {
            table.update(Rid(second), [(1, Value::Int(round))])?;
        }

        let first_range = |t: &Table| -> Vec<PageId> {
            t.page_ids().into_iter().filter(|id| id.range == 0).collect()
        };
        let untouched = first_range(&table);
        assert!(untouched.contains(&PageId::tail(table_id, 1, 0, 0)));

        assert_eq!(table.merge()?, 1);
        assert_eq!(first_range(&table), untouched);
        for page_id in &untouched {
            assert!(buffer_pool.contains_page(*page_id));
        }
        assert_eq!(table.tail_len(), 1);
        assert_eq!(table.select(Rid(3))?.columns[1], Value::Int(-3));

        assert!(buffer_pool.contains_page(PageId::base(table_id, 0, 1, 1)));
        assert!(!buffer_pool.contains_page(PageId::base(table_id, 0, 1, 0)));
        assert_eq!(table.select(Rid(second))?.columns[1], Value::Int(4));
        Ok(())
    }

    #[test]
    fn test_works_under_eviction_pressure() -> DbResult<()> {
        // Fewer frames than the table has pages
        let mut table = Table::new("tiny", TableId(6), 4, 0, pool(2), 8)?;
        for key in 0..300i64 {
            table.insert(vec![key.into(), (key + 1).into(), (key + 2).into(), "t".into()])?;
        }
        for key in (0..300u64).step_by(7) {
            table.update(Rid(key), [(3, Value::from("u"))])?;
        }
        let record = table.select(Rid(280))?;
        assert_eq!(record.columns, vec![280.into(), 281.into(), 282.into(), "u".into()]);
        assert_eq!(table.select(Rid(281))?.columns[3], Value::from("t"));
        Ok(())
    }

    #[test]
    fn test_image_round_trip_through_new_pool() -> DbResult<()> {
        let mut table = grades(16);
        for key in 0..10 {
            table.insert(row(key, "a", "b", "c"))?;
        }
        table.update(Rid(3), [(1, Value::from("new"))])?;
        table.delete(Rid(5))?;
        table.create_index(2)?;

        let image = table.image()?;
        let restored = Table::from_image(image.clone(), pool(4), 8)?;

        assert_eq!(restored.scan()?, table.scan()?);
        assert_eq!(restored.primary_index(), table.primary_index());
        assert_eq!(restored.secondary_index(2), table.secondary_index(2));
        assert_eq!(restored.next_rid(), Rid(10));
        assert_eq!(restored.image()?, image);
        Ok(())
    }

    #[test]
    fn test_from_image_rejects_inconsistent_counter() -> DbResult<()> {
        let mut table = grades(8);
        table.insert(row(1, "a", "b", "c"))?;
        let mut image = table.image()?;
        image.meta.next_rid = Rid(0);

        assert!(matches!(
            Table::from_image(image, pool(4), 8),
            Err(DbError::CorruptData(_))
        ));
        Ok(())
    }
}
