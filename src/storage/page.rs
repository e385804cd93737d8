use crate::access::Value;
use crate::error::{DbError, DbResult};
use crate::storage::{PageBuf, PAGE_SIZE};
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

// Header structure (16 bytes)
pub const PAGE_HEADER_SIZE: usize = 16;
const KIND_OFFSET: usize = 0;
const HIGH_WATER_OFFSET: usize = 4;

/// Width of every column slot in bytes.
pub const SLOT_SIZE: usize = 16;

/// Number of slots that fit after the header.
pub const SLOTS_PER_PAGE: usize = (PAGE_SIZE - PAGE_HEADER_SIZE) / SLOT_SIZE;

/// Identifier the database hands out to each table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PageKind {
    Base = 1,
    Tail = 2,
}

impl PageKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(PageKind::Base),
            2 => Some(PageKind::Tail),
            _ => None,
        }
    }
}

/// Identity of a page: which table, column and page range it belongs to,
/// whether it holds base or tail records, and its sequence number.
///
/// For base pages `seq` is the range's base generation, bumped by every
/// merge. For tail pages it is the tail page number within the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub table: TableId,
    pub column: u16,
    pub range: u32,
    pub kind: PageKind,
    pub seq: u32,
}

impl PageId {
    pub fn base(table: TableId, column: u16, range: u32, generation: u32) -> Self {
        Self {
            table,
            column,
            range,
            kind: PageKind::Base,
            seq: generation,
        }
    }

    pub fn tail(table: TableId, column: u16, range: u32, seq: u32) -> Self {
        Self {
            table,
            column,
            range,
            kind: PageKind::Tail,
            seq,
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            PageKind::Base => 'b',
            PageKind::Tail => 't',
        };
        write!(
            f,
            "{}/c{}/r{}/{}{}",
            self.table, self.column, self.range, kind, self.seq
        )
    }
}

/// Read-only view of one column page.
pub struct ColumnPage<'a> {
    data: &'a PageBuf,
}

impl<'a> ColumnPage<'a> {
    pub fn from_data(data: &'a PageBuf) -> Self {
        Self { data }
    }

    /// Kind recorded in the header, `None` for a page never initialised.
    pub fn kind(&self) -> Option<PageKind> {
        PageKind::from_u8(self.data[KIND_OFFSET])
    }

    /// One past the highest slot ever written.
    pub fn high_water(&self) -> usize {
        LittleEndian::read_u32(&self.data[HIGH_WATER_OFFSET..HIGH_WATER_OFFSET + 4]) as usize
    }

    /// Value in `slot`, `None` when the slot is empty.
    pub fn get(&self, slot: usize) -> DbResult<Option<Value>> {
        if slot >= SLOTS_PER_PAGE {
            return Err(DbError::corrupt(format!("slot {} beyond page capacity", slot)));
        }
        let offset = PAGE_HEADER_SIZE + slot * SLOT_SIZE;
        Value::decode_slot(&self.data[offset..offset + SLOT_SIZE])
    }
}

/// Writable view of one column page.
pub struct ColumnPageMut<'a> {
    data: &'a mut PageBuf,
}

impl<'a> ColumnPageMut<'a> {
    /// Stamp a fresh header onto zeroed page bytes.
    pub fn init(data: &'a mut PageBuf, kind: PageKind) -> Self {
        data[KIND_OFFSET] = kind as u8;
        LittleEndian::write_u32(&mut data[HIGH_WATER_OFFSET..HIGH_WATER_OFFSET + 4], 0);
        Self { data }
    }

    pub fn from_data(data: &'a mut PageBuf) -> Self {
        Self { data }
    }

    pub fn set(&mut self, slot: usize, value: &Value) -> DbResult<()> {
        if slot >= SLOTS_PER_PAGE {
            return Err(DbError::corrupt(format!("slot {} beyond page capacity", slot)));
        }
        let offset = PAGE_HEADER_SIZE + slot * SLOT_SIZE;
        value.encode_slot(&mut self.data[offset..offset + SLOT_SIZE])?;

        let high_water = ColumnPage::from_data(&*self.data).high_water();
        if slot + 1 > high_water {
            LittleEndian::write_u32(
                &mut self.data[HIGH_WATER_OFFSET..HIGH_WATER_OFFSET + 4],
                (slot + 1) as u32,
            );
        }
        Ok(())
    }
}
