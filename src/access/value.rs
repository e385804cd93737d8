use crate::error::{DbError, DbResult};
use crate::storage::page::SLOT_SIZE;
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

const TAG_EMPTY: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_TEXT: u8 = 2;

/// Longest text that fits a slot: tag byte and length byte come first.
pub const MAX_TEXT_LEN: usize = SLOT_SIZE - 2;

/// Values that can be stored in a column slot.
///
/// Ordering puts every `Int` before every `Text`, so mixed columns still
/// index consistently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Int(i64),
    Text(String),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Int(_) => None,
            Value::Text(s) => Some(s),
        }
    }

    /// Fail early if this value can never be written to a slot.
    pub fn check_width(&self) -> DbResult<()> {
        match self {
            Value::Text(s) if s.len() > MAX_TEXT_LEN => Err(DbError::ValueTooWide {
                len: s.len(),
                max: MAX_TEXT_LEN,
            }),
            _ => Ok(()),
        }
    }

    /// Write this value into a `SLOT_SIZE` byte slot.
    pub fn encode_slot(&self, slot: &mut [u8]) -> DbResult<()> {
        debug_assert_eq!(slot.len(), SLOT_SIZE);
        self.check_width()?;
        slot.fill(0);
        match self {
            Value::Int(i) => {
                slot[0] = TAG_INT;
                LittleEndian::write_i64(&mut slot[1..9], *i);
            }
            Value::Text(s) => {
                let bytes = s.as_bytes();
                slot[0] = TAG_TEXT;
                slot[1] = bytes.len() as u8;
                slot[2..2 + bytes.len()].copy_from_slice(bytes);
            }
        }
        Ok(())
    }

    /// Read a slot back. Empty slots (tag 0) decode to `None`.
    pub fn decode_slot(slot: &[u8]) -> DbResult<Option<Value>> {
        if slot.len() != SLOT_SIZE {
            return Err(DbError::corrupt(format!(
                "slot must be {} bytes, got {}",
                SLOT_SIZE,
                slot.len()
            )));
        }
        match slot[0] {
            TAG_EMPTY => Ok(None),
            TAG_INT => Ok(Some(Value::Int(LittleEndian::read_i64(&slot[1..9])))),
            TAG_TEXT => {
                let len = slot[1] as usize;
                if len > MAX_TEXT_LEN {
                    return Err(DbError::corrupt(format!("text slot length {}", len)));
                }
                let text = std::str::from_utf8(&slot[2..2 + len])
                    .map_err(|e| DbError::corrupt(format!("text slot: {}", e)))?;
                Ok(Some(Value::Text(text.to_string())))
            }
            tag => Err(DbError::corrupt(format!("unknown slot tag {}", tag))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}
