use crate::access::Value;
use std::fmt;

/// Record identifier: strictly increasing per table, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid(pub u64);

impl Rid {
    pub fn next(&self) -> Self {
        Rid(self.0 + 1)
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rid#{}", self.0)
    }
}

/// Materialized view of a logical row at one version.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub rid: Rid,
    pub key: Value,
    pub columns: Vec<Value>,
}

impl Record {
    pub fn new(rid: Rid, key: Value, columns: Vec<Value>) -> Self {
        Self { rid, key, columns }
    }
}
