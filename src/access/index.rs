//! Ordered value-to-RID indexes.
//!
//! A primary index is unique: each key maps to exactly one RID. A secondary
//! index accumulates every RID that carries the key.

use crate::access::{Rid, Value};
use crate::error::{DbError, DbResult, Missing};
use std::collections::{btree_map, btree_set, BTreeMap, BTreeSet};
use std::ops::Bound;

#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    column: usize,
    unique: bool,
    entries: BTreeMap<Value, BTreeSet<Rid>>,
}

impl Index {
    pub fn primary(column: usize) -> Self {
        Self {
            column,
            unique: true,
            entries: BTreeMap::new(),
        }
    }

    pub fn secondary(column: usize) -> Self {
        Self {
            column,
            unique: false,
            entries: BTreeMap::new(),
        }
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: Value, rid: Rid) -> DbResult<()> {
        if self.unique && self.entries.contains_key(&key) {
            return Err(DbError::DuplicateKey(key));
        }
        self.entries.entry(key).or_default().insert(rid);
        Ok(())
    }

    /// The RID stored under `key`; the lowest one for a secondary index.
    pub fn lookup(&self, key: &Value) -> DbResult<Rid> {
        self.entries
            .get(key)
            .and_then(|rids| rids.first().copied())
            .ok_or_else(|| DbError::NotFound(Missing::Key(key.clone())))
    }

    pub fn lookup_all(&self, key: &Value) -> Vec<Rid> {
        self.entries
            .get(key)
            .map(|rids| rids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop `key` and everything stored under it.
    pub fn remove(&mut self, key: &Value) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop a single `(key, rid)` pair, removing the key once it is empty.
    pub fn remove_entry(&mut self, key: &Value, rid: Rid) -> bool {
        let Some(rids) = self.entries.get_mut(key) else {
            return false;
        };
        let removed = rids.remove(&rid);
        if rids.is_empty() {
            self.entries.remove(key);
        }
        removed
    }

    /// Entries with `lo <= key <= hi` in ascending key order.
    ///
    /// The iterator is lazy and can be cloned to restart from any point.
    /// An inverted range yields nothing.
    pub fn range(&self, lo: &Value, hi: &Value) -> IndexRange<'_> {
        let outer = if lo <= hi {
            Some(
                self.entries
                    .range((Bound::Included(lo), Bound::Included(hi))),
            )
        } else {
            None
        };
        IndexRange {
            outer,
            current: None,
        }
    }

    pub fn iter(&self) -> IndexRange<'_> {
        IndexRange {
            outer: Some(self.entries.range::<Value, _>(..)),
            current: None,
        }
    }

    /// Total number of `(key, rid)` pairs.
    pub fn entry_count(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }

    /// Keys with every RID stored under them, ascending.
    pub fn groups(&self) -> impl Iterator<Item = (&Value, &BTreeSet<Rid>)> {
        self.entries.iter()
    }

    /// Rebuild an index from its groups, rejecting shapes `insert` could
    /// never have produced.
    pub fn from_groups<I>(column: usize, unique: bool, groups: I) -> DbResult<Self>
    where
        I: IntoIterator<Item = (Value, BTreeSet<Rid>)>,
    {
        let mut entries = BTreeMap::new();
        for (key, rids) in groups {
            if rids.is_empty() || (unique && rids.len() > 1) {
                return Err(DbError::corrupt(format!(
                    "index on column {} stores {} rids under {}",
                    column,
                    rids.len(),
                    key
                )));
            }
            if entries.insert(key.clone(), rids).is_some() {
                return Err(DbError::corrupt(format!("index repeats key {}", key)));
            }
        }
        Ok(Self {
            column,
            unique,
            entries,
        })
    }
}

#[derive(Clone)]
pub struct IndexRange<'a> {
    outer: Option<btree_map::Range<'a, Value, BTreeSet<Rid>>>,
    current: Option<(&'a Value, btree_set::Iter<'a, Rid>)>,
}

impl<'a> Iterator for IndexRange<'a> {
    type Item = (&'a Value, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((key, rids)) = &mut self.current {
                if let Some(rid) = rids.next() {
                    return Some((*key, *rid));
                }
            }
            let (key, rids) = self.outer.as_mut()?.next()?;
            self.current = Some((key, rids.iter()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> Value {
        Value::Int(v)
    }

    #[test]
    fn test_primary_rejects_duplicates() {
        let mut index = Index::primary(0);
        index.insert(int(1), Rid(0)).unwrap();

        let result = index.insert(int(1), Rid(1));
        assert!(matches!(result, Err(DbError::DuplicateKey(Value::Int(1)))));
        assert_eq!(index.lookup(&int(1)).unwrap(), Rid(0));
    }

    #[test]
    fn test_secondary_accumulates() {
        let mut index = Index::secondary(2);
        index.insert(int(5), Rid(3)).unwrap();
        index.insert(int(5), Rid(1)).unwrap();
        index.insert(int(6), Rid(2)).unwrap();

        assert_eq!(index.lookup_all(&int(5)), vec![Rid(1), Rid(3)]);
        assert_eq!(index.lookup(&int(5)).unwrap(), Rid(1));
        assert_eq!(index.entry_count(), 3);

        assert!(index.remove_entry(&int(5), Rid(1)));
        assert!(!index.remove_entry(&int(5), Rid(1)));
        assert!(index.remove_entry(&int(5), Rid(3)));
        assert!(!index.contains_key(&int(5)));
    }

    #[test]
    fn test_lookup_missing() {
        let index = Index::primary(0);
        assert!(matches!(
            index.lookup(&int(9)),
            Err(DbError::NotFound(Missing::Key(Value::Int(9))))
        ));
    }

    #[test]
    fn test_remove() {
        let mut index = Index::primary(0);
        index.insert(int(1), Rid(0)).unwrap();
        assert!(index.remove(&int(1)));
        assert!(!index.remove(&int(1)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_range_is_inclusive_and_ordered() {
        let mut index = Index::primary(0);
        for (k, r) in [(30, 0), (10, 1), (20, 2), (40, 3)] {
            index.insert(int(k), Rid(r)).unwrap();
        }

        let hits: Vec<_> = index
            .range(&int(10), &int(30))
            .map(|(k, r)| (k.clone(), r))
            .collect();
        assert_eq!(
            hits,
            vec![(int(10), Rid(1)), (int(20), Rid(2)), (int(30), Rid(0))]
        );
    }

    #[test]
    fn test_range_restartable() {
        let mut index = Index::secondary(0);
        index.insert(int(1), Rid(0)).unwrap();
        index.insert(int(1), Rid(1)).unwrap();
        index.insert(int(2), Rid(2)).unwrap();

        let mut range = index.range(&int(0), &int(5));
        assert_eq!(range.next().map(|(_, r)| r), Some(Rid(0)));

        let restart = range.clone();
        assert_eq!(range.count(), 2);
        assert_eq!(restart.map(|(_, r)| r).collect::<Vec<_>>(), vec![Rid(1), Rid(2)]);
    }

    #[test]
    fn test_from_groups_rejects_shared_primary_key() {
        let rids: BTreeSet<Rid> = [Rid(0), Rid(1)].into_iter().collect();
        let result = Index::from_groups(0, true, [(int(1), rids.clone())]);
        assert!(matches!(result, Err(DbError::CorruptData(_))));

        let index = Index::from_groups(0, false, [(int(1), rids)]).unwrap();
        assert_eq!(index.entry_count(), 2);
        assert!(Index::from_groups(0, false, [(int(2), BTreeSet::new())]).is_err());
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let mut index = Index::primary(0);
        index.insert(int(1), Rid(0)).unwrap();
        assert_eq!(index.range(&int(5), &int(1)).count(), 0);
        assert_eq!(index.range(&int(1), &int(1)).count(), 1);
    }
}
