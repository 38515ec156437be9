//! Per-transaction change tracking.
//!
//! Keeps one entry per object, positioned where the object was first
//! touched, and folds later mutations into it:
//!
//! | recorded | then     | result          |
//! |----------|----------|-----------------|
//! | Insert   | Update   | Insert          |
//! | Insert   | Delete   | (entry removed) |
//! | Update   | Update   | Update          |
//! | Update   | Delete   | Delete          |

use indexmap::IndexMap;

use crate::storage::types::{Change, ChangeType, Oid};

#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    entries: IndexMap<Oid, ChangeType>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_insert(&mut self, oid: Oid) {
        self.entries.insert(oid, ChangeType::Insert);
    }

    pub fn record_update(&mut self, oid: Oid) {
        self.entries.entry(oid).or_insert(ChangeType::Update);
    }

    pub fn record_delete(&mut self, oid: Oid) {
        match self.entries.get(&oid) {
            Some(ChangeType::Insert) => {
                self.entries.shift_remove(&oid);
            }
            _ => {
                self.entries.insert(oid, ChangeType::Delete);
            }
        }
    }

    /// recorded change for `oid`, if any
    pub fn get(&self, oid: Oid) -> Option<ChangeType> {
        self.entries.get(&oid).copied()
    }

    /// changes in the order the objects were first touched
    pub fn changes(&self) -> Vec<Change> {
        self.entries
            .iter()
            .map(|(oid, change_type)| Change::new(*oid, *change_type))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_then_delete_cancels() {
        let mut set = ChangeSet::new();
        set.record_insert(Oid(1));
        set.record_delete(Oid(1));
        assert!(set.is_empty());
    }

    #[test]
    fn test_insert_then_update_stays_insert() {
        let mut set = ChangeSet::new();
        set.record_insert(Oid(1));
        set.record_update(Oid(1));
        assert_eq!(set.changes(), vec![Change::new(Oid(1), ChangeType::Insert)]);
    }

    #[test]
    fn test_update_then_delete_becomes_delete_in_place() {
        let mut set = ChangeSet::new();
        set.record_update(Oid(1));
        set.record_insert(Oid(2));
        set.record_delete(Oid(1));

        assert_eq!(
            set.changes(),
            vec![
                Change::new(Oid(1), ChangeType::Delete),
                Change::new(Oid(2), ChangeType::Insert),
            ]
        );
    }

    #[test]
    fn test_order_follows_first_touch() {
        let mut set = ChangeSet::new();
        set.record_insert(Oid(3));
        set.record_update(Oid(1));
        set.record_insert(Oid(2));
        set.record_update(Oid(3));

        let oids: Vec<_> = set.changes().iter().map(|c| c.oid).collect();
        assert_eq!(oids, vec![Oid(3), Oid(1), Oid(2)]);
        assert_eq!(set.len(), 3);
        assert_eq!(set.get(Oid(1)), Some(ChangeType::Update));
    }
}
