use std::collections::HashMap;

use crate::{element::SyncElement, ref_id::RefId, types::Tick};

struct TrashEntry {
    tick: Tick,
    element: Box<dyn SyncElement>,
}

/// A tick-indexed quarantine for deleted elements.
///
/// When the authority rejects a deletion, or a delete-then-re-add arrives
/// from the network, the element is moved here instead of being destroyed,
/// keyed by its RefId and tagged with the sync tick of the removal. Later
/// messages referring to that RefId can restore the element in place;
/// confirmations of acceptance evict entries for good. An identifier is
/// never simultaneously live and trashed.
#[derive(Default)]
pub struct Trash {
    entries: HashMap<RefId, TrashEntry>,
}

impl Trash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: RefId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn insert(&mut self, id: RefId, tick: Tick, element: Box<dyn SyncElement>) {
        self.entries.insert(id, TrashEntry { tick, element });
    }

    /// Removes and returns the element iff it was trashed at or before
    /// `tick`. Entries trashed later stay put: the message asking for the
    /// restore predates their removal.
    pub fn try_retrieve(&mut self, tick: Tick, id: RefId) -> Option<Box<dyn SyncElement>> {
        let entry_tick = self.entries.get(&id)?.tick;
        if entry_tick > tick {
            return None;
        }
        Some(self.entries.remove(&id).unwrap().element)
    }

    /// Permanent removal; the element is destroyed.
    pub fn delete(&mut self, id: RefId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Evicts every entry trashed at or before the confirmed tick.
    pub fn evict_confirmed(&mut self, tick: Tick) {
        self.entries.retain(|_, entry| entry.tick > tick);
    }
}

#[cfg(test)]
mod tests {
    use super::Trash;
    use crate::{
        element::{SyncElement, ValueField},
        ref_id::RefId,
    };

    fn field(id: RefId) -> Box<dyn SyncElement> {
        Box::new(ValueField::<u32>::with_id(id, 7))
    }

    #[test]
    fn retrieve_honors_tick_bound() {
        let mut trash = Trash::new();
        let id = RefId::new(0, 9);
        trash.insert(id, 5, field(id));

        // a message from before the removal cannot restore it
        assert!(trash.try_retrieve(4, id).is_none());
        assert!(trash.contains(id));

        // one at or after the removal tick can
        assert!(trash.try_retrieve(5, id).is_some());
        assert!(!trash.contains(id));
    }

    #[test]
    fn evict_confirmed_sweeps_old_entries() {
        let mut trash = Trash::new();
        let a = RefId::new(0, 1);
        let b = RefId::new(0, 2);
        trash.insert(a, 3, field(a));
        trash.insert(b, 8, field(b));

        trash.evict_confirmed(5);
        assert!(!trash.contains(a));
        assert!(trash.contains(b));
    }

    #[test]
    fn delete_is_permanent() {
        let mut trash = Trash::new();
        let id = RefId::new(0, 1);
        trash.insert(id, 1, field(id));
        assert!(trash.delete(id));
        assert!(!trash.delete(id));
        assert!(trash.try_retrieve(9, id).is_none());
    }
}
