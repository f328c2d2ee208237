use std::any::Any;

use log::warn;
use weft_serde::{ByteReader, ByteWriter, WireValue};

use crate::{
    element::{
        invalidate, ChildFactory, ElementCore, ElementError, ElementEvent, SyncElement,
    },
    model::WorldModel,
    ref_id::RefId,
};

/// A keyed map of child sync elements, `K -> element`.
///
/// Entries keep insertion order so full encodings are deterministic across
/// peers. Pending adds and removes are tracked per tick; a clear collapses
/// into a flag that deltas encode ahead of the removals and additions, in
/// that order. Value identifiers are compressed against the smallest RefId
/// in the encoded set.
pub struct KeyedDictionary<K: WireValue + PartialEq> {
    core: ElementCore,
    entries: Vec<(K, RefId)>,
    pend_added: Vec<K>,
    pend_removed: Vec<K>,
    was_cleared: bool,
    factory: ChildFactory,
}

impl<K: WireValue + PartialEq> KeyedDictionary<K> {
    pub fn with_id(id: RefId, factory: ChildFactory) -> Self {
        Self {
            core: ElementCore::new(id),
            entries: Vec::new(),
            pend_added: Vec::new(),
            pend_removed: Vec::new(),
            was_cleared: false,
            factory,
        }
    }

    pub fn register_new(model: &mut WorldModel, factory: ChildFactory) -> Result<RefId, ElementError> {
        let id = model.registry.allocate()?;
        let map = Self::with_id(id, factory);
        model.registry.register(id, Box::new(map))?;
        model.end_init_phase(id);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn get(&self, key: &K) -> Option<RefId> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, id)| *id)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = RefId> + '_ {
        self.entries.iter().map(|(_, id)| *id)
    }

    fn guard_mutable(&self) -> Result<(), ElementError> {
        if self.core.is_disposed {
            return Err(ElementError::Disposed {
                id: self.core.ref_id,
            });
        }
        if self.core.conflict.driven {
            return Err(ElementError::Driven {
                id: self.core.ref_id,
            });
        }
        Ok(())
    }

    /// Creates a child element under `key` and returns its identifier.
    pub fn insert(&mut self, model: &mut WorldModel, key: K) -> Result<RefId, ElementError> {
        self.guard_mutable()?;
        if self.contains_key(&key) {
            return Err(ElementError::DuplicateKey {
                id: self.core.ref_id,
            });
        }
        let id = if self.core.is_local {
            model.registry.local_allocation_block_begin();
            let created = model.create_child(self.factory);
            let _ = model.registry.local_allocation_block_end();
            created?
        } else {
            model.create_child(self.factory)?
        };
        if self.core.generates_sync() {
            self.pend_added.push(key.clone());
        }
        self.entries.push((key, id));
        invalidate(&mut self.core, model)?;
        model.push_event(ElementEvent::EntryAdded {
            map: self.core.ref_id,
            element: id,
        });
        Ok(id)
    }

    pub fn remove(&mut self, model: &mut WorldModel, key: &K) -> Result<bool, ElementError> {
        self.guard_mutable()?;
        let Some(index) = self.entries.iter().position(|(k, _)| k == key) else {
            return Ok(false);
        };
        let (key, id) = self.entries.remove(index);
        if let Some(fresh) = self.pend_added.iter().position(|k| *k == key) {
            // created this tick: the pair nets out, nothing reaches the wire
            self.pend_added.remove(fresh);
            let _ = model.dispose_element(id);
        } else {
            if self.core.generates_sync() {
                self.pend_removed.push(key);
            }
            let tick = model.sync_tick;
            model.move_to_trash(id, tick)?;
        }
        invalidate(&mut self.core, model)?;
        model.push_event(ElementEvent::EntryRemoved {
            map: self.core.ref_id,
            element: id,
        });
        Ok(true)
    }

    pub fn clear(&mut self, model: &mut WorldModel) -> Result<(), ElementError> {
        self.guard_mutable()?;
        if self.entries.is_empty() {
            return Ok(());
        }
        let tick = model.sync_tick;
        for (key, id) in std::mem::take(&mut self.entries) {
            let fresh = self.pend_added.iter().any(|k| *k == key);
            if fresh {
                let _ = model.dispose_element(id);
            } else {
                model.move_to_trash(id, tick)?;
            }
            model.push_event(ElementEvent::EntryRemoved {
                map: self.core.ref_id,
                element: id,
            });
        }
        self.pend_added.clear();
        self.pend_removed.clear();
        if self.core.generates_sync() {
            self.was_cleared = true;
        }
        invalidate(&mut self.core, model)?;
        Ok(())
    }

    // Network-driven edits

    fn network_insert(
        &mut self,
        model: &mut WorldModel,
        key: K,
        id: RefId,
    ) -> Result<(), ElementError> {
        if self.contains_key(&key) {
            warn!(
                "dictionary {} received duplicate key for element {}; skipping",
                self.core.ref_id, id
            );
            return Ok(());
        }
        if !model.try_retrieve_from_trash(model.sync_tick, id) {
            model.create_child_at(id, self.factory)?;
        }
        self.entries.push((key, id));
        model.push_event(ElementEvent::EntryAdded {
            map: self.core.ref_id,
            element: id,
        });
        Ok(())
    }

    fn network_remove(&mut self, model: &mut WorldModel, key: &K) -> Result<(), ElementError> {
        let Some(index) = self.entries.iter().position(|(k, _)| k == key) else {
            return Ok(());
        };
        let (_, id) = self.entries.remove(index);
        let tick = model.sync_tick;
        model.move_to_trash(id, tick)?;
        model.push_event(ElementEvent::EntryRemoved {
            map: self.core.ref_id,
            element: id,
        });
        Ok(())
    }

    fn network_clear(&mut self, model: &mut WorldModel) -> Result<(), ElementError> {
        let tick = model.sync_tick;
        for (_, id) in std::mem::take(&mut self.entries) {
            model.move_to_trash(id, tick)?;
            model.push_event(ElementEvent::EntryRemoved {
                map: self.core.ref_id,
                element: id,
            });
        }
        Ok(())
    }

    fn min_id(ids: impl Iterator<Item = RefId>) -> RefId {
        ids.min().unwrap_or(RefId::NULL)
    }
}

impl<K: WireValue + PartialEq> SyncElement for KeyedDictionary<K> {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn kind_name(&self) -> &'static str {
        "KeyedDictionary"
    }

    fn encode_full(
        &mut self,
        _model: &mut WorldModel,
        writer: &mut ByteWriter,
    ) -> Result<(), ElementError> {
        writer.write_var_usize(self.entries.len());
        let min = Self::min_id(self.entries.iter().map(|(_, id)| *id));
        writer.write_var_u64(min.raw());
        for (key, id) in &self.entries {
            key.encode(writer);
            writer.write_var_u64(id.offset_from(min));
        }
        Ok(())
    }

    fn decode_full(
        &mut self,
        model: &mut WorldModel,
        reader: &mut ByteReader,
    ) -> Result<(), ElementError> {
        self.network_clear(model)?;
        let count = reader.read_var_usize()?;
        let min = RefId::from_raw(reader.read_var_u64()?);
        for _ in 0..count {
            let key = K::decode(reader)?;
            let id = RefId::add_offset(min, reader.read_var_u64()?);
            self.network_insert(model, key, id)?;
        }
        Ok(())
    }

    fn encode_delta(
        &mut self,
        _model: &mut WorldModel,
        writer: &mut ByteWriter,
    ) -> Result<(), ElementError> {
        writer.write_bool(self.was_cleared);
        writer.write_var_usize(self.pend_removed.len());
        for key in &self.pend_removed {
            key.encode(writer);
        }
        writer.write_var_usize(self.pend_added.len());
        let added_ids = self.pend_added.iter().filter_map(|key| self.get(key));
        let min = Self::min_id(added_ids);
        writer.write_var_u64(min.raw());
        for key in &self.pend_added {
            // pending adds always refer to live entries
            let id = self.get(key).unwrap_or(RefId::NULL);
            key.encode(writer);
            writer.write_var_u64(id.offset_from(min));
        }
        Ok(())
    }

    fn decode_delta(
        &mut self,
        model: &mut WorldModel,
        reader: &mut ByteReader,
    ) -> Result<(), ElementError> {
        if reader.read_bool()? {
            self.network_clear(model)?;
        }
        let removed = reader.read_var_usize()?;
        for _ in 0..removed {
            let key = K::decode(reader)?;
            self.network_remove(model, &key)?;
        }
        let added = reader.read_var_usize()?;
        let min = RefId::from_raw(reader.read_var_u64()?);
        for _ in 0..added {
            let key = K::decode(reader)?;
            let id = RefId::add_offset(min, reader.read_var_u64()?);
            self.network_insert(model, key, id)?;
        }
        Ok(())
    }

    fn clear_dirty(&mut self) {
        self.core.is_dirty = false;
        self.pend_added.clear();
        self.pend_removed.clear();
        self.was_cleared = false;
    }

    fn dispose(&mut self, model: &mut WorldModel) {
        for (_, id) in std::mem::take(&mut self.entries) {
            let _ = model.dispose_element(id);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
