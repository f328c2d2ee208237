use std::any::Any;
use std::collections::HashMap;

use log::warn;
use weft_serde::{ByteReader, ByteWriter};

use crate::{
    element::{invalidate, ElementCore, ElementError, ElementEvent, SyncElement},
    model::WorldModel,
    ref_id::RefId,
};

/// Constructs a concrete element kind, allocating its identifier from the
/// current allocation context.
pub type ElementCtor = fn(&mut WorldModel) -> Result<Box<dyn SyncElement>, ElementError>;

/// Explicit numeric type-id registration, the strongly-typed stand-in for
/// reflection-driven member discovery: both peers register the same
/// constructors under the same ids before the world starts.
#[derive(Default)]
pub struct TypeRegistry {
    ctors: HashMap<u32, ElementCtor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_id: u32, ctor: ElementCtor) {
        if self.ctors.insert(type_id, ctor).is_some() {
            warn!("type id {type_id} registered twice; keeping the newest constructor");
        }
    }

    pub fn get(&self, type_id: u32) -> Option<ElementCtor> {
        self.ctors.get(&type_id).copied()
    }
}

/// The behavior a [`ReplicatedMap`] delegates to: key codecs, per-entry
/// payloads, and the construction of previously-unseen elements.
pub trait ReplicatorKind: Send {
    fn kind_name(&self) -> &'static str;

    fn encode_key(&self, key: RefId, writer: &mut ByteWriter) {
        writer.write_var_u64(key.raw());
    }

    fn decode_key(&self, reader: &mut ByteReader) -> Result<RefId, ElementError> {
        Ok(RefId::from_raw(reader.read_var_u64()?))
    }

    /// Writes the entry payload beyond the key (for instance a type id).
    fn encode_element(
        &mut self,
        model: &mut WorldModel,
        key: RefId,
        writer: &mut ByteWriter,
    ) -> Result<(), ElementError>;

    /// Constructs the concrete element for `key` from the entry payload.
    /// Called under an allocation block seeded to `key`, so the element and
    /// its members land at the sender's exact identifiers. Returns `None`
    /// when the payload names a kind this peer does not know; the record is
    /// then ignored.
    fn create_element_with_key(
        &mut self,
        model: &mut WorldModel,
        key: RefId,
        reader: &mut ByteReader,
    ) -> Result<Option<RefId>, ElementError>;

    /// Teardown for a removed entry.
    fn element_removed(&mut self, model: &mut WorldModel, key: RefId) {
        let _ = model.dispose_element(key);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A keyed container whose decoder **creates** elements on receipt.
///
/// This is how peers materialize subtrees they have never seen: each added
/// entry carries its key (the element's RefId), a newly-created flag and an
/// opaque payload the kind hook turns into a concrete element.
pub struct ReplicatedMap {
    core: ElementCore,
    entries: Vec<RefId>,
    pend_added: Vec<(bool, RefId)>,
    pend_removed: Vec<RefId>,
    kind: Box<dyn ReplicatorKind>,
}

impl ReplicatedMap {
    pub fn with_id(id: RefId, kind: Box<dyn ReplicatorKind>) -> Self {
        Self {
            core: ElementCore::new(id),
            entries: Vec::new(),
            pend_added: Vec::new(),
            pend_removed: Vec::new(),
            kind,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: RefId) -> bool {
        self.entries.contains(&key)
    }

    pub fn keys(&self) -> &[RefId] {
        &self.entries
    }

    pub fn kind_as_mut<T: ReplicatorKind + 'static>(&mut self) -> Option<&mut T> {
        self.kind.as_any_mut().downcast_mut::<T>()
    }

    /// Adds an already-live element under its own identifier. `is_new`
    /// travels with the record so receivers can distinguish creations from
    /// references to existing elements.
    pub fn add(
        &mut self,
        model: &mut WorldModel,
        key: RefId,
        is_new: bool,
    ) -> Result<(), ElementError> {
        if self.core.is_disposed {
            return Err(ElementError::Disposed {
                id: self.core.ref_id,
            });
        }
        if self.entries.contains(&key) {
            return Err(ElementError::DuplicateKey {
                id: self.core.ref_id,
            });
        }
        if self.core.generates_sync() {
            self.pend_added.push((is_new, key));
        }
        self.entries.push(key);
        invalidate(&mut self.core, model)?;
        model.push_event(ElementEvent::ElementAdded {
            map: self.core.ref_id,
            key,
            element: key,
            is_new,
        });
        Ok(())
    }

    pub fn remove(&mut self, model: &mut WorldModel, key: RefId) -> Result<bool, ElementError> {
        if self.core.is_disposed {
            return Err(ElementError::Disposed {
                id: self.core.ref_id,
            });
        }
        let Some(index) = self.entries.iter().position(|k| *k == key) else {
            return Ok(false);
        };
        self.entries.remove(index);
        if let Some(fresh) = self.pend_added.iter().position(|(_, k)| *k == key) {
            self.pend_added.remove(fresh);
        } else if self.core.generates_sync() {
            self.pend_removed.push(key);
        }
        self.kind.element_removed(model, key);
        invalidate(&mut self.core, model)?;
        model.push_event(ElementEvent::ElementRemoved {
            map: self.core.ref_id,
            key,
        });
        Ok(true)
    }

    /// The decode path shared by deltas and fulls.
    fn apply_add(
        &mut self,
        model: &mut WorldModel,
        key: RefId,
        is_new: bool,
        payload: &[u8],
    ) -> Result<(), ElementError> {
        if self.entries.contains(&key) {
            // already present in this map; payload was consumed by caller
            return Ok(());
        }
        if model.registry.contains(key) {
            // the element exists elsewhere in the world; just reference it
            self.entries.push(key);
            model.push_event(ElementEvent::ElementAdded {
                map: self.core.ref_id,
                key,
                element: key,
                is_new: false,
            });
            return Ok(());
        }
        let mut payload_reader = ByteReader::new(payload);
        model.registry.allocation_block_begin(key);
        let created = self
            .kind
            .create_element_with_key(model, key, &mut payload_reader);
        let _ = model.registry.allocation_block_end();
        match created? {
            Some(element) => {
                self.entries.push(element);
                model.push_event(ElementEvent::ElementAdded {
                    map: self.core.ref_id,
                    key,
                    element,
                    is_new,
                });
            }
            None => {
                warn!(
                    "{} replicator {} could not construct element for key {}; record ignored",
                    self.kind.kind_name(),
                    self.core.ref_id,
                    key
                );
            }
        }
        Ok(())
    }

    fn network_remove(&mut self, model: &mut WorldModel, key: RefId) {
        let Some(index) = self.entries.iter().position(|k| *k == key) else {
            return;
        };
        self.entries.remove(index);
        self.kind.element_removed(model, key);
        model.push_event(ElementEvent::ElementRemoved {
            map: self.core.ref_id,
            key,
        });
    }

    fn encode_entry(
        &mut self,
        model: &mut WorldModel,
        key: RefId,
        writer: &mut ByteWriter,
    ) -> Result<(), ElementError> {
        self.kind.encode_key(key, writer);
        let mut scratch = ByteWriter::new();
        self.kind.encode_element(model, key, &mut scratch)?;
        writer.write_length_prefixed(scratch.as_slice());
        Ok(())
    }
}

impl SyncElement for ReplicatedMap {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn kind_name(&self) -> &'static str {
        "ReplicatedMap"
    }

    fn encode_full(
        &mut self,
        model: &mut WorldModel,
        writer: &mut ByteWriter,
    ) -> Result<(), ElementError> {
        writer.write_var_usize(self.entries.len());
        for key in self.entries.clone() {
            self.encode_entry(model, key, writer)?;
        }
        Ok(())
    }

    fn decode_full(
        &mut self,
        model: &mut WorldModel,
        reader: &mut ByteReader,
    ) -> Result<(), ElementError> {
        let count = reader.read_var_usize()?;
        for _ in 0..count {
            let key = self.kind.decode_key(reader)?;
            let payload = reader.read_length_prefixed()?;
            self.apply_add(model, key, true, payload)?;
        }
        Ok(())
    }

    fn encode_delta(
        &mut self,
        model: &mut WorldModel,
        writer: &mut ByteWriter,
    ) -> Result<(), ElementError> {
        writer.write_var_usize(self.pend_added.len());
        for (is_new, key) in self.pend_added.clone() {
            writer.write_bool(is_new);
            self.encode_entry(model, key, writer)?;
        }
        writer.write_var_usize(self.pend_removed.len());
        for key in &self.pend_removed {
            self.kind.encode_key(*key, writer);
        }
        Ok(())
    }

    fn decode_delta(
        &mut self,
        model: &mut WorldModel,
        reader: &mut ByteReader,
    ) -> Result<(), ElementError> {
        let added = reader.read_var_usize()?;
        for _ in 0..added {
            let is_new = reader.read_bool()?;
            let key = self.kind.decode_key(reader)?;
            let payload = reader.read_length_prefixed()?;
            self.apply_add(model, key, is_new, payload)?;
        }
        let removed = reader.read_var_usize()?;
        for _ in 0..removed {
            let key = self.kind.decode_key(reader)?;
            self.network_remove(model, key);
        }
        Ok(())
    }

    fn clear_dirty(&mut self) {
        self.core.is_dirty = false;
        self.pend_added.clear();
        self.pend_removed.clear();
    }

    fn dispose(&mut self, model: &mut WorldModel) {
        for key in std::mem::take(&mut self.entries) {
            self.kind.element_removed(model, key);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A replicator whose entry payload is the element's registered type id.
/// Decode looks the id up in the [`TypeRegistry`] and runs the constructor
/// under the record's allocation block.
pub struct TypedReplicatorKind {
    types: TypeRegistry,
    type_of: HashMap<RefId, u32>,
}

impl TypedReplicatorKind {
    pub fn new(types: TypeRegistry) -> Self {
        Self {
            types,
            type_of: HashMap::new(),
        }
    }

    /// Records which registered type an element was constructed from, so
    /// outgoing entries can name it.
    pub fn note_type(&mut self, key: RefId, type_id: u32) {
        self.type_of.insert(key, type_id);
    }
}

impl ReplicatorKind for TypedReplicatorKind {
    fn kind_name(&self) -> &'static str {
        "Typed"
    }

    fn encode_element(
        &mut self,
        _model: &mut WorldModel,
        key: RefId,
        writer: &mut ByteWriter,
    ) -> Result<(), ElementError> {
        let type_id = self
            .type_of
            .get(&key)
            .copied()
            .ok_or(ElementError::MissingTypeBinding { key })?;
        writer.write_var_u64(u64::from(type_id));
        Ok(())
    }

    fn create_element_with_key(
        &mut self,
        model: &mut WorldModel,
        key: RefId,
        reader: &mut ByteReader,
    ) -> Result<Option<RefId>, ElementError> {
        let type_id = reader.read_var_u64()? as u32;
        let Some(ctor) = self.types.get(type_id) else {
            warn!("unknown element type id {type_id} for key {key}");
            return Ok(None);
        };
        let element = ctor(model)?;
        let id = element.core().ref_id;
        model.registry.register(id, element)?;
        model.end_init_phase(id);
        self.type_of.insert(id, type_id);
        Ok(Some(id))
    }

    fn element_removed(&mut self, model: &mut WorldModel, key: RefId) {
        self.type_of.remove(&key);
        let _ = model.dispose_element(key);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{ReplicatedMap, TypeRegistry, TypedReplicatorKind};
    use crate::{
        element::{ElementEvent, SyncElement, ValueField},
        model::WorldModel,
        ref_id::RefId,
        types::HostRole,
    };
    use weft_serde::{ByteReader, ByteWriter};

    const TYPE_COUNTER: u32 = 11;

    fn typed_map(model: &mut WorldModel, id: RefId) -> RefId {
        let mut types = TypeRegistry::new();
        types.register(TYPE_COUNTER, ValueField::<u32>::factory);
        let kind = TypedReplicatorKind::new(types);
        model
            .register_fixture(Box::new(ReplicatedMap::with_id(id, Box::new(kind))))
            .unwrap()
    }

    #[test]
    fn decode_creates_element_at_exact_ref_id() {
        let map_id = RefId::fixture(3);

        let mut host = WorldModel::new(HostRole::Authority);
        let host_map = typed_map(&mut host, map_id);
        let component = host.create_child(ValueField::<u32>::factory).unwrap();
        host.with_element(host_map, |element, model| {
            let map = element.downcast_mut::<ReplicatedMap>().unwrap();
            map.kind_as_mut::<TypedReplicatorKind>()
                .unwrap()
                .note_type(component, TYPE_COUNTER);
            map.add(model, component, true)
        })
        .unwrap()
        .unwrap();

        let mut writer = ByteWriter::new();
        host.with_element(host_map, |element, model| {
            element.encode_delta(model, &mut writer)?;
            element.clear_dirty();
            Ok::<(), crate::element::ElementError>(())
        })
        .unwrap()
        .unwrap();
        let bytes = writer.into_bytes();

        let mut guest = WorldModel::new(HostRole::Guest);
        guest.registry.set_allocation_range(RefId::new(1, 1));
        let guest_map = typed_map(&mut guest, map_id);
        let mut reader = ByteReader::new(&bytes);
        guest
            .with_element(guest_map, |element, model| {
                element.decode_delta(model, &mut reader)
            })
            .unwrap()
            .unwrap();

        assert!(guest.registry.contains(component));
        let events = guest.drain_events();
        assert!(events.contains(&ElementEvent::ElementAdded {
            map: map_id,
            key: component,
            element: component,
            is_new: true,
        }));
    }

    #[test]
    fn unknown_type_id_is_ignored() {
        let map_id = RefId::fixture(3);

        let mut host = WorldModel::new(HostRole::Authority);
        let host_map = typed_map(&mut host, map_id);
        let component = host.create_child(ValueField::<u32>::factory).unwrap();
        host.with_element(host_map, |element, model| {
            let map = element.downcast_mut::<ReplicatedMap>().unwrap();
            map.kind_as_mut::<TypedReplicatorKind>()
                .unwrap()
                .note_type(component, 999); // a kind the guest lacks
            map.add(model, component, true)
        })
        .unwrap()
        .unwrap();

        let mut writer = ByteWriter::new();
        host.with_element(host_map, |element, model| {
            element.encode_delta(model, &mut writer)
        })
        .unwrap()
        .unwrap();
        let bytes = writer.into_bytes();

        let mut guest = WorldModel::new(HostRole::Guest);
        let guest_map = typed_map(&mut guest, map_id);
        let mut reader = ByteReader::new(&bytes);
        guest
            .with_element(guest_map, |element, model| {
                element.decode_delta(model, &mut reader)
            })
            .unwrap()
            .unwrap();

        assert!(!guest.registry.contains(component));
        // the malformed record must not poison the rest of the stream
        assert!(reader.is_empty());
    }

    #[test]
    fn existing_live_element_is_reused() {
        let map_id = RefId::fixture(3);
        let mut model = WorldModel::new(HostRole::Authority);
        let map = typed_map(&mut model, map_id);
        let component = model.create_child(ValueField::<u32>::factory).unwrap();

        // a record arrives for an element that is already live
        let mut writer = ByteWriter::new();
        writer.write_var_usize(1);
        writer.write_bool(true);
        writer.write_var_u64(component.raw());
        writer.write_length_prefixed(&[]);
        writer.write_var_usize(0);
        let bytes = writer.into_bytes();

        let mut reader = ByteReader::new(&bytes);
        model
            .with_element(map, |element, model| {
                element.decode_delta(model, &mut reader)
            })
            .unwrap()
            .unwrap();

        let events = model.drain_events();
        assert!(events.contains(&ElementEvent::ElementAdded {
            map: map_id,
            key: component,
            element: component,
            is_new: false,
        }));
    }
}
