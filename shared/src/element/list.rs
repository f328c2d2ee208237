use std::any::Any;

use weft_serde::{ByteReader, ByteWriter};

use crate::{
    element::{
        invalidate, ChildFactory, ElementCore, ElementError, ElementEvent, SyncElement,
    },
    model::WorldModel,
    ref_id::RefId,
};

const OP_ADD: u8 = 1;
const OP_INSERT: u8 = 2;
const OP_REMOVE: u8 = 3;
const OP_CLEAR: u8 = 4;

/// Sentinel for nodes with no pending add delta.
const NO_DELTA: usize = usize::MAX;

#[derive(Clone, Copy)]
struct NodeRecord {
    id: RefId,
    /// Created this tick; its add delta is still pending.
    fresh: bool,
    delta_index: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ListDelta {
    Add { id: RefId },
    Insert { index: usize, id: RefId },
    Remove { index: usize },
    Clear,
    /// A voided add: the element was removed in the same tick it was
    /// created, so the pair nets out to nothing on the wire.
    Empty,
}

/// An ordered list of child sync elements.
///
/// Children are instantiated through the list's factory; on decode they are
/// constructed under an allocation block seeded to the transmitted RefId, so
/// guests mirror the authority's child identifiers exactly. Pending deltas
/// coalesce within a tick: removing an element created this tick voids its
/// add, and `clear` collapses everything to a single opcode.
pub struct ElementList {
    core: ElementCore,
    nodes: Vec<NodeRecord>,
    deltas: Vec<ListDelta>,
    factory: ChildFactory,
}

impl ElementList {
    pub fn with_id(id: RefId, factory: ChildFactory) -> Self {
        Self {
            core: ElementCore::new(id),
            nodes: Vec::new(),
            deltas: Vec::new(),
            factory,
        }
    }

    pub fn register_new(model: &mut WorldModel, factory: ChildFactory) -> Result<RefId, ElementError> {
        let id = model.registry.allocate()?;
        let list = Self::with_id(id, factory);
        model.registry.register(id, Box::new(list))?;
        model.end_init_phase(id);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<RefId> {
        self.nodes.get(index).map(|node| node.id)
    }

    pub fn ids(&self) -> Vec<RefId> {
        self.nodes.iter().map(|node| node.id).collect()
    }

    pub fn find_index(&self, predicate: impl Fn(RefId) -> bool) -> Option<usize> {
        self.nodes.iter().position(|node| predicate(node.id))
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

    fn create_child(&self, model: &mut WorldModel) -> Result<RefId, ElementError> {
        if self.core.is_local {
            model.registry.local_allocation_block_begin();
            let created = model.create_child(self.factory);
            let _ = model.registry.local_allocation_block_end();
            created
        } else {
            model.create_child(self.factory)
        }
    }

    /// Appends a new child element and returns its identifier.
    pub fn add(&mut self, model: &mut WorldModel) -> Result<RefId, ElementError> {
        self.guard_mutable()?;
        let id = self.create_child(model)?;
        let sync = self.core.generates_sync();
        let delta_index = if sync {
            self.deltas.push(ListDelta::Add { id });
            self.deltas.len() - 1
        } else {
            NO_DELTA
        };
        self.nodes.push(NodeRecord {
            id,
            fresh: sync,
            delta_index,
        });
        invalidate(&mut self.core, model)?;
        model.push_event(ElementEvent::ElementsAdded {
            list: self.core.ref_id,
            index: self.nodes.len() - 1,
            count: 1,
        });
        Ok(id)
    }

    /// Inserts a new child element at `index`.
    pub fn insert(&mut self, model: &mut WorldModel, index: usize) -> Result<RefId, ElementError> {
        self.guard_mutable()?;
        if index > self.nodes.len() {
            return Err(ElementError::IndexOutOfBounds {
                index,
                len: self.nodes.len(),
            });
        }
        if index == self.nodes.len() {
            return self.add(model);
        }
        let id = self.create_child(model)?;
        let sync = self.core.generates_sync();
        let delta_index = if sync {
            self.deltas.push(ListDelta::Insert { index, id });
            self.deltas.len() - 1
        } else {
            NO_DELTA
        };
        self.nodes.insert(
            index,
            NodeRecord {
                id,
                fresh: sync,
                delta_index,
            },
        );
        invalidate(&mut self.core, model)?;
        model.push_event(ElementEvent::ElementsAdded {
            list: self.core.ref_id,
            index,
            count: 1,
        });
        Ok(id)
    }

    /// Removes the element at `index`. Elements created this tick vanish
    /// without a wire record; anything else emits a remove and goes to the
    /// trash so the authority can restore it on rejection.
    pub fn remove_at(&mut self, model: &mut WorldModel, index: usize) -> Result<(), ElementError> {
        self.guard_mutable()?;
        if index >= self.nodes.len() {
            return Err(ElementError::IndexOutOfBounds {
                index,
                len: self.nodes.len(),
            });
        }
        model.push_event(ElementEvent::ElementsRemoving {
            list: self.core.ref_id,
            index,
            count: 1,
        });
        let node = self.nodes.remove(index);
        if node.fresh && node.delta_index != NO_DELTA {
            self.deltas[node.delta_index] = ListDelta::Empty;
            // later pending positions shift down past the voided element
            for delta in self.deltas.iter_mut().skip(node.delta_index + 1) {
                match delta {
                    ListDelta::Insert { index: i, .. } | ListDelta::Remove { index: i } => {
                        if *i > index {
                            *i -= 1;
                        }
                    }
                    _ => {}
                }
            }
            let _ = model.dispose_element(node.id);
        } else {
            if self.core.generates_sync() {
                self.deltas.push(ListDelta::Remove { index });
            }
            let tick = model.sync_tick;
            model.move_to_trash(node.id, tick)?;
        }
        invalidate(&mut self.core, model)?;
        model.push_event(ElementEvent::ElementsRemoved {
            list: self.core.ref_id,
            index,
            count: 1,
        });
        Ok(())
    }

    /// Mass-removes every element; pending deltas collapse to one clear.
    pub fn clear(&mut self, model: &mut WorldModel) -> Result<(), ElementError> {
        self.guard_mutable()?;
        if self.nodes.is_empty() {
            return Ok(());
        }
        let count = self.nodes.len();
        model.push_event(ElementEvent::ElementsRemoving {
            list: self.core.ref_id,
            index: 0,
            count,
        });
        let tick = model.sync_tick;
        for node in std::mem::take(&mut self.nodes) {
            if node.fresh {
                let _ = model.dispose_element(node.id);
            } else {
                model.move_to_trash(node.id, tick)?;
            }
        }
        if self.core.generates_sync() {
            self.deltas.clear();
            self.deltas.push(ListDelta::Clear);
        }
        invalidate(&mut self.core, model)?;
        model.push_event(ElementEvent::ElementsRemoved {
            list: self.core.ref_id,
            index: 0,
            count,
        });
        Ok(())
    }

    /// Grows or shrinks the tail until the list holds exactly `count`
    /// elements.
    pub fn ensure_exact_count(
        &mut self,
        model: &mut WorldModel,
        count: usize,
    ) -> Result<(), ElementError> {
        while self.nodes.len() < count {
            self.add(model)?;
        }
        while self.nodes.len() > count {
            self.remove_at(model, self.nodes.len() - 1)?;
        }
        Ok(())
    }

    // Network-driven edits: no pending deltas, no re-dirtying.

    fn network_add(
        &mut self,
        model: &mut WorldModel,
        index: usize,
        id: RefId,
    ) -> Result<(), ElementError> {
        if index > self.nodes.len() {
            return Err(ElementError::IndexOutOfBounds {
                index,
                len: self.nodes.len(),
            });
        }
        if !model.try_retrieve_from_trash(model.sync_tick, id) {
            model.create_child_at(id, self.factory)?;
        }
        self.nodes.insert(
            index,
            NodeRecord {
                id,
                fresh: false,
                delta_index: NO_DELTA,
            },
        );
        model.push_event(ElementEvent::ElementsAdded {
            list: self.core.ref_id,
            index,
            count: 1,
        });
        Ok(())
    }

    fn network_remove(&mut self, model: &mut WorldModel, index: usize) -> Result<(), ElementError> {
        if index >= self.nodes.len() {
            return Err(ElementError::IndexOutOfBounds {
                index,
                len: self.nodes.len(),
            });
        }
        model.push_event(ElementEvent::ElementsRemoving {
            list: self.core.ref_id,
            index,
            count: 1,
        });
        let node = self.nodes.remove(index);
        let tick = model.sync_tick;
        model.move_to_trash(node.id, tick)?;
        model.push_event(ElementEvent::ElementsRemoved {
            list: self.core.ref_id,
            index,
            count: 1,
        });
        Ok(())
    }

    fn network_clear(&mut self, model: &mut WorldModel) -> Result<(), ElementError> {
        let count = self.nodes.len();
        if count == 0 {
            return Ok(());
        }
        model.push_event(ElementEvent::ElementsRemoving {
            list: self.core.ref_id,
            index: 0,
            count,
        });
        let tick = model.sync_tick;
        for node in std::mem::take(&mut self.nodes) {
            model.move_to_trash(node.id, tick)?;
        }
        model.push_event(ElementEvent::ElementsRemoved {
            list: self.core.ref_id,
            index: 0,
            count,
        });
        Ok(())
    }

    fn min_pending_id(&self) -> RefId {
        self.deltas
            .iter()
            .filter_map(|delta| match delta {
                ListDelta::Add { id } | ListDelta::Insert { id, .. } => Some(*id),
                _ => None,
            })
            .min()
            .unwrap_or(RefId::NULL)
    }
}

impl SyncElement for ElementList {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn kind_name(&self) -> &'static str {
        "ElementList"
    }

    fn encode_full(
        &mut self,
        _model: &mut WorldModel,
        writer: &mut ByteWriter,
    ) -> Result<(), ElementError> {
        writer.write_var_usize(self.nodes.len());
        for node in &self.nodes {
            writer.write_var_u64(node.id.raw());
        }
        Ok(())
    }

    fn decode_full(
        &mut self,
        model: &mut WorldModel,
        reader: &mut ByteReader,
    ) -> Result<(), ElementError> {
        // clear through the trash so this full state can restore what an
        // earlier snapshot already created
        self.network_clear(model)?;
        let count = reader.read_var_usize()?;
        for index in 0..count {
            let id = RefId::from_raw(reader.read_var_u64()?);
            self.network_add(model, index, id)?;
        }
        Ok(())
    }

    fn encode_delta(
        &mut self,
        _model: &mut WorldModel,
        writer: &mut ByteWriter,
    ) -> Result<(), ElementError> {
        let active = self
            .deltas
            .iter()
            .filter(|delta| **delta != ListDelta::Empty)
            .count();
        writer.write_var_usize(active);
        let min_id = self.min_pending_id();
        writer.write_var_u64(min_id.raw());
        for delta in &self.deltas {
            match delta {
                ListDelta::Add { id } => {
                    writer.write_u8(OP_ADD);
                    writer.write_var_u64(id.offset_from(min_id));
                }
                ListDelta::Insert { index, id } => {
                    writer.write_u8(OP_INSERT);
                    writer.write_var_usize(*index);
                    writer.write_var_u64(id.offset_from(min_id));
                }
                ListDelta::Remove { index } => {
                    writer.write_u8(OP_REMOVE);
                    writer.write_var_usize(*index);
                }
                ListDelta::Clear => {
                    writer.write_u8(OP_CLEAR);
                }
                ListDelta::Empty => {}
            }
        }
        Ok(())
    }

    fn decode_delta(
        &mut self,
        model: &mut WorldModel,
        reader: &mut ByteReader,
    ) -> Result<(), ElementError> {
        let count = reader.read_var_usize()?;
        let min_id = RefId::from_raw(reader.read_var_u64()?);
        for _ in 0..count {
            let opcode = reader.read_u8()?;
            match opcode {
                OP_ADD => {
                    let id = RefId::add_offset(min_id, reader.read_var_u64()?);
                    let index = self.nodes.len();
                    self.network_add(model, index, id)?;
                }
                OP_INSERT => {
                    let index = reader.read_var_usize()?;
                    let id = RefId::add_offset(min_id, reader.read_var_u64()?);
                    self.network_add(model, index, id)?;
                }
                OP_REMOVE => {
                    let index = reader.read_var_usize()?;
                    self.network_remove(model, index)?;
                }
                OP_CLEAR => {
                    self.network_clear(model)?;
                }
                opcode => return Err(ElementError::UnknownOpcode { opcode }),
            }
        }
        Ok(())
    }

    fn clear_dirty(&mut self) {
        self.core.is_dirty = false;
        self.deltas.clear();
        for node in &mut self.nodes {
            node.fresh = false;
            node.delta_index = NO_DELTA;
        }
    }

    fn dispose(&mut self, model: &mut WorldModel) {
        for node in std::mem::take(&mut self.nodes) {
            let _ = model.dispose_element(node.id);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::ElementList;
    use crate::{
        element::{SyncElement, ValueField},
        model::WorldModel,
        ref_id::RefId,
        types::HostRole,
    };
    use weft_serde::{ByteReader, ByteWriter};

    fn list_with_values(model: &mut WorldModel, values: &[u32]) -> RefId {
        let list_id = ElementList::register_new(model, ValueField::<u32>::factory).unwrap();
        for &value in values {
            let child = model
                .with_element(list_id, |element, model| {
                    element.downcast_mut::<ElementList>().unwrap().add(model)
                })
                .unwrap()
                .unwrap();
            model.value_set(child, value).unwrap();
        }
        list_id
    }

    fn encode_delta(model: &mut WorldModel, id: RefId) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        model
            .with_element(id, |element, model| {
                element.encode_delta(model, &mut writer)?;
                element.clear_dirty();
                Ok::<(), crate::element::ElementError>(())
            })
            .unwrap()
            .unwrap();
        writer.into_bytes()
    }

    fn apply_delta(model: &mut WorldModel, id: RefId, bytes: &[u8]) {
        let mut reader = ByteReader::new(bytes);
        model
            .with_element(id, |element, model| element.decode_delta(model, &mut reader))
            .unwrap()
            .unwrap();
    }

    #[test]
    fn add_replicates_children_at_equal_ids() {
        let mut host = WorldModel::new(HostRole::Authority);
        let host_list = list_with_values(&mut host, &[10, 20]);
        let host_ids = host
            .registry
            .get(host_list)
            .unwrap()
            .downcast_ref::<ElementList>()
            .unwrap()
            .ids();

        let bytes = encode_delta(&mut host, host_list);

        let mut guest = WorldModel::new(HostRole::Guest);
        guest.registry.set_allocation_range(RefId::new(1, 1));
        let guest_list = guest
            .register_fixture(Box::new(ElementList::with_id(
                host_list,
                ValueField::<u32>::factory,
            )))
            .unwrap();
        apply_delta(&mut guest, guest_list, &bytes);

        let guest_ids = guest
            .registry
            .get(guest_list)
            .unwrap()
            .downcast_ref::<ElementList>()
            .unwrap()
            .ids();
        assert_eq!(host_ids, guest_ids);
        for id in guest_ids {
            assert!(guest.registry.contains(id));
        }
    }

    #[test]
    fn same_tick_add_remove_nets_out() {
        let mut host = WorldModel::new(HostRole::Authority);
        let list_id = list_with_values(&mut host, &[1]);
        // flush the creation tick
        encode_delta(&mut host, list_id);

        host.with_element(list_id, |element, model| {
            let list = element.downcast_mut::<ElementList>().unwrap();
            let _kept = list.add(model).unwrap();
            let removed_index = 1;
            list.remove_at(model, removed_index).unwrap();
            let second = list.add(model).unwrap();
            assert_eq!(list.len(), 2);
            second
        })
        .unwrap();

        let bytes = encode_delta(&mut host, list_id);
        // one voided add drops out: a single net add survives
        let mut reader = ByteReader::new(&bytes);
        let active = reader.read_var_usize().unwrap();
        assert_eq!(active, 1);
    }

    #[test]
    fn remove_goes_through_trash_and_restores() {
        let mut model = WorldModel::new(HostRole::Authority);
        let list_id = list_with_values(&mut model, &[5, 6]);
        encode_delta(&mut model, list_id);

        let child = model
            .registry
            .get(list_id)
            .unwrap()
            .downcast_ref::<ElementList>()
            .unwrap()
            .get(0)
            .unwrap();

        model
            .with_element(list_id, |element, model| {
                element
                    .downcast_mut::<ElementList>()
                    .unwrap()
                    .remove_at(model, 0)
            })
            .unwrap()
            .unwrap();

        assert!(!model.registry.contains(child));
        assert!(model.trash.contains(child));
        assert!(model.try_retrieve_from_trash(model.sync_tick, child));
        assert_eq!(model.value_get::<u32>(child).unwrap(), 5);
    }

    #[test]
    fn full_round_trip_is_idempotent() {
        let mut host = WorldModel::new(HostRole::Authority);
        let list_id = list_with_values(&mut host, &[7, 8, 9]);

        let mut writer = ByteWriter::new();
        host.with_element(list_id, |element, model| {
            element.encode_full(model, &mut writer)
        })
        .unwrap()
        .unwrap();
        let bytes = writer.into_bytes();

        let mut guest = WorldModel::new(HostRole::Guest);
        let guest_list = guest
            .register_fixture(Box::new(ElementList::with_id(
                list_id,
                ValueField::<u32>::factory,
            )))
            .unwrap();

        for _ in 0..2 {
            let mut reader = ByteReader::new(&bytes);
            guest
                .with_element(guest_list, |element, model| {
                    element.decode_full(model, &mut reader)
                })
                .unwrap()
                .unwrap();
        }

        let ids = guest
            .registry
            .get(guest_list)
            .unwrap()
            .downcast_ref::<ElementList>()
            .unwrap()
            .ids();
        assert_eq!(ids.len(), 3);
        // the second application restored the same instances from trash
        for id in ids {
            assert!(guest.registry.contains(id));
        }
        assert!(guest.trash.is_empty());
    }

    #[test]
    fn clear_collapses_to_single_opcode() {
        let mut model = WorldModel::new(HostRole::Authority);
        let list_id = list_with_values(&mut model, &[1, 2, 3]);
        encode_delta(&mut model, list_id);

        model
            .with_element(list_id, |element, model| {
                let list = element.downcast_mut::<ElementList>().unwrap();
                list.remove_at(model, 0).unwrap();
                list.clear(model)
            })
            .unwrap()
            .unwrap();

        let bytes = encode_delta(&mut model, list_id);
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_var_usize().unwrap(), 1);
        let _min = reader.read_var_u64().unwrap();
        assert_eq!(reader.read_u8().unwrap(), super::OP_CLEAR);
        assert!(reader.is_empty());
    }
}
