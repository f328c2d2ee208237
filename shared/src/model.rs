use std::collections::VecDeque;

use weft_serde::WireValue;

use crate::{
    element::{ChildFactory, ElementError, ElementEvent, SyncElement, ValueField},
    ref_id::RefId,
    registry::{ReferenceController, RegistryError},
    trash::Trash,
    types::{HostRole, StateVersion, Tick, WorldState},
};

/// The set of elements to re-encode on the next sync tick.
///
/// Insertions are refused while the controller is actively emitting a batch;
/// the `is_dirty` flag on each element keeps entries unique.
#[derive(Default)]
pub struct DirtySet {
    ids: Vec<RefId>,
    closed: bool,
}

impl DirtySet {
    pub fn add(&mut self, id: RefId) -> Result<(), ElementError> {
        if self.closed {
            return Err(ElementError::ClosedForCollection);
        }
        self.ids.push(id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    pub(crate) fn open(&mut self) {
        self.closed = false;
    }

    /// Drains the set sorted ascending with duplicates removed.
    pub(crate) fn take_sorted(&mut self) -> Vec<RefId> {
        let mut ids = std::mem::take(&mut self.ids);
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// One peer's view of a replicated world: the element graph, its identifier
/// space, the trash quarantine, the dirty set and the pipeline-visible
/// counters. The whole model sits behind the session's data-model lock;
/// nothing in here synchronizes on its own.
pub struct WorldModel {
    pub role: HostRole,
    pub state: WorldState,
    /// Guests refuse deltas until `JoinStartDelta` arrives.
    pub accept_deltas: bool,
    pub state_version: StateVersion,
    pub sync_tick: Tick,
    /// Seconds since the session started, stamped into outgoing headers.
    pub total_time: f64,
    pub local_user: Option<RefId>,
    pub registry: ReferenceController,
    pub trash: Trash,
    pub dirty: DirtySet,
    events: VecDeque<ElementEvent>,
}

impl WorldModel {
    pub fn new(role: HostRole) -> Self {
        Self {
            role,
            state: WorldState::NotStarted,
            accept_deltas: role.is_authority(),
            state_version: 0,
            sync_tick: 0,
            total_time: 0.0,
            local_user: None,
            registry: ReferenceController::new(0),
            trash: Trash::new(),
            dirty: DirtySet::default(),
            events: VecDeque::new(),
        }
    }

    pub fn is_authority(&self) -> bool {
        self.role.is_authority()
    }

    pub fn increment_state_version(&mut self) {
        self.state_version += 1;
    }

    pub fn set_state_version(&mut self, version: StateVersion) {
        self.state_version = version;
    }

    pub fn increment_sync_tick(&mut self) {
        self.sync_tick += 1;
    }

    // Events

    pub fn push_event(&mut self, event: ElementEvent) {
        self.events.push_back(event);
    }

    pub fn drain_events(&mut self) -> Vec<ElementEvent> {
        self.events.drain(..).collect()
    }

    // Element access

    /// Checks the element out of its registry slot, runs `f` with the
    /// element and the rest of the model, and restores the slot.
    pub fn with_element<R>(
        &mut self,
        id: RefId,
        f: impl FnOnce(&mut dyn SyncElement, &mut WorldModel) -> R,
    ) -> Result<R, RegistryError> {
        let mut element = self.registry.take_slot(id)?;
        let out = f(element.as_mut(), self);
        self.registry.restore_slot(id, element);
        Ok(out)
    }

    /// Reads a value field. Fails when the element is missing or of another
    /// kind.
    pub fn value_get<T: WireValue>(&self, id: RefId) -> Result<T, ElementError> {
        let element = self
            .registry
            .get(id)
            .ok_or(RegistryError::NotInRegistry { id })?;
        let field = element
            .downcast_ref::<ValueField<T>>()
            .ok_or(ElementError::WrongKind {
                id,
                expected: "ValueField",
            })?;
        Ok(field.get().clone())
    }

    /// Assigns a value field, returning whether the value actually changed.
    pub fn value_set<T: WireValue>(&mut self, id: RefId, value: T) -> Result<bool, ElementError> {
        self.with_element(id, |element, model| {
            let field = element
                .downcast_mut::<ValueField<T>>()
                .ok_or(ElementError::WrongKind {
                    id,
                    expected: "ValueField",
                })?;
            field.set(model, value)
        })?
    }

    pub fn end_init_phase(&mut self, id: RefId) {
        if let Some(element) = self.registry.get_mut(id) {
            element.core_mut().end_init_phase();
        }
    }

    // Creation & disposal

    /// Runs a child factory and registers the element it returns.
    pub fn create_child(&mut self, factory: ChildFactory) -> Result<RefId, ElementError> {
        let element = factory(self)?;
        let id = element.core().ref_id;
        self.registry.register(id, element)?;
        self.end_init_phase(id);
        Ok(id)
    }

    /// Runs a child factory under an allocation block seeded to `id`, so the
    /// element (and everything it creates) lands at exact positions received
    /// from the network.
    pub fn create_child_at(&mut self, id: RefId, factory: ChildFactory) -> Result<RefId, ElementError> {
        self.registry.allocation_block_begin(id);
        let created = self.create_child(factory);
        let _ = self.registry.allocation_block_end();
        let created = created?;
        debug_assert_eq!(created, id, "factory ignored the seeded allocation block");
        Ok(created)
    }

    /// Registers a pre-built element at a reserved fixture identifier.
    /// Fixtures are built identically on every peer at world construction.
    pub fn register_fixture(
        &mut self,
        element: Box<dyn SyncElement>,
    ) -> Result<RefId, ElementError> {
        let id = element.core().ref_id;
        self.registry.register(id, element)?;
        self.end_init_phase(id);
        Ok(id)
    }

    /// Unregisters and drops the element, after letting it dispose children.
    pub fn dispose_element(&mut self, id: RefId) -> Result<(), RegistryError> {
        let mut element = self.registry.take_slot(id)?;
        element.core_mut().is_disposed = true;
        element.dispose(self);
        self.registry.restore_slot(id, element);
        self.registry.unregister(id);
        Ok(())
    }

    // Trash

    /// Moves a live element into the trash, tagged with `tick`.
    pub fn move_to_trash(&mut self, id: RefId, tick: Tick) -> Result<(), RegistryError> {
        let element = self.registry.take_slot(id)?;
        self.registry.unregister(id);
        self.trash.insert(id, tick, element);
        Ok(())
    }

    /// Restores a trashed element into the live registry iff its trash tick
    /// is at or before `tick`. Returns whether a restore happened.
    pub fn try_retrieve_from_trash(&mut self, tick: Tick, id: RefId) -> bool {
        let Some(element) = self.trash.try_retrieve(tick, id) else {
            return false;
        };
        // the invariant says this id cannot be live while trashed
        self.registry
            .register(id, element)
            .expect("trashed id was simultaneously live");
        true
    }

    pub fn delete_from_trash(&mut self, id: RefId) -> bool {
        self.trash.delete(id)
    }
}
