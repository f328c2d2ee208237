use std::collections::BTreeMap;

use thiserror::Error;

use crate::{
    element::SyncElement,
    ref_id::{RefId, FIXTURE_FLOOR, POSITION_MAX, USER_BYTE_GLOBAL, USER_BYTE_LOCAL},
};

/// Errors raised by [`ReferenceController`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The 56-bit position space of the current namespace is exhausted.
    #[error("RefId namespace for user byte {user_byte} is exhausted")]
    NamespaceExhausted { user_byte: u8 },

    /// An element was registered twice under the same identifier.
    #[error("RefId {id} is already registered")]
    DuplicateId { id: RefId },

    /// A lookup or checkout referenced an identifier with no live element.
    #[error("RefId {id} is not in the registry")]
    NotInRegistry { id: RefId },

    /// An element slot was checked out twice, or restored while occupied.
    #[error("RefId {id} slot is already checked out")]
    SlotCheckedOut { id: RefId },

    /// `allocation_block_end` without a matching begin.
    #[error("Allocation block stack is empty")]
    UnbalancedAllocationBlock,
}

/// One entry on the allocation-context stack.
#[derive(Debug, Clone, Copy)]
struct CursorFrame {
    next: RefId,
    local: bool,
}

/// Issues RefIds and owns the live `RefId -> element` mapping of one world.
///
/// Allocation contexts let a peer materialize identifiers received from the
/// network at exact positions: inside `allocation_block_begin(start)` the
/// cursor is seeded to `start`, so host and guest assign equal identifiers
/// to co-created sub-objects. Local allocation blocks force everything
/// created inside into the never-synchronized local namespace.
pub struct ReferenceController {
    slots: BTreeMap<RefId, Option<Box<dyn SyncElement>>>,
    blocks: Vec<CursorFrame>,
    own_user_byte: u8,
    next_position: u64,
    next_local_position: u64,
}

impl ReferenceController {
    pub fn new(own_user_byte: u8) -> Self {
        Self {
            slots: BTreeMap::new(),
            blocks: Vec::new(),
            own_user_byte,
            next_position: 1,
            next_local_position: 1,
        }
    }

    pub fn own_user_byte(&self) -> u8 {
        self.own_user_byte
    }

    /// Rebinds this peer's allocation namespace; used when a join grant
    /// assigns the guest its user byte and starting position.
    pub fn set_allocation_range(&mut self, start: RefId) {
        self.own_user_byte = start.user_byte();
        self.next_position = start.position();
    }

    fn position_limit(user_byte: u8) -> u64 {
        // the top of the global namespace is reserved for fixtures
        if user_byte == USER_BYTE_GLOBAL {
            FIXTURE_FLOOR
        } else {
            POSITION_MAX
        }
    }

    /// Returns a unique identifier in the current allocation context.
    pub fn allocate(&mut self) -> Result<RefId, RegistryError> {
        if let Some(frame) = self.blocks.last_mut() {
            if frame.local {
                return Self::bump_local(&mut self.next_local_position);
            }
            let id = frame.next;
            let user_byte = id.user_byte();
            if id.position() >= Self::position_limit(user_byte) {
                return Err(RegistryError::NamespaceExhausted { user_byte });
            }
            frame.next = RefId::new(user_byte, id.position() + 1);
            return Ok(id);
        }

        let user_byte = self.own_user_byte;
        if self.next_position >= Self::position_limit(user_byte) {
            return Err(RegistryError::NamespaceExhausted { user_byte });
        }
        let id = RefId::new(user_byte, self.next_position);
        self.next_position += 1;
        Ok(id)
    }

    fn bump_local(next_local: &mut u64) -> Result<RefId, RegistryError> {
        if *next_local >= POSITION_MAX {
            return Err(RegistryError::NamespaceExhausted {
                user_byte: USER_BYTE_LOCAL,
            });
        }
        let id = RefId::new(USER_BYTE_LOCAL, *next_local);
        *next_local += 1;
        Ok(id)
    }

    /// Seeds the allocation cursor to `start_id`. Nested blocks stack; the
    /// cursor never decreases across consecutive allocations in one block.
    pub fn allocation_block_begin(&mut self, start_id: RefId) {
        self.blocks.push(CursorFrame {
            next: start_id,
            local: false,
        });
    }

    /// Pops the innermost allocation block. If the block allocated inside
    /// this peer's own namespace beyond the main cursor, the main cursor
    /// advances past the consumed identifiers.
    pub fn allocation_block_end(&mut self) -> Result<(), RegistryError> {
        let frame = self
            .blocks
            .pop()
            .ok_or(RegistryError::UnbalancedAllocationBlock)?;
        if !frame.local
            && frame.next.user_byte() == self.own_user_byte
            && frame.next.position() > self.next_position
        {
            self.next_position = frame.next.position();
        }
        Ok(())
    }

    pub fn local_allocation_block_begin(&mut self) {
        self.blocks.push(CursorFrame {
            next: RefId::NULL,
            local: true,
        });
    }

    pub fn local_allocation_block_end(&mut self) -> Result<(), RegistryError> {
        match self.blocks.pop() {
            Some(frame) if frame.local => Ok(()),
            Some(frame) => {
                // restore and report; a mismatched end is a caller bug
                self.blocks.push(frame);
                Err(RegistryError::UnbalancedAllocationBlock)
            }
            None => Err(RegistryError::UnbalancedAllocationBlock),
        }
    }

    pub fn in_local_block(&self) -> bool {
        self.blocks.last().is_some_and(|frame| frame.local)
    }

    pub fn register(
        &mut self,
        id: RefId,
        element: Box<dyn SyncElement>,
    ) -> Result<(), RegistryError> {
        if self.slots.contains_key(&id) {
            return Err(RegistryError::DuplicateId { id });
        }
        self.slots.insert(id, Some(element));
        Ok(())
    }

    /// Removes the mapping. Absent identifiers are tolerated.
    pub fn unregister(&mut self, id: RefId) -> Option<Box<dyn SyncElement>> {
        self.slots.remove(&id).flatten()
    }

    pub fn contains(&self, id: RefId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, id: RefId) -> Option<&dyn SyncElement> {
        self.slots.get(&id).and_then(|slot| slot.as_deref())
    }

    pub fn get_mut(&mut self, id: RefId) -> Option<&mut Box<dyn SyncElement>> {
        self.slots.get_mut(&id).and_then(|slot| slot.as_mut())
    }

    /// Checks an element out of its slot so it can be operated on while the
    /// rest of the registry stays reachable. Must be paired with
    /// [`ReferenceController::restore_slot`].
    pub fn take_slot(&mut self, id: RefId) -> Result<Box<dyn SyncElement>, RegistryError> {
        match self.slots.get_mut(&id) {
            None => Err(RegistryError::NotInRegistry { id }),
            Some(slot) => slot.take().ok_or(RegistryError::SlotCheckedOut { id }),
        }
    }

    pub fn restore_slot(&mut self, id: RefId, element: Box<dyn SyncElement>) {
        match self.slots.get_mut(&id) {
            Some(slot) if slot.is_none() => *slot = Some(element),
            // the slot was unregistered while checked out; drop the element
            Some(_) | None => {}
        }
    }

    /// All live identifiers in ascending order.
    pub fn live_ids_sorted(&self) -> Vec<RefId> {
        self.slots.keys().copied().collect()
    }

    /// Live identifiers belonging to one peer's namespace, ascending.
    pub fn ids_with_user_byte(&self, user_byte: u8) -> Vec<RefId> {
        self.slots
            .keys()
            .copied()
            .filter(|id| id.user_byte() == user_byte)
            .collect()
    }
}
