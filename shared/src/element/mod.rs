use std::any::Any;

use weft_serde::{ByteReader, ByteWriter};

use crate::model::WorldModel;

mod core;
mod dictionary;
mod error;
mod event;
mod list;
mod replicated;
mod value;

pub use self::core::{ConflictState, ElementCore, Validity};
pub use dictionary::KeyedDictionary;
pub use error::ElementError;
pub use event::ElementEvent;
pub use list::ElementList;
pub use replicated::{ElementCtor, ReplicatedMap, ReplicatorKind, TypeRegistry, TypedReplicatorKind};
pub use value::ValueField;

/// Factory used by containers to construct child elements. The factory
/// allocates the child's identifier from the current allocation context and
/// registers any sub-members it creates, but leaves the returned root
/// element unregistered; the caller registers it.
pub type ChildFactory = fn(&mut WorldModel) -> Result<Box<dyn SyncElement>, ElementError>;

/// The common base of all replicated state.
///
/// Elements live in the world registry and are checked out of their slot
/// while operated on, so implementations receive the rest of the model
/// through `&mut WorldModel`.
pub trait SyncElement: Any + Send {
    fn core(&self) -> &ElementCore;
    fn core_mut(&mut self) -> &mut ElementCore;

    /// A short human-readable kind tag for logs.
    fn kind_name(&self) -> &'static str;

    fn encode_full(
        &mut self,
        model: &mut WorldModel,
        writer: &mut ByteWriter,
    ) -> Result<(), ElementError>;

    fn decode_full(
        &mut self,
        model: &mut WorldModel,
        reader: &mut ByteReader,
    ) -> Result<(), ElementError>;

    fn encode_delta(
        &mut self,
        model: &mut WorldModel,
        writer: &mut ByteWriter,
    ) -> Result<(), ElementError>;

    fn decode_delta(
        &mut self,
        model: &mut WorldModel,
        reader: &mut ByteReader,
    ) -> Result<(), ElementError>;

    /// Snapshots the last-synced state and drops pending per-tick records.
    fn clear_dirty(&mut self);

    /// Unhooks the element; containers dispose their children.
    fn dispose(&mut self, model: &mut WorldModel);

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl std::fmt::Debug for dyn SyncElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.kind_name())
            .field("ref_id", &self.core().ref_id)
            .finish()
    }
}

impl dyn SyncElement {
    pub fn downcast_ref<T: SyncElement>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: SyncElement>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// Marks an element dirty and enqueues it in the controller's dirty set
/// exactly once per tick. Mutations during the init phase, on local
/// elements, or on disposed elements generate no sync.
pub(crate) fn invalidate(
    core: &mut ElementCore,
    model: &mut WorldModel,
) -> Result<(), ElementError> {
    core.version += 1;
    if !core.generates_sync() || core.is_dirty {
        return Ok(());
    }
    model.dirty.add(core.ref_id)?;
    core.is_dirty = true;
    Ok(())
}
