use std::any::Any;

use weft_serde::{ByteReader, ByteWriter, WireValue};

use crate::{
    element::{invalidate, ElementCore, ElementError, ElementEvent, SyncElement},
    model::WorldModel,
    ref_id::RefId,
};

/// A replicated primitive value.
///
/// Assignment only takes effect when the new value differs under the wire
/// equality of `T` (exact for integers and strings, approximate for floats
/// and vectors). An optional local filter transforms assigned values before
/// the comparison. Delta and full payloads are identical: the raw value.
pub struct ValueField<T: WireValue> {
    core: ElementCore,
    value: T,
    last_synced: T,
    local_filter: Option<fn(T) -> T>,
}

impl<T: WireValue> ValueField<T> {
    pub fn with_id(id: RefId, value: T) -> Self {
        Self {
            core: ElementCore::new(id),
            last_synced: value.clone(),
            value,
            local_filter: None,
        }
    }

    /// Allocates an identifier in the current allocation context, registers
    /// the field and returns its id.
    pub fn register_new(model: &mut WorldModel, value: T) -> Result<RefId, ElementError> {
        let id = model.registry.allocate()?;
        let field = Self::with_id(id, value);
        model.registry.register(id, Box::new(field))?;
        model.end_init_phase(id);
        Ok(id)
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn set_local_filter(&mut self, filter: fn(T) -> T) {
        self.local_filter = Some(filter);
    }

    /// Assigns a new value. Returns `Ok(true)` when the value changed and a
    /// sync record was queued.
    pub fn set(&mut self, model: &mut WorldModel, new_value: T) -> Result<bool, ElementError> {
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
        let new_value = match self.local_filter {
            Some(filter) => filter(new_value),
            None => new_value,
        };
        if self.value.wire_eq(&new_value) {
            return Ok(false);
        }
        self.value = new_value;
        invalidate(&mut self.core, model)?;
        model.push_event(ElementEvent::Changed {
            id: self.core.ref_id,
        });
        Ok(true)
    }
}

impl<T: WireValue + Default> ValueField<T> {
    /// Child factory for containers of `T`-valued fields.
    pub fn factory(model: &mut WorldModel) -> Result<Box<dyn SyncElement>, ElementError> {
        let id = model.registry.allocate()?;
        Ok(Box::new(Self::with_id(id, T::default())))
    }
}

impl<T: WireValue> SyncElement for ValueField<T> {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn kind_name(&self) -> &'static str {
        "ValueField"
    }

    fn encode_full(
        &mut self,
        _model: &mut WorldModel,
        writer: &mut ByteWriter,
    ) -> Result<(), ElementError> {
        self.value.encode(writer);
        Ok(())
    }

    fn decode_full(
        &mut self,
        model: &mut WorldModel,
        reader: &mut ByteReader,
    ) -> Result<(), ElementError> {
        let value = T::decode(reader)?;
        self.value = value.clone();
        self.last_synced = value;
        model.push_event(ElementEvent::Changed {
            id: self.core.ref_id,
        });
        Ok(())
    }

    fn encode_delta(
        &mut self,
        model: &mut WorldModel,
        writer: &mut ByteWriter,
    ) -> Result<(), ElementError> {
        self.encode_full(model, writer)
    }

    fn decode_delta(
        &mut self,
        model: &mut WorldModel,
        reader: &mut ByteReader,
    ) -> Result<(), ElementError> {
        self.decode_full(model, reader)
    }

    fn clear_dirty(&mut self) {
        self.core.is_dirty = false;
        self.last_synced = self.value.clone();
    }

    fn dispose(&mut self, _model: &mut WorldModel) {}

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
