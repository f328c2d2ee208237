use log::warn;
use thiserror::Error;

use weft_serde::ByteReader;

use crate::{
    element::{ElementError, ElementEvent, SyncElement, Validity},
    message::{BatchKind, MessageError, MessageHeader, RecordBatch},
    model::WorldModel,
    ref_id::RefId,
    registry::RegistryError,
    types::Tick,
};

/// Errors raised while producing or applying record batches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Element(#[from] ElementError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Outcome of applying a single inbound record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Applied,
    /// The target RefId is not registered yet; the caller parks the record
    /// and retries once the target appears.
    NotInRegistry,
}

impl WorldModel {
    /// The header stamped onto every outgoing message this tick.
    pub fn make_header(&self) -> MessageHeader {
        MessageHeader {
            state_version: self.state_version,
            sync_tick: self.sync_tick,
            wall_time: self.total_time,
            sender_user: self.local_user,
        }
    }

    /// Drains the dirty set into a delta batch, records sorted ascending by
    /// target id so equal dirty sets produce byte-identical batches.
    /// Returns `None` when nothing is dirty. While the collection runs the
    /// dirty set is closed; mutations from hooks fail rather than corrupt
    /// the pass.
    pub fn collect_delta_batch(&mut self) -> Result<Option<RecordBatch>, ControllerError> {
        if self.dirty.is_empty() {
            return Ok(None);
        }
        self.dirty.close();
        let ids = self.dirty.take_sorted();
        let mut batch = RecordBatch::new(BatchKind::Delta, self.make_header());
        for id in ids {
            let Ok(mut element) = self.registry.take_slot(id) else {
                // dirtied earlier this tick, then trashed or disposed
                continue;
            };
            if element.core().is_disposed {
                self.registry.restore_slot(id, element);
                continue;
            }
            element.core_mut().conflict.last_version = self.sync_tick;
            batch.begin_record(id)?;
            match element.encode_delta(self, batch.writer()) {
                Ok(()) => {
                    batch.finish_record(id)?;
                    element.clear_dirty();
                }
                Err(error) => {
                    batch.abort_record();
                    element.clear_dirty();
                    warn!("dropping delta record for {id}: {error}");
                }
            }
            self.registry.restore_slot(id, element);
        }
        self.dirty.open();
        Ok(if batch.is_empty() { None } else { Some(batch) })
    }

    /// Encodes the full state of every non-local element, ascending by id.
    pub fn collect_full_batch(&mut self) -> Result<RecordBatch, ControllerError> {
        let mut batch = RecordBatch::new(BatchKind::Full, self.make_header());
        for id in self.registry.live_ids_sorted() {
            if id.is_local() {
                continue;
            }
            let Ok(mut element) = self.registry.take_slot(id) else {
                continue;
            };
            batch.begin_record(id)?;
            match element.encode_full(self, batch.writer()) {
                Ok(()) => batch.finish_record(id)?,
                Err(error) => {
                    batch.abort_record();
                    warn!("dropping full record for {id}: {error}");
                }
            }
            self.registry.restore_slot(id, element);
        }
        Ok(batch)
    }

    /// Authority-side validation: annotates each record of a guest's delta
    /// batch as valid, conflicting or ignored. Records whose target is not
    /// registered stay valid; the pending path deals with them.
    pub fn validate_delta_batch(&mut self, batch: &mut RecordBatch) {
        for record in &mut batch.records {
            let Some(element) = self.registry.get(record.target_id) else {
                record.validity = Validity::Valid;
                continue;
            };
            record.validity = element.core().conflict.validate_remote(&batch.header);
        }
    }

    /// Applies one inbound record to its target element. On the authority,
    /// an applied delta also stamps the sender and the current state
    /// version onto the element for later conflict checks.
    pub fn apply_record(
        &mut self,
        kind: BatchKind,
        header: &MessageHeader,
        target: RefId,
        payload: &[u8],
    ) -> Result<RecordOutcome, ControllerError> {
        let Ok(mut element) = self.registry.take_slot(target) else {
            return Ok(RecordOutcome::NotInRegistry);
        };
        let mut reader = ByteReader::new(payload);
        let result = match kind {
            BatchKind::Delta => element.decode_delta(self, &mut reader),
            BatchKind::Full | BatchKind::Confirmation => element.decode_full(self, &mut reader),
        };
        if result.is_ok() && self.is_authority() && kind == BatchKind::Delta {
            let version = self.state_version;
            element.core_mut().conflict.accept(header, version);
        }
        self.registry.restore_slot(target, element);
        result?;
        Ok(RecordOutcome::Applied)
    }

    /// Applies one correction record from a confirmation batch: the element
    /// is invalidated, then replaced by the authoritative full state.
    pub fn apply_correction(
        &mut self,
        target: RefId,
        payload: &[u8],
    ) -> Result<RecordOutcome, ControllerError> {
        let Ok(mut element) = self.registry.take_slot(target) else {
            return Ok(RecordOutcome::NotInRegistry);
        };
        element.core_mut().conflict.is_valid = false;
        self.push_event(ElementEvent::Invalidated { id: target });
        let mut reader = ByteReader::new(payload);
        let result = element.decode_full(self, &mut reader);
        self.registry.restore_slot(target, element);
        result?;
        Ok(RecordOutcome::Applied)
    }

    /// Advances `last_confirmed_tick` on every element whose changes the
    /// authority just acknowledged, then evicts settled trash entries.
    pub fn confirm_elements(&mut self, tick: Tick, ids: &[RefId]) {
        for &id in ids {
            let Some(element) = self.registry.get_mut(id) else {
                continue;
            };
            if let Err(error) = element.core_mut().conflict.confirm(tick) {
                warn!("confirmation for {id} rejected: {error}");
            }
        }
        self.trash.evict_confirmed(tick);
    }
}
