use std::collections::HashMap;

use log::{trace, warn};

use weft_shared::{BatchKind, MessageHeader, RecordOutcome, RefId, Tick, WorldModel};

/// One record whose target was not in the registry when it arrived.
pub(crate) struct PendingRecord {
    pub kind: BatchKind,
    pub header: MessageHeader,
    pub payload: Vec<u8>,
    pub parked_at_tick: Tick,
    pub attempts: u32,
}

/// Parked full/delta records, keyed by the missing target.
///
/// A delta can refer to an element whose creation record is still en route
/// in a later batch; instead of dropping it, the record waits here and is
/// replayed as a single-record batch once the target registers. Entries are
/// bounded three ways: per-record age in ticks, per-record retry attempts,
/// and a total cap beyond which the newest record is dropped with a
/// warning.
pub(crate) struct PendingStore {
    full: HashMap<RefId, Vec<PendingRecord>>,
    delta: HashMap<RefId, Vec<PendingRecord>>,
    total: usize,
    cap: usize,
    max_age_ticks: u64,
    max_attempts: u32,
}

impl PendingStore {
    pub fn new(cap: usize, max_age_ticks: u64, max_attempts: u32) -> Self {
        Self {
            full: HashMap::new(),
            delta: HashMap::new(),
            total: 0,
            cap,
            max_age_ticks,
            max_attempts,
        }
    }

    pub fn len(&self) -> usize {
        self.total
    }

    /// Parks a record. At the cap the newest record is the one dropped, so
    /// memory stays bounded without disturbing records already waiting.
    pub fn park(
        &mut self,
        kind: BatchKind,
        header: MessageHeader,
        target: RefId,
        payload: Vec<u8>,
        now_tick: Tick,
    ) {
        if self.total >= self.cap {
            warn!("pending queue at cap {}; dropping newest record for {target}", self.cap);
            return;
        }
        let record = PendingRecord {
            kind,
            header,
            payload,
            parked_at_tick: now_tick,
            attempts: 0,
        };
        let bucket = match kind {
            BatchKind::Full | BatchKind::Confirmation => &mut self.full,
            BatchKind::Delta => &mut self.delta,
        };
        bucket.entry(target).or_default().push(record);
        self.total += 1;
        trace!("parked {kind:?} record for {target}");
    }

    /// One retry pass: replays records whose targets have appeared, ages out
    /// the rest. Full records replay before delta records for the same
    /// target, since the full state creates what the delta mutates.
    pub fn retry(&mut self, model: &mut WorldModel) {
        let now = model.sync_tick;
        for bucket_first in [true, false] {
            let bucket = if bucket_first {
                &mut self.full
            } else {
                &mut self.delta
            };
            let targets: Vec<RefId> = bucket.keys().copied().collect();
            for target in targets {
                let Some(records) = bucket.get_mut(&target) else {
                    continue;
                };
                let mut kept = Vec::new();
                for mut record in records.drain(..) {
                    if now.saturating_sub(record.parked_at_tick) > self.max_age_ticks {
                        warn!("dropping pending record for {target}: older than {} ticks", self.max_age_ticks);
                        self.total -= 1;
                        continue;
                    }
                    record.attempts += 1;
                    if record.attempts > self.max_attempts {
                        warn!("dropping pending record for {target}: {} attempts exhausted", self.max_attempts);
                        self.total -= 1;
                        continue;
                    }
                    if !model.registry.contains(target) {
                        kept.push(record);
                        continue;
                    }
                    match model.apply_record(record.kind, &record.header, target, &record.payload) {
                        Ok(RecordOutcome::Applied) => {
                            trace!("replayed pending record for {target}");
                            self.total -= 1;
                        }
                        Ok(RecordOutcome::NotInRegistry) => kept.push(record),
                        Err(error) => {
                            warn!("pending record for {target} failed to decode: {error}");
                            self.total -= 1;
                        }
                    }
                }
                if kept.is_empty() {
                    bucket.remove(&target);
                } else {
                    *records = kept;
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.full.clear();
        self.delta.clear();
        self.total = 0;
    }
}
