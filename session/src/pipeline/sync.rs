use std::collections::{HashMap, VecDeque};
use std::sync::{
    atomic::Ordering,
    mpsc::{Receiver, RecvTimeoutError, Sender},
    Arc, Mutex,
};
use std::time::{Duration, Instant};

use log::{info, trace, warn};

use weft_shared::{
    BatchKind, ControlEnvelope, ControlMessage, ElementEvent, JoinGrant, Ping, RecordBatch,
    RecordOutcome, RefId, ReplicatedMap, StreamMessage, SyncElement, SyncMessage, Tick, Validity,
    WorldModel, WorldState, POSITION_MAX, USER_BYTE_LOCAL,
};

use crate::{
    config::SessionConfig,
    pending::PendingStore,
    pipeline::{InboundMessage, OutboundMessage, PeerTable, PipelineShared},
    transport::PeerId,
    users::{user_replicator_id, User},
};

/// How long the sync thread waits for the main thread's refresh signal
/// before proceeding anyway.
const REFRESH_WAIT: Duration = Duration::from_secs(1);

/// Ticks after which an unconfirmed outgoing delta stops being tracked.
const CONFIRM_TRACK_TTL: Tick = 600;

/// An application-queued outgoing stream, addressed at emit time.
pub(crate) struct OutgoingStream {
    pub group: u16,
    pub payload: Vec<u8>,
    pub is_async: bool,
}

pub(crate) type StreamQueue = Arc<Mutex<Vec<OutgoingStream>>>;
pub(crate) type InboundStreams = Arc<Mutex<VecDeque<StreamMessage>>>;

/// The sync worker: the sole writer of sync-element state while it holds
/// the data-model lock. Each cycle it drains the process queue, applies and
/// redistributes batches, hands the lock to the world-update thread, then
/// collects and emits this peer's own delta batch.
pub(crate) struct SyncWorker {
    model: Arc<Mutex<WorldModel>>,
    peers: PeerTable,
    shared: Arc<PipelineShared>,
    process_rx: Receiver<InboundMessage>,
    outbound_tx: Sender<OutboundMessage>,
    outgoing_streams: StreamQueue,
    inbound_streams: InboundStreams,
    cfg: SessionConfig,
    started: Instant,
    pending: PendingStore,
    deferred_deltas: VecDeque<InboundMessage>,
    deferred_streams: VecDeque<StreamMessage>,
    /// Guest: outgoing ticks awaiting the authority's confirmation.
    changes_to_confirm: HashMap<Tick, Vec<RefId>>,
    /// Controls are queued during processing and run at end of tick.
    control_queue: Vec<(PeerId, ControlEnvelope)>,
    /// Authority: peers granted a join, awaiting their full batch.
    users_to_init: Vec<PeerId>,
    confirmations_out: Vec<(PeerId, RecordBatch)>,
    next_user_byte: u8,
    /// Guest: the user id promised by the join grant.
    expected_local_user: Option<RefId>,
    last_stream_times: HashMap<(RefId, u16), f64>,
}

#[allow(clippy::too_many_arguments)]
impl SyncWorker {
    pub fn new(
        model: Arc<Mutex<WorldModel>>,
        peers: PeerTable,
        shared: Arc<PipelineShared>,
        process_rx: Receiver<InboundMessage>,
        outbound_tx: Sender<OutboundMessage>,
        outgoing_streams: StreamQueue,
        inbound_streams: InboundStreams,
        cfg: SessionConfig,
    ) -> Self {
        let pending = PendingStore::new(
            cfg.pending_queue_cap,
            cfg.pending_max_age_ticks,
            cfg.pending_max_attempts,
        );
        Self {
            model,
            peers,
            shared,
            process_rx,
            outbound_tx,
            outgoing_streams,
            inbound_streams,
            cfg,
            started: Instant::now(),
            pending,
            deferred_deltas: VecDeque::new(),
            deferred_streams: VecDeque::new(),
            changes_to_confirm: HashMap::new(),
            control_queue: Vec::new(),
            users_to_init: Vec::new(),
            confirmations_out: Vec::new(),
            next_user_byte: 1,
            expected_local_user: None,
            last_stream_times: HashMap::new(),
        }
    }

    pub fn run(&mut self) {
        info!("sync thread started at {} Hz", self.cfg.sync_rate_hz);
        let tick_interval = self.cfg.tick_interval();
        let model_handle = Arc::clone(&self.model);

        while self.shared.running.load(Ordering::Relaxed) {
            // 1. wait on the process queue, then drain it
            let mut inbox = Vec::new();
            match self.process_rx.recv_timeout(tick_interval) {
                Ok(first) => {
                    inbox.push(first);
                    while let Ok(next) = self.process_rx.try_recv() {
                        inbox.push(next);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if !self.shared.running.load(Ordering::Relaxed) {
                break;
            }

            // 2.-5. apply incoming state under the data-model lock
            {
                let Ok(mut model) = model_handle.lock() else {
                    warn!("data-model lock poisoned; sync thread stopping");
                    break;
                };
                model.total_time = self.started.elapsed().as_secs_f64();
                for inbound in inbox {
                    self.process_incoming(&mut model, inbound);
                }
                self.pending.retry(&mut model);
                self.link_local_user(&mut model);
                if model.is_authority() {
                    model.increment_state_version();
                }
            }

            // 6. hand the lock to the world-update thread for this tick
            self.shared.refresh_finished.wait_timeout(REFRESH_WAIT);
            if !self.shared.running.load(Ordering::Relaxed) {
                break;
            }

            // 7.-10. collect and emit under the re-acquired lock
            {
                let Ok(mut model) = model_handle.lock() else {
                    warn!("data-model lock poisoned; sync thread stopping");
                    break;
                };
                model.total_time = self.started.elapsed().as_secs_f64();
                self.emit_delta_batch(&mut model);
                self.flush_confirmations();
                self.emit_streams(&mut model);
                model.increment_sync_tick();
                self.flush_user_inits(&mut model);
                let controls = std::mem::take(&mut self.control_queue);
                for (from, envelope) in controls {
                    self.handle_control(&mut model, from, envelope);
                }
                self.maybe_ping(&model);
            }
        }

        self.pending.clear();
        self.deferred_deltas.clear();
        info!("sync thread stopped");
    }

    // ---- incoming ----------------------------------------------------

    fn process_incoming(&mut self, model: &mut WorldModel, inbound: InboundMessage) {
        let InboundMessage { from, message } = inbound;
        // guests track the newest authority state version they have seen;
        // their own writes carry it as proof of how current they were
        if let SyncMessage::Batch(batch) = &message {
            if !model.is_authority() && batch.header.state_version > model.state_version {
                model.set_state_version(batch.header.state_version);
            }
        }
        match message {
            SyncMessage::Batch(batch) => match batch.kind {
                BatchKind::Delta => self.process_delta(model, from, batch),
                BatchKind::Full => self.process_full(model, from, batch),
                BatchKind::Confirmation => self.process_confirmation(model, batch),
            },
            SyncMessage::Stream(stream) => self.process_stream(model, from, stream),
            SyncMessage::Control(envelope) => self.control_queue.push((from, envelope)),
            SyncMessage::Ping(ping) => self.process_ping(model, from, ping),
            SyncMessage::Disconnect => self.process_disconnect(model, from),
        }
    }

    fn process_delta(&mut self, model: &mut WorldModel, from: PeerId, mut batch: RecordBatch) {
        batch.header.sender_user = self.peer_user(from);

        if model.state != WorldState::Running || !model.accept_deltas {
            if self.deferred_deltas.len() >= self.cfg.deferred_delta_cap {
                warn!(
                    "deferred delta queue at cap {}; dropping newest batch from peer {from}",
                    self.cfg.deferred_delta_cap
                );
            } else {
                self.deferred_deltas.push_back(InboundMessage {
                    from,
                    message: SyncMessage::Batch(batch),
                });
            }
            return;
        }

        if model.is_authority() {
            self.authority_process_delta(model, from, batch);
        } else {
            self.apply_batch_records(model, &batch);
        }
    }

    /// Authority path: validate, apply accepted records, retransmit the
    /// accepted subset to other peers, and answer the sender with a
    /// confirmation carrying corrections for everything that conflicted.
    fn authority_process_delta(
        &mut self,
        model: &mut WorldModel,
        from: PeerId,
        mut batch: RecordBatch,
    ) {
        model.validate_delta_batch(&mut batch);

        // the state version advances on every accepted delta, so a racing
        // writer that has not seen this acceptance is provably stale
        if batch
            .records
            .iter()
            .any(|record| record.validity == Validity::Valid)
        {
            model.increment_state_version();
        }

        let mut conflicted = Vec::new();
        for index in 0..batch.records.len() {
            let record = batch.records[index].clone();
            match record.validity {
                Validity::Valid => {
                    let payload = batch.record_payload(&record).to_vec();
                    match model.apply_record(
                        BatchKind::Delta,
                        &batch.header,
                        record.target_id,
                        &payload,
                    ) {
                        Ok(RecordOutcome::Applied) => {}
                        Ok(RecordOutcome::NotInRegistry) => {
                            self.pending.park(
                                BatchKind::Delta,
                                batch.header,
                                record.target_id,
                                payload,
                                model.sync_tick,
                            );
                        }
                        Err(error) => {
                            warn!("record for {} failed to apply: {error}", record.target_id)
                        }
                    }
                }
                Validity::Conflict => conflicted.push(record.target_id),
                Validity::Ignore => {
                    trace!("ignoring record for driven element {}", record.target_id)
                }
            }
            batch.records[index].processed = true;
        }

        // forward the accepted subset to everyone else
        let targets = self.broadcast_targets(Some(from));
        if !targets.is_empty() {
            let forward = Self::rebuild_accepted(&batch);
            if !forward.is_empty() {
                self.send_reliable(SyncMessage::Batch(forward), targets);
            }
        }

        // confirmation back to the sender, carrying authoritative state for
        // every conflicted element
        let mut confirmation = RecordBatch::new(BatchKind::Confirmation, model.make_header());
        confirmation.confirm_tick = Some(batch.header.sync_tick);
        for target in conflicted {
            let Ok(mut element) = model.registry.take_slot(target) else {
                continue;
            };
            if confirmation.begin_record(target).is_ok() {
                match element.encode_full(model, confirmation.writer()) {
                    Ok(()) => {
                        let _ = confirmation.finish_record(target);
                    }
                    Err(error) => {
                        confirmation.abort_record();
                        warn!("could not encode correction for {target}: {error}");
                    }
                }
            }
            model.registry.restore_slot(target, element);
        }
        self.confirmations_out.push((from, confirmation));
    }

    /// Guest path: apply every record, parking the ones whose targets have
    /// not been created yet.
    fn apply_batch_records(&mut self, model: &mut WorldModel, batch: &RecordBatch) {
        for record in &batch.records {
            let payload = batch.record_payload(record).to_vec();
            match model.apply_record(batch.kind, &batch.header, record.target_id, &payload) {
                Ok(RecordOutcome::Applied) => {
                    if batch.kind == BatchKind::Full {
                        self.shared.init_applied.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(RecordOutcome::NotInRegistry) => {
                    self.pending.park(
                        batch.kind,
                        batch.header,
                        record.target_id,
                        payload,
                        model.sync_tick,
                    );
                }
                Err(error) => warn!("record for {} failed to apply: {error}", record.target_id),
            }
        }
    }

    fn process_full(&mut self, model: &mut WorldModel, from: PeerId, batch: RecordBatch) {
        if model.is_authority() {
            warn!("authority received a full batch from peer {from}; ignoring");
            return;
        }
        if model.state == WorldState::InitializingDataModel {
            self.shared
                .init_expected
                .fetch_add(batch.records.len() as u64, Ordering::Relaxed);
        }
        self.apply_batch_records(model, &batch);
    }

    fn process_confirmation(&mut self, model: &mut WorldModel, batch: RecordBatch) {
        let Some(tick) = batch.confirm_tick else {
            warn!("confirmation without a confirm tick; dropping");
            return;
        };
        for record in &batch.records {
            let payload = batch.record_payload(record);
            match model.apply_correction(record.target_id, payload) {
                Ok(RecordOutcome::Applied) => {
                    trace!("correction applied to {}", record.target_id)
                }
                Ok(RecordOutcome::NotInRegistry) => {
                    warn!("correction for unknown element {}", record.target_id)
                }
                Err(error) => warn!("correction for {} failed: {error}", record.target_id),
            }
        }
        let tracked = self.changes_to_confirm.remove(&tick).unwrap_or_default();
        model.confirm_elements(tick, &tracked);
    }

    fn process_stream(&mut self, model: &mut WorldModel, from: PeerId, stream: StreamMessage) {
        // best-effort and time-bounded: anything lagging the newest stream
        // of its (user, group) lane by more than the max age is stale
        let lane = (stream.user, stream.group);
        let newest = self
            .last_stream_times
            .get(&lane)
            .copied()
            .unwrap_or(f64::NEG_INFINITY);
        if stream.time + self.cfg.stream_max_age < newest {
            trace!("discarding stale stream for lane {:?}", lane);
            return;
        }
        if stream.time > newest {
            self.last_stream_times.insert(lane, stream.time);
        }

        if model.is_authority() {
            let targets = self.broadcast_targets(Some(from));
            if !targets.is_empty() {
                self.send_unreliable(SyncMessage::Stream(stream.clone()), targets);
            }
        }

        if model.state == WorldState::Running {
            self.inbound_streams
                .lock()
                .expect("stream queue poisoned")
                .push_back(stream);
        } else if self.deferred_streams.len() < self.cfg.deferred_delta_cap {
            self.deferred_streams.push_back(stream);
        }
    }

    fn process_ping(&mut self, model: &mut WorldModel, from: PeerId, ping: Ping) {
        if ping.is_reply {
            let rtt = (model.total_time - ping.sent_time) * 1000.0;
            if let Some(peer) = self
                .peers
                .lock()
                .expect("peer table poisoned")
                .get_mut(&from)
            {
                peer.rtt_millis = Some(rtt.max(0.0));
            }
        } else {
            let reply = Ping {
                sent_time: ping.sent_time,
                is_reply: true,
            };
            self.send_unreliable(SyncMessage::Ping(reply), vec![from]);
        }
    }

    fn process_disconnect(&mut self, model: &mut WorldModel, from: PeerId) {
        info!("peer {from} disconnected");
        let removed = self
            .peers
            .lock()
            .expect("peer table poisoned")
            .remove(&from);
        if model.is_authority() {
            if let Some(user) = removed.and_then(|peer| peer.user) {
                self.remove_user(model, user);
            }
        } else {
            warn!("host connection lost; world failed");
            model.state = WorldState::Failed;
        }
    }

    fn remove_user(&mut self, model: &mut WorldModel, user: RefId) {
        let result = model.with_element(user_replicator_id(), |element, model| {
            let Some(map) = element.downcast_mut::<ReplicatedMap>() else {
                return Ok(false);
            };
            map.remove(model, user)
        });
        match result {
            Ok(Ok(true)) => info!("user {user} removed from the world"),
            Ok(Ok(false)) => {}
            Ok(Err(error)) => warn!("removing user {user} failed: {error}"),
            Err(error) => warn!("user replicator unavailable: {error}"),
        }
    }

    // ---- outgoing ----------------------------------------------------

    fn emit_delta_batch(&mut self, model: &mut WorldModel) {
        let batch = match model.collect_delta_batch() {
            Ok(Some(batch)) => batch,
            Ok(None) => return,
            Err(error) => {
                warn!("delta collection failed: {error}");
                return;
            }
        };
        if model.is_authority() {
            let targets = self.broadcast_targets(None);
            if !targets.is_empty() {
                self.send_reliable(SyncMessage::Batch(batch), targets);
            }
        } else {
            let tick = batch.header.sync_tick;
            let changed: Vec<RefId> = batch.records.iter().map(|r| r.target_id).collect();
            self.changes_to_confirm.insert(tick, changed);
            self.changes_to_confirm
                .retain(|t, _| t + CONFIRM_TRACK_TTL > tick);
            let targets = self.all_peer_ids();
            if !targets.is_empty() {
                self.send_reliable(SyncMessage::Batch(batch), targets);
            }
        }
    }

    fn flush_confirmations(&mut self) {
        for (peer, confirmation) in std::mem::take(&mut self.confirmations_out) {
            self.send_reliable(SyncMessage::Batch(confirmation), vec![peer]);
        }
    }

    fn emit_streams(&mut self, model: &mut WorldModel) {
        let queued: Vec<OutgoingStream> = std::mem::take(
            &mut *self
                .outgoing_streams
                .lock()
                .expect("stream queue poisoned"),
        );
        if queued.is_empty() {
            return;
        }
        let targets = if model.is_authority() {
            self.broadcast_targets(None)
        } else {
            self.all_peer_ids()
        };
        if targets.is_empty() {
            return;
        }
        let user = model.local_user.unwrap_or(RefId::NULL);
        for outgoing in queued {
            let stream = StreamMessage {
                user,
                state_version: model.state_version,
                time: model.total_time,
                group: outgoing.group,
                is_async: outgoing.is_async,
                payload: outgoing.payload,
            };
            self.send_unreliable(SyncMessage::Stream(stream), targets.clone());
        }
    }

    /// Sends the full batch and the start-delta marker to peers whose join
    /// was granted last cycle.
    fn flush_user_inits(&mut self, model: &mut WorldModel) {
        for peer in std::mem::take(&mut self.users_to_init) {
            let batch = match model.collect_full_batch() {
                Ok(batch) => batch,
                Err(error) => {
                    warn!("full-state collection for peer {peer} failed: {error}");
                    continue;
                }
            };
            info!(
                "initializing peer {peer} with {} full record(s)",
                batch.record_count()
            );
            self.send_reliable(SyncMessage::Batch(batch), vec![peer]);
            self.send_control(model, ControlMessage::JoinStartDelta, vec![peer]);
            if let Some(state) = self
                .peers
                .lock()
                .expect("peer table poisoned")
                .get_mut(&peer)
            {
                state.initializing = false;
            }
        }
    }

    fn maybe_ping(&mut self, model: &WorldModel) {
        if !model.is_authority() || self.cfg.ping_interval_ticks == 0 {
            return;
        }
        if model.sync_tick % self.cfg.ping_interval_ticks != 0 {
            return;
        }
        let targets = self.broadcast_targets(None);
        if targets.is_empty() {
            return;
        }
        let ping = Ping {
            sent_time: model.total_time,
            is_reply: false,
        };
        self.send_unreliable(SyncMessage::Ping(ping), targets);
    }

    // ---- control -----------------------------------------------------

    fn handle_control(&mut self, model: &mut WorldModel, from: PeerId, envelope: ControlEnvelope) {
        match envelope.message {
            ControlMessage::JoinRequest(request) => {
                if model.is_authority() {
                    self.handle_join_request(
                        model,
                        from,
                        &request.user_name,
                        &request.machine_id,
                        request.head_device,
                    );
                } else {
                    warn!("guest received a join request; ignoring");
                }
            }
            ControlMessage::JoinGrant(grant) => self.handle_join_grant(model, grant),
            ControlMessage::JoinStartDelta => self.handle_join_start_delta(model),
            ControlMessage::JoinReject { reason } => {
                warn!("join rejected: {reason}");
                model.state = WorldState::Failed;
            }
            ControlMessage::ServerClose => {
                if !model.is_authority() {
                    info!("server closed the world");
                    model.state = WorldState::Failed;
                }
            }
            ControlMessage::RequestFullState => {
                if model.is_authority() {
                    info!("peer {from} requested a fresh full state");
                    if let Some(state) = self
                        .peers
                        .lock()
                        .expect("peer table poisoned")
                        .get_mut(&from)
                    {
                        state.initializing = true;
                    }
                    self.users_to_init.push(from);
                }
            }
        }
    }

    fn handle_join_request(
        &mut self,
        model: &mut WorldModel,
        from: PeerId,
        user_name: &str,
        machine_id: &str,
        head_device: u32,
    ) {
        let current_users = model
            .registry
            .get(user_replicator_id())
            .and_then(|element| element.downcast_ref::<ReplicatedMap>())
            .map(|map| map.len())
            .unwrap_or(0);
        if current_users >= usize::from(self.cfg.max_users) {
            self.send_control(
                model,
                ControlMessage::JoinReject {
                    reason: String::from("world is full"),
                },
                vec![from],
            );
            return;
        }
        if self.next_user_byte >= USER_BYTE_LOCAL {
            self.send_control(
                model,
                ControlMessage::JoinReject {
                    reason: String::from("no identifier namespace left"),
                },
                vec![from],
            );
            return;
        }

        let user_byte = self.next_user_byte;
        self.next_user_byte += 1;
        let start = RefId::new(user_byte, 1);
        let end = RefId::new(user_byte, POSITION_MAX);

        model.registry.allocation_block_begin(start);
        let created = User::create(model, user_name, machine_id, head_device);
        if let Err(error) = model.registry.allocation_block_end() {
            warn!("allocation block imbalance during join: {error}");
        }
        let user_id = match created {
            Ok(id) => id,
            Err(error) => {
                warn!("could not create user for peer {from}: {error}");
                return;
            }
        };

        let added = model.with_element(user_replicator_id(), |element, model| {
            element
                .downcast_mut::<ReplicatedMap>()
                .expect("user replicator fixture has the wrong kind")
                .add(model, user_id, true)
        });
        match added {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!("could not replicate user {user_id}: {error}"),
            Err(error) => warn!("user replicator unavailable: {error}"),
        }
        model.push_event(ElementEvent::UserJoined { user: user_id });

        if let Some(state) = self
            .peers
            .lock()
            .expect("peer table poisoned")
            .get_mut(&from)
        {
            state.user = Some(user_id);
            state.user_byte = user_byte;
        }

        let grant = JoinGrant {
            assigned_user_id: user_id,
            allocation_id_start: start,
            allocation_id_end: end,
            max_users: self.cfg.max_users,
            world_time: model.total_time,
            state_version: model.state_version,
        };
        self.send_control(model, ControlMessage::JoinGrant(grant), vec![from]);
        self.users_to_init.push(from);
        info!("granted join to peer {from} as user {user_id} ({user_name})");
    }

    fn handle_join_grant(&mut self, model: &mut WorldModel, grant: JoinGrant) {
        if model.is_authority() {
            warn!("authority received a join grant; ignoring");
            return;
        }
        info!(
            "join granted: user {}, allocation {}..{}, state version {}",
            grant.assigned_user_id,
            grant.allocation_id_start,
            grant.allocation_id_end,
            grant.state_version
        );
        model.set_state_version(grant.state_version);
        // the full batch can land before this control is handled, so the
        // cursor must start past anything already materialized in the
        // granted namespace
        let user_byte = grant.allocation_id_start.user_byte();
        let next_free = model
            .registry
            .ids_with_user_byte(user_byte)
            .last()
            .and_then(|id| id.checked_next())
            .unwrap_or(grant.allocation_id_start);
        model.registry.set_allocation_range(next_free);
        self.expected_local_user = Some(grant.assigned_user_id);
        model.state = WorldState::InitializingDataModel;
    }

    fn handle_join_start_delta(&mut self, model: &mut WorldModel) {
        if model.is_authority() {
            return;
        }
        info!("data model initialized; world running");
        model.state = WorldState::Running;
        model.accept_deltas = true;
        self.link_local_user(model);

        // replay everything that arrived during initialization
        let deferred: Vec<InboundMessage> = self.deferred_deltas.drain(..).collect();
        for inbound in deferred {
            self.process_incoming(model, inbound);
        }
        let mut streams = self.inbound_streams.lock().expect("stream queue poisoned");
        streams.extend(self.deferred_streams.drain(..));
    }

    fn link_local_user(&mut self, model: &mut WorldModel) {
        if model.local_user.is_some() {
            return;
        }
        let Some(expected) = self.expected_local_user else {
            return;
        };
        if model.registry.contains(expected) {
            model.local_user = Some(expected);
            info!("linked local user {expected}");
        }
    }

    // ---- helpers -----------------------------------------------------

    /// Rebuilds a batch keeping only the records the authority accepted,
    /// preserving record order.
    fn rebuild_accepted(batch: &RecordBatch) -> RecordBatch {
        let mut forward = RecordBatch::new(BatchKind::Delta, batch.header);
        for record in &batch.records {
            if record.validity != Validity::Valid {
                continue;
            }
            if forward.begin_record(record.target_id).is_ok() {
                forward.writer().write_bytes(batch.record_payload(record));
                let _ = forward.finish_record(record.target_id);
            }
        }
        forward
    }

    fn peer_user(&self, peer: PeerId) -> Option<RefId> {
        self.peers
            .lock()
            .expect("peer table poisoned")
            .get(&peer)
            .and_then(|state| state.user)
    }

    /// Every connected peer except initializing ones and `exclude`.
    fn broadcast_targets(&self, exclude: Option<PeerId>) -> Vec<PeerId> {
        self.peers
            .lock()
            .expect("peer table poisoned")
            .iter()
            .filter(|(id, state)| !state.initializing && Some(**id) != exclude)
            .map(|(id, _)| *id)
            .collect()
    }

    fn all_peer_ids(&self) -> Vec<PeerId> {
        self.peers
            .lock()
            .expect("peer table poisoned")
            .keys()
            .copied()
            .collect()
    }

    fn send_reliable(&self, message: SyncMessage, targets: Vec<PeerId>) {
        let _ = self
            .outbound_tx
            .send(OutboundMessage::reliable_to(message, targets));
    }

    fn send_unreliable(&self, message: SyncMessage, targets: Vec<PeerId>) {
        let _ = self
            .outbound_tx
            .send(OutboundMessage::unreliable_to(message, targets));
    }

    fn send_control(&self, model: &WorldModel, message: ControlMessage, targets: Vec<PeerId>) {
        let envelope = ControlEnvelope {
            header: model.make_header(),
            message,
        };
        self.send_reliable(SyncMessage::Control(envelope), targets);
    }
}
