use std::collections::{HashMap, VecDeque};
use std::sync::{
    atomic::Ordering,
    mpsc::{channel, Sender},
    Arc, Mutex,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{info, warn};

use weft_shared::{
    ControlEnvelope, ControlMessage, ElementEvent, HostRole, JoinRequest, RefId, ReplicatedMap,
    StreamMessage, SyncMessage, WorldModel, WorldState,
};

use crate::{
    config::SessionConfig,
    error::SessionError,
    pipeline::{
        run_decode_thread, run_encode_thread, InboundStreams, OutboundMessage, OutgoingStream,
        PeerState, PeerTable, PipelineShared, StreamQueue, SyncWorker,
    },
    stats::StatsSnapshot,
    transport::{Connection, Listener, PeerId},
    users::{install_world_fixtures, user_replicator_id, User},
};

/// One peer's replicated world and its sync pipeline.
///
/// `Session::host` starts the authority; `Session::join` connects a guest.
/// The world-update thread calls [`Session::world_update`] once per frame:
/// the closure runs under the data-model lock, and its completion releases
/// the sync thread into its collection half of the tick.
pub struct Session {
    model: Arc<Mutex<WorldModel>>,
    peers: PeerTable,
    shared: Arc<PipelineShared>,
    outbound_tx: Sender<OutboundMessage>,
    outgoing_streams: StreamQueue,
    inbound_streams: InboundStreams,
    listener: Option<Box<dyn Listener>>,
    threads: Vec<JoinHandle<()>>,
    config: SessionConfig,
    disposed: bool,
}

struct Pipeline {
    raw_tx: Sender<(PeerId, Vec<u8>)>,
    outbound_tx: Sender<OutboundMessage>,
    threads: Vec<JoinHandle<()>>,
    outgoing_streams: StreamQueue,
    inbound_streams: InboundStreams,
}

impl Session {
    /// Starts an authority session. The local user is created immediately
    /// and the world goes straight to `Running`; guests arrive through the
    /// listener.
    pub fn host(config: SessionConfig, mut listener: Box<dyn Listener>) -> Result<Self, SessionError> {
        let mut model = WorldModel::new(HostRole::Authority);
        install_world_fixtures(&mut model)?;
        let machine_id = config.resolve_machine_id();
        let host_user = User::create(&mut model, &config.user_name, &machine_id, config.head_device)?;
        model
            .with_element(user_replicator_id(), |element, model| {
                element
                    .downcast_mut::<ReplicatedMap>()
                    .expect("user replicator fixture has the wrong kind")
                    .add(model, host_user, true)
            })
            .map_err(weft_shared::ElementError::from)??;
        model.local_user = Some(host_user);
        model.state = WorldState::Running;
        info!("hosting world as user {host_user} ({})", config.user_name);

        let model = Arc::new(Mutex::new(model));
        let peers: PeerTable = Arc::new(Mutex::new(HashMap::new()));
        let shared = Arc::new(PipelineShared::new());
        let pipeline = Self::spawn_pipeline(&model, &peers, &shared, &config);

        // accepted peers are wired into the raw queue and marked as
        // initializing until their full batch goes out
        let accept_peers = Arc::clone(&peers);
        let accept_raw = pipeline.raw_tx.clone();
        listener.set_accept_sink(Box::new(move |mut conn| {
            let peer = conn.peer_id();
            wire_connection(&mut conn, &accept_raw);
            info!("peer {peer} connected from {}", conn.address());
            accept_peers.lock().expect("peer table poisoned").insert(
                peer,
                PeerState {
                    conn,
                    user: None,
                    user_byte: 0,
                    initializing: true,
                    rtt_millis: None,
                },
            );
        }));

        Ok(Self {
            model,
            peers,
            shared,
            outbound_tx: pipeline.outbound_tx,
            outgoing_streams: pipeline.outgoing_streams,
            inbound_streams: pipeline.inbound_streams,
            listener: Some(listener),
            threads: pipeline.threads,
            config,
            disposed: false,
        })
    }

    /// Starts a guest session over an established connection to the host
    /// and sends the join request. Use [`Session::wait_until_running`] to
    /// block until the handshake completes.
    pub fn join(config: SessionConfig, mut conn: Box<dyn Connection>) -> Result<Self, SessionError> {
        let mut model = WorldModel::new(HostRole::Guest);
        install_world_fixtures(&mut model)?;
        model.state = WorldState::InitializingNetwork;
        let join_header = model.make_header();

        let model = Arc::new(Mutex::new(model));
        let peers: PeerTable = Arc::new(Mutex::new(HashMap::new()));
        let shared = Arc::new(PipelineShared::new());
        let pipeline = Self::spawn_pipeline(&model, &peers, &shared, &config);

        let host_peer = conn.peer_id();
        wire_connection(&mut conn, &pipeline.raw_tx);
        peers.lock().expect("peer table poisoned").insert(
            host_peer,
            PeerState {
                conn,
                user: None,
                user_byte: 0,
                initializing: false,
                rtt_millis: None,
            },
        );

        let request = ControlMessage::JoinRequest(JoinRequest {
            user_name: config.user_name.clone(),
            machine_id: config.resolve_machine_id(),
            user_id: RefId::NULL,
            head_device: config.head_device,
        });
        let envelope = ControlEnvelope {
            header: join_header,
            message: request,
        };
        let _ = pipeline.outbound_tx.send(OutboundMessage::reliable_to(
            SyncMessage::Control(envelope),
            vec![host_peer],
        ));
        model.lock().expect("data-model lock poisoned").state = WorldState::WaitingForJoinGrant;
        info!("join request sent to host");

        Ok(Self {
            model,
            peers,
            shared,
            outbound_tx: pipeline.outbound_tx,
            outgoing_streams: pipeline.outgoing_streams,
            inbound_streams: pipeline.inbound_streams,
            listener: None,
            threads: pipeline.threads,
            config,
            disposed: false,
        })
    }

    fn spawn_pipeline(
        model: &Arc<Mutex<WorldModel>>,
        peers: &PeerTable,
        shared: &Arc<PipelineShared>,
        config: &SessionConfig,
    ) -> Pipeline {
        let (raw_tx, raw_rx) = channel();
        let (process_tx, process_rx) = channel();
        let (outbound_tx, outbound_rx) = channel();
        let outgoing_streams: StreamQueue = Arc::new(Mutex::new(Vec::new()));
        let inbound_streams: InboundStreams = Arc::new(Mutex::new(VecDeque::new()));

        let decode_shared = Arc::clone(shared);
        let decode = thread::Builder::new()
            .name(String::from("weft-decode"))
            .spawn(move || run_decode_thread(raw_rx, process_tx, decode_shared))
            .expect("could not spawn decode thread");

        let encode_peers = Arc::clone(peers);
        let encode_shared = Arc::clone(shared);
        let encode = thread::Builder::new()
            .name(String::from("weft-encode"))
            .spawn(move || run_encode_thread(outbound_rx, encode_peers, encode_shared))
            .expect("could not spawn encode thread");

        let mut worker = SyncWorker::new(
            Arc::clone(model),
            Arc::clone(peers),
            Arc::clone(shared),
            process_rx,
            outbound_tx.clone(),
            Arc::clone(&outgoing_streams),
            Arc::clone(&inbound_streams),
            config.clone(),
        );
        let sync = thread::Builder::new()
            .name(String::from("weft-sync"))
            .spawn(move || worker.run())
            .expect("could not spawn sync thread");

        Pipeline {
            raw_tx,
            outbound_tx,
            threads: vec![decode, encode, sync],
            outgoing_streams,
            inbound_streams,
        }
    }

    // ---- the world-update handoff ------------------------------------

    /// Runs one world update under the data-model lock, then signals the
    /// sync thread that this tick's refresh has finished.
    pub fn world_update<R>(
        &self,
        update: impl FnOnce(&mut WorldModel) -> R,
    ) -> Result<R, SessionError> {
        if self.disposed {
            return Err(SessionError::Disposed);
        }
        let result = {
            let mut model = self.model.lock().map_err(|_| SessionError::Poisoned)?;
            update(&mut model)
        };
        self.shared.refresh_finished.set();
        Ok(result)
    }

    // ---- reads -------------------------------------------------------

    pub fn state(&self) -> WorldState {
        self.model
            .lock()
            .map(|model| model.state)
            .unwrap_or(WorldState::Failed)
    }

    pub fn local_user(&self) -> Option<RefId> {
        self.model.lock().ok().and_then(|model| model.local_user)
    }

    pub fn statistics(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers
            .lock()
            .map(|table| table.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn rtt_millis(&self, peer: PeerId) -> Option<f64> {
        self.peers
            .lock()
            .ok()
            .and_then(|table| table.get(&peer).and_then(|state| state.rtt_millis))
    }

    /// Progress through `InitializingDataModel`, 0..1.
    pub fn initialization_progress(&self) -> f64 {
        if self.state() == WorldState::Running {
            return 1.0;
        }
        let expected = self.shared.init_expected.load(Ordering::Relaxed);
        let applied = self.shared.init_applied.load(Ordering::Relaxed);
        if expected == 0 {
            return 0.0;
        }
        (applied as f64 / expected as f64).min(1.0)
    }

    pub fn initialization_status(&self) -> String {
        match self.state() {
            WorldState::NotStarted => String::from("not started"),
            WorldState::InitializingNetwork => String::from("initializing network"),
            WorldState::WaitingForJoinGrant => String::from("waiting for join grant"),
            WorldState::InitializingDataModel => format!(
                "initializing data model ({}/{})",
                self.shared.init_applied.load(Ordering::Relaxed),
                self.shared.init_expected.load(Ordering::Relaxed)
            ),
            WorldState::Running => String::from("running"),
            WorldState::Failed => String::from("failed"),
        }
    }

    /// Blocks until the world reaches `Running`, the world fails, or the
    /// timeout elapses. Guests use this after [`Session::join`].
    pub fn wait_until_running(&self, timeout: Duration) -> Result<(), SessionError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.state() {
                WorldState::Running => return Ok(()),
                WorldState::Failed => {
                    return Err(SessionError::WorldFailed {
                        reason: String::from("world failed during join"),
                    })
                }
                _ => {}
            }
            if Instant::now() >= deadline {
                return Err(SessionError::JoinTimeout {
                    seconds: timeout.as_secs(),
                    status: self.initialization_status(),
                });
            }
            // keep releasing the sync thread while we wait
            self.shared.refresh_finished.set();
            thread::sleep(Duration::from_millis(5));
        }
    }

    // ---- events & streams --------------------------------------------

    pub fn drain_events(&self) -> Vec<ElementEvent> {
        self.model
            .lock()
            .map(|mut model| model.drain_events())
            .unwrap_or_default()
    }

    /// Queues an outgoing stream; the sync thread addresses and sends it
    /// on the next cycle over the unreliable path.
    pub fn send_stream(&self, group: u16, payload: Vec<u8>, is_async: bool) {
        self.outgoing_streams
            .lock()
            .expect("stream queue poisoned")
            .push(OutgoingStream {
                group,
                payload,
                is_async,
            });
    }

    pub fn drain_streams(&self) -> Vec<StreamMessage> {
        self.inbound_streams
            .lock()
            .map(|mut queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    // ---- shutdown ----------------------------------------------------

    /// Stops the pipeline: peers get a graceful disconnect (the host also
    /// fans out a server-close control first), the run flag drops, every
    /// worker is woken and joined within its poll timeout, and queued
    /// messages are discarded.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        let targets = self.peer_ids();
        if !targets.is_empty() {
            if self.listener.is_some() {
                if let Ok(model) = self.model.lock() {
                    let envelope = ControlEnvelope {
                        header: model.make_header(),
                        message: ControlMessage::ServerClose,
                    };
                    let _ = self.outbound_tx.send(OutboundMessage::reliable_to(
                        SyncMessage::Control(envelope),
                        targets.clone(),
                    ));
                }
            }
            let _ = self
                .outbound_tx
                .send(OutboundMessage::reliable_to(SyncMessage::Disconnect, targets));
            // give the encode thread one poll interval to flush
            thread::sleep(Duration::from_millis(20));
        }

        self.shared.running.store(false, Ordering::Relaxed);
        self.shared.refresh_finished.set();
        if let Some(listener) = &self.listener {
            listener.close();
        }
        if let Ok(table) = self.peers.lock() {
            for state in table.values() {
                state.conn.close();
            }
        }
        let timeout = self.config.thread_join_timeout;
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("weft-worker").to_string();
            if handle.join().is_err() {
                warn!("{name} panicked during shutdown (waited up to {timeout:?})");
            }
        }
        info!("session disposed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn wire_connection(conn: &mut Box<dyn Connection>, raw_tx: &Sender<(PeerId, Vec<u8>)>) {
    let data_tx = raw_tx.clone();
    conn.set_data_sink(Box::new(move |peer, bytes| {
        let _ = data_tx.send((peer, bytes));
    }));
    let closed_tx = raw_tx.clone();
    conn.set_closed_sink(Box::new(move |peer, reason| {
        warn!("connection to peer {peer} closed: {reason}");
        // surfaces as a disconnect message so the sync thread cleans up
        let _ = closed_tx.send((peer, vec![8]));
    }));
}
