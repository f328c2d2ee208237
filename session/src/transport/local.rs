use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{channel, Receiver, RecvTimeoutError, Sender},
    Arc, Mutex,
};
use std::thread;
use std::time::Duration;

use log::warn;

use crate::transport::{
    AcceptSink, ClosedSink, Connection, DataSink, Listener, PeerId, TransportError,
};

/// The peer id guests see for the host end of a local pair.
pub const LOCAL_HOST_PEER: PeerId = 0;

const PUMP_POLL: Duration = Duration::from_millis(50);

/// An in-memory transport joining sessions inside one process; the local
/// analogue of a socket pair, used by demos and the integration tests.
pub struct LocalHub {
    accept_tx: Sender<Box<dyn Connection>>,
    accept_rx: Option<Receiver<Box<dyn Connection>>>,
    next_peer: PeerId,
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalHub {
    pub fn new() -> Self {
        let (accept_tx, accept_rx) = channel();
        Self {
            accept_tx,
            accept_rx: Some(accept_rx),
            next_peer: 1,
        }
    }

    /// The host-side accept surface. May be taken once.
    pub fn listener(&mut self) -> LocalListener {
        LocalListener {
            accept_rx: Some(
                self.accept_rx
                    .take()
                    .expect("LocalHub::listener may only be taken once"),
            ),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Opens a new guest link: the host side lands on the listener, the
    /// guest side is returned. The concrete type is exposed so tests can
    /// flip the lossy flag before boxing.
    pub fn connect(&mut self) -> LocalEndpoint {
        let guest_peer = self.next_peer;
        self.next_peer += 1;

        let (host_to_guest_tx, host_to_guest_rx) = channel();
        let (guest_to_host_tx, guest_to_host_rx) = channel();
        let open = Arc::new(AtomicBool::new(true));

        let host_side = LocalEndpoint {
            peer_id: guest_peer,
            out_tx: host_to_guest_tx,
            in_rx: Mutex::new(Some(guest_to_host_rx)),
            open: open.clone(),
            drop_unreliable: Arc::new(AtomicBool::new(false)),
            closed_sink: Arc::new(Mutex::new(None)),
        };
        let guest_side = LocalEndpoint {
            peer_id: LOCAL_HOST_PEER,
            out_tx: guest_to_host_tx,
            in_rx: Mutex::new(Some(host_to_guest_rx)),
            open,
            drop_unreliable: Arc::new(AtomicBool::new(false)),
            closed_sink: Arc::new(Mutex::new(None)),
        };

        if self.accept_tx.send(Box::new(host_side)).is_err() {
            warn!("local hub listener is gone; guest link will never connect");
        }
        guest_side
    }
}

/// One end of an in-memory link.
pub struct LocalEndpoint {
    peer_id: PeerId,
    out_tx: Sender<Vec<u8>>,
    in_rx: Mutex<Option<Receiver<Vec<u8>>>>,
    open: Arc<AtomicBool>,
    drop_unreliable: Arc<AtomicBool>,
    closed_sink: Arc<Mutex<Option<ClosedSink>>>,
}

impl LocalEndpoint {
    /// Simulates an unreliable path: outgoing non-reliable sends vanish.
    pub fn set_drop_unreliable(&self, drop: bool) {
        self.drop_unreliable.store(drop, Ordering::Relaxed);
    }
}

impl Connection for LocalEndpoint {
    fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn address(&self) -> String {
        format!("local:{}", self.peer_id)
    }

    fn send(&self, bytes: &[u8], reliable: bool, _background: bool) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed {
                peer: self.peer_id,
            });
        }
        if !reliable && self.drop_unreliable.load(Ordering::Relaxed) {
            // best-effort path: silently dropped
            return Ok(());
        }
        self.out_tx
            .send(bytes.to_vec())
            .map_err(|_| TransportError::SendFailed {
                peer: self.peer_id,
            })
    }

    fn set_data_sink(&mut self, sink: DataSink) {
        let Some(rx) = self.in_rx.lock().expect("local endpoint poisoned").take() else {
            warn!("data sink installed twice on local endpoint {}", self.peer_id);
            return;
        };
        let peer = self.peer_id;
        let open = self.open.clone();
        let closed_sink = self.closed_sink.clone();
        thread::spawn(move || {
            loop {
                if !open.load(Ordering::Relaxed) {
                    notify_closed(&closed_sink, peer, "closed");
                    return;
                }
                match rx.recv_timeout(PUMP_POLL) {
                    Ok(bytes) => sink(peer, bytes),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => {
                        open.store(false, Ordering::Relaxed);
                        notify_closed(&closed_sink, peer, "remote endpoint dropped");
                        return;
                    }
                }
            }
        });
    }

    fn set_closed_sink(&mut self, sink: ClosedSink) {
        *self.closed_sink.lock().expect("local endpoint poisoned") = Some(sink);
    }

    fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}

fn notify_closed(sink: &Arc<Mutex<Option<ClosedSink>>>, peer: PeerId, reason: &str) {
    if let Some(sink) = sink.lock().expect("local endpoint poisoned").as_ref() {
        sink(peer, reason.to_string());
    }
}

/// Accept surface for [`LocalHub`].
pub struct LocalListener {
    accept_rx: Option<Receiver<Box<dyn Connection>>>,
    open: Arc<AtomicBool>,
}

impl Listener for LocalListener {
    fn set_accept_sink(&mut self, mut sink: AcceptSink) {
        let Some(rx) = self.accept_rx.take() else {
            warn!("accept sink installed twice on local listener");
            return;
        };
        let open = self.open.clone();
        thread::spawn(move || loop {
            if !open.load(Ordering::Relaxed) {
                return;
            }
            match rx.recv_timeout(PUMP_POLL) {
                Ok(connection) => sink(connection),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        });
    }

    fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
    }
}
