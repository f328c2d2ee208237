use thiserror::Error;

mod local;

pub use local::{LocalEndpoint, LocalHub, LocalListener};

/// Numeric identity of a remote peer on this transport.
pub type PeerId = u64;

/// Callback invoked by a connection for every received datagram.
pub type DataSink = Box<dyn Fn(PeerId, Vec<u8>) + Send + 'static>;

/// Callback invoked once when a connection closes, with a reason.
pub type ClosedSink = Box<dyn Fn(PeerId, String) + Send + 'static>;

/// Callback invoked by a listener for every accepted peer connection.
pub type AcceptSink = Box<dyn FnMut(Box<dyn Connection>) + Send + 'static>;

/// Errors raised by transport operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection to peer {peer} is closed")]
    ConnectionClosed { peer: PeerId },

    #[error("Send to peer {peer} failed")]
    SendFailed { peer: PeerId },
}

/// One bidirectional link to a remote peer.
///
/// The transport itself is out of scope for the sync core; this is the
/// contract it must satisfy. `reliable` selects the ordered/reliable path
/// used by batches; streams ride the unreliable path. `background` marks
/// bulk traffic the transport may deprioritize.
pub trait Connection: Send {
    fn peer_id(&self) -> PeerId;
    fn address(&self) -> String;
    fn send(&self, bytes: &[u8], reliable: bool, background: bool) -> Result<(), TransportError>;
    /// Installs the receive callback; data arriving before this is buffered.
    fn set_data_sink(&mut self, sink: DataSink);
    fn set_closed_sink(&mut self, sink: ClosedSink);
    fn close(&self);
    fn is_open(&self) -> bool;
}

/// The host-side accept surface.
pub trait Listener: Send {
    /// Installs the accept callback; connections arriving before this are
    /// buffered.
    fn set_accept_sink(&mut self, sink: AcceptSink);
    fn close(&self);
}
