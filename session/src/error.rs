use thiserror::Error;

use weft_shared::{ControllerError, ElementError};

use crate::transport::{PeerId, TransportError};

/// Errors surfaced by the session facade.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The join handshake did not complete within the configured timeout.
    #[error("Join did not complete within {seconds} second(s); last state: {status}")]
    JoinTimeout { seconds: u64, status: String },

    /// The authority refused the join.
    #[error("Join rejected: {reason}")]
    JoinRejected { reason: String },

    /// The world reached the failed state (host lost, server closed).
    #[error("World failed: {reason}")]
    WorldFailed { reason: String },

    /// The session is already disposed.
    #[error("Session is disposed")]
    Disposed,

    /// The data-model lock was poisoned by a panicking thread.
    #[error("Data-model lock poisoned")]
    Poisoned,

    /// No connection is registered for the peer.
    #[error("Unknown peer {peer}")]
    UnknownPeer { peer: PeerId },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Element(#[from] ElementError),

    #[error(transparent)]
    Controller(#[from] ControllerError),
}
