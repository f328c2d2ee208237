use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicU64},
    Arc, Mutex,
};

use weft_shared::{RefId, SyncMessage};

use crate::{stats::Stats, transport::{Connection, PeerId}};

mod decode;
mod encode;
mod signal;
mod sync;

pub(crate) use decode::run_decode_thread;
pub(crate) use encode::run_encode_thread;
pub use signal::AutoResetEvent;
pub(crate) use sync::{InboundStreams, OutgoingStream, StreamQueue, SyncWorker};

/// A decoded message plus the connection it arrived on.
pub(crate) struct InboundMessage {
    pub from: PeerId,
    pub message: SyncMessage,
}

/// A message addressed for the encode thread to serialize and fan out.
pub(crate) struct OutboundMessage {
    pub message: SyncMessage,
    pub targets: Vec<PeerId>,
    pub reliable: bool,
    pub background: bool,
}

impl OutboundMessage {
    pub fn reliable_to(message: SyncMessage, targets: Vec<PeerId>) -> Self {
        Self {
            message,
            targets,
            reliable: true,
            background: false,
        }
    }

    pub fn unreliable_to(message: SyncMessage, targets: Vec<PeerId>) -> Self {
        Self {
            message,
            targets,
            reliable: false,
            background: false,
        }
    }
}

/// Per-peer bookkeeping kept outside the data-model lock, guarded by its
/// own mutex per the shared-resource policy.
pub(crate) struct PeerState {
    pub conn: Box<dyn Connection>,
    pub user: Option<RefId>,
    pub user_byte: u8,
    /// True until the peer has been sent its full batch.
    pub initializing: bool,
    pub rtt_millis: Option<f64>,
}

pub(crate) type PeerTable = Arc<Mutex<HashMap<PeerId, PeerState>>>;

/// State shared by the session facade and all three worker threads.
pub(crate) struct PipelineShared {
    pub running: AtomicBool,
    /// Set by the main thread when a world update completes.
    pub refresh_finished: AutoResetEvent,
    pub stats: Stats,
    /// Records expected/applied during `InitializingDataModel`.
    pub init_expected: AtomicU64,
    pub init_applied: AtomicU64,
}

impl PipelineShared {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            refresh_finished: AutoResetEvent::new(),
            stats: Stats::default(),
            init_expected: AtomicU64::new(0),
            init_applied: AtomicU64::new(0),
        }
    }
}
