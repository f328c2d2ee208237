use std::sync::{
    atomic::Ordering,
    mpsc::{Receiver, RecvTimeoutError, Sender},
    Arc,
};
use std::time::Duration;

use log::{trace, warn};

use weft_shared::SyncMessage;

use crate::{
    pipeline::{InboundMessage, PipelineShared},
    transport::PeerId,
};

const IDLE_POLL: Duration = Duration::from_millis(250);

/// The decode worker: drains raw transport bytes, parses the type byte and
/// body, and hands typed messages to the sync thread in arrival order.
/// Decode failures are logged and dropped; they never stop the pipeline.
pub(crate) fn run_decode_thread(
    raw_rx: Receiver<(PeerId, Vec<u8>)>,
    process_tx: Sender<InboundMessage>,
    shared: Arc<PipelineShared>,
) {
    while shared.running.load(Ordering::Relaxed) {
        let (from, bytes) = match raw_rx.recv_timeout(IDLE_POLL) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        match SyncMessage::decode(&bytes) {
            Ok(message) => {
                shared.stats.received.bump(message.kind_label());
                trace!(
                    "decoded {} message ({} bytes) from peer {from}",
                    message.kind_label(),
                    bytes.len()
                );
                if process_tx.send(InboundMessage { from, message }).is_err() {
                    break;
                }
            }
            Err(error) => {
                warn!(
                    "dropping undecodable message ({} bytes) from peer {from}: {error}",
                    bytes.len()
                );
            }
        }
    }
    trace!("decode thread stopped");
}
