use std::sync::{
    atomic::Ordering,
    mpsc::{Receiver, RecvTimeoutError},
    Arc,
};
use std::time::Duration;

use log::{trace, warn};

use crate::pipeline::{OutboundMessage, PeerTable, PipelineShared};

const IDLE_POLL: Duration = Duration::from_millis(250);

/// The encode worker: serializes each outgoing message once and hands the
/// bytes to every target connection. Send failures are logged; the peer's
/// removal is driven by the transport's close callback, not from here.
pub(crate) fn run_encode_thread(
    outbound_rx: Receiver<OutboundMessage>,
    peers: PeerTable,
    shared: Arc<PipelineShared>,
) {
    while shared.running.load(Ordering::Relaxed) {
        let outbound = match outbound_rx.recv_timeout(IDLE_POLL) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if outbound.targets.is_empty() {
            continue;
        }
        let label = outbound.message.kind_label();
        let bytes = outbound.message.encode();
        let table = peers.lock().expect("peer table poisoned");
        for target in &outbound.targets {
            let Some(peer) = table.get(target) else {
                trace!("skipping send to departed peer {target}");
                continue;
            };
            match peer
                .conn
                .send(&bytes, outbound.reliable, outbound.background)
            {
                Ok(()) => shared.stats.sent.bump(label),
                Err(error) => warn!("send of {label} to peer {target} failed: {error}"),
            }
        }
    }
    trace!("encode thread stopped");
}
