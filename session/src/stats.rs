use std::sync::atomic::{AtomicU64, Ordering};

/// Message counters for one direction, bumped by the pipeline threads.
#[derive(Debug, Default)]
pub struct KindCounters {
    delta: AtomicU64,
    full: AtomicU64,
    confirmation: AtomicU64,
    control: AtomicU64,
    stream: AtomicU64,
    ping: AtomicU64,
    disconnect: AtomicU64,
}

impl KindCounters {
    pub fn bump(&self, label: &str) {
        let counter = match label {
            "delta" => &self.delta,
            "full" => &self.full,
            "confirmation" => &self.confirmation,
            "control" => &self.control,
            "stream" => &self.stream,
            "ping" => &self.ping,
            _ => &self.disconnect,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> KindSnapshot {
        KindSnapshot {
            delta: self.delta.load(Ordering::Relaxed),
            full: self.full.load(Ordering::Relaxed),
            confirmation: self.confirmation.load(Ordering::Relaxed),
            control: self.control.load(Ordering::Relaxed),
            stream: self.stream.load(Ordering::Relaxed),
            ping: self.ping.load(Ordering::Relaxed),
            disconnect: self.disconnect.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of one direction's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindSnapshot {
    pub delta: u64,
    pub full: u64,
    pub confirmation: u64,
    pub control: u64,
    pub stream: u64,
    pub ping: u64,
    pub disconnect: u64,
}

/// Sent/received counters surfaced by [`crate::Session::statistics`].
#[derive(Debug, Default)]
pub struct Stats {
    pub sent: KindCounters,
    pub received: KindCounters,
}

/// The snapshot pair handed to callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub sent: KindSnapshot,
    pub received: KindSnapshot,
}

impl Stats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.sent.snapshot(),
            received: self.received.snapshot(),
        }
    }
}
