use std::time::Duration;

/// Tunables for a weft session. `Default` gives the production values; tests
/// override fields as needed.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sync thread cycle rate.
    pub sync_rate_hz: u32,
    pub max_users: u16,
    pub user_name: String,
    /// Stable per-installation identifier; generated when absent.
    pub machine_id: Option<String>,
    pub head_device: u32,
    /// Parked records older than this many ticks are dropped.
    pub pending_max_age_ticks: u64,
    /// Parked records are retried at most this many times.
    pub pending_max_attempts: u32,
    /// Hard cap across all parked records; the newest is dropped beyond it.
    pub pending_queue_cap: usize,
    /// Cap on deltas deferred while the world is not yet running.
    pub deferred_delta_cap: usize,
    /// Streams older than this many seconds behind the newest seen for the
    /// same (user, group) are discarded on receipt.
    pub stream_max_age: f64,
    pub join_timeout: Duration,
    /// Upper bound on worker wake-up latency during disposal.
    pub thread_join_timeout: Duration,
    pub ping_interval_ticks: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sync_rate_hz: 20,
            max_users: 16,
            user_name: String::from("user"),
            machine_id: None,
            head_device: 0,
            pending_max_age_ticks: 400,
            pending_max_attempts: 20,
            pending_queue_cap: 1024,
            deferred_delta_cap: 256,
            stream_max_age: 1.0,
            join_timeout: Duration::from_secs(10),
            thread_join_timeout: Duration::from_secs(1),
            ping_interval_ticks: 20,
        }
    }
}

impl SessionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.sync_rate_hz.max(1)))
    }

    /// The machine id to announce: the configured one, or a random stable
    /// token for this session.
    pub fn resolve_machine_id(&self) -> String {
        self.machine_id
            .clone()
            .unwrap_or_else(|| format!("machine-{:016x}", fastrand::u64(..)))
    }
}
