use std::thread;
use std::time::{Duration, Instant};

use weft_session::{LocalHub, Session, SessionConfig};

/// How long end-to-end tests wait for convergence before failing.
pub const CONVERGE_TIMEOUT: Duration = Duration::from_secs(10);

/// A fast tick rate so tests converge quickly.
pub fn test_config(user_name: &str) -> SessionConfig {
    SessionConfig {
        sync_rate_hz: 50,
        user_name: user_name.to_string(),
        machine_id: Some(format!("test-{user_name}")),
        ..Default::default()
    }
}

/// A hosted world plus one connected guest, both running.
pub struct Pair {
    pub hub: LocalHub,
    pub host: Session,
    pub guest: Session,
}

/// Hosts a world and joins one guest, pumping both until the guest's world
/// runs.
pub fn start_pair() -> Pair {
    let mut hub = LocalHub::new();
    let listener = hub.listener();
    let host = Session::host(test_config("host"), Box::new(listener)).expect("host start failed");
    let guest_link = hub.connect();
    let guest =
        Session::join(test_config("guest"), Box::new(guest_link)).expect("guest start failed");

    let running = pump_until(&[&host, &guest], CONVERGE_TIMEOUT, || {
        guest.state() == weft_shared::WorldState::Running
    });
    assert!(
        running,
        "guest never reached running; status: {}",
        guest.initialization_status()
    );
    Pair { hub, host, guest }
}

/// Joins one more guest to an existing pair's hub.
pub fn join_extra_guest(pair: &mut Pair, name: &str) -> Session {
    let link = pair.hub.connect();
    let guest = Session::join(test_config(name), Box::new(link)).expect("guest start failed");
    let running = pump_until(&[&pair.host, &pair.guest, &guest], CONVERGE_TIMEOUT, || {
        guest.state() == weft_shared::WorldState::Running
    });
    assert!(running, "extra guest never reached running");
    guest
}

/// Drives world updates on every session until the predicate holds or the
/// timeout elapses. Returns whether the predicate held.
pub fn pump_until(
    sessions: &[&Session],
    timeout: Duration,
    mut predicate: impl FnMut() -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        for session in sessions {
            let _ = session.world_update(|_| ());
        }
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// Pumps every session for a fixed duration, letting a few ticks elapse.
pub fn pump_for(sessions: &[&Session], duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        for session in sessions {
            let _ = session.world_update(|_| ());
        }
        thread::sleep(Duration::from_millis(5));
    }
}
