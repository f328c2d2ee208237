use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A one-shot, auto-resetting latch.
///
/// `set` releases exactly one waiter (or the next one to arrive); waiting
/// consumes the signal. The sync thread parks on this between releasing the
/// data-model lock and re-acquiring it, and the main thread sets it when a
/// world update finishes.
#[derive(Default)]
pub struct AutoResetEvent {
    state: Mutex<bool>,
    condvar: Condvar,
}

impl AutoResetEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut signaled = self.state.lock().expect("auto-reset event poisoned");
        *signaled = true;
        self.condvar.notify_one();
    }

    /// Waits for the signal, consuming it. Returns false on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signaled = self.state.lock().expect("auto-reset event poisoned");
        if !*signaled {
            let (guard, result) = self
                .condvar
                .wait_timeout_while(signaled, timeout, |signaled| !*signaled)
                .expect("auto-reset event poisoned");
            signaled = guard;
            if result.timed_out() && !*signaled {
                return false;
            }
        }
        *signaled = false;
        true
    }
}
