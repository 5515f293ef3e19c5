//! Coordination signals shared by the session loops

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Manual-reset event: stays set until explicitly reset
#[derive(Debug, Default)]
pub struct Event {
    set: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the event and wake every waiter
    pub fn set(&self) {
        let mut set = self.set.lock();
        *set = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.set.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.set.lock()
    }

    /// Consume the event: returns whether it was set and clears it
    pub fn take(&self) -> bool {
        std::mem::replace(&mut *self.set.lock(), false)
    }

    /// Block until the event is set or `timeout` elapses.
    /// Returns whether the event is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut set = self.set.lock();
        while !*set {
            if self.cond.wait_until(&mut set, deadline).timed_out() {
                break;
            }
        }
        *set
    }
}

/// The three session-wide signals.
///
/// - `stop` is terminal: once set it is never reset.
/// - `reset` is raised on a stream parameter change and consumed by the
///   video ingest loop.
/// - `wake` rouses the control loop; repeated raises coalesce.
#[derive(Debug, Default)]
pub struct Signals {
    pub stop: Event,
    pub reset: Event,
    pub wake: Event,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_set()
    }

    /// Raise stop and wake the control loop so it observes it
    pub fn stop_all(&self) {
        self.stop.set();
        self.wake.set();
    }

    /// Stop-aware sleep. Returns early (with `false`) once stop is raised.
    pub fn sleep(&self, duration: Duration) -> bool {
        !self.stop.wait_timeout(duration)
    }
}
