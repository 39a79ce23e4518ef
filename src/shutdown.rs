//! Process-wide stop signal.
//!
//! Every loop in the gateway sleeps through [`Shutdown::wait`] instead of
//! `thread::sleep`, so a SIGTERM wakes all of them at their next poll point.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Cloneable handle; all clones observe the same flag.
#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every waiter.
    pub fn trigger(&self) {
        let mut stopped = self.inner.stopped.lock();
        if !*stopped {
            *stopped = true;
            log::info!(target: "gateway", "shutdown requested");
        }
        self.inner.cond.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.stopped.lock()
    }

    /// Sleep for `period` unless shutdown is requested first.
    ///
    /// Returns `true` if the full period elapsed and the caller should keep
    /// going, `false` if shutdown was requested.
    /// A period too long to fit an `Instant` waits for shutdown alone.
    pub fn wait(&self, period: Duration) -> bool {
        let deadline = Instant::now().checked_add(period);
        let mut stopped = self.inner.stopped.lock();
        while !*stopped {
            let Some(deadline) = deadline else {
                self.inner.cond.wait(&mut stopped);
                continue;
            };
            if self
                .inner
                .cond
                .wait_until(&mut stopped, deadline)
                .timed_out()
            {
                return !*stopped;
            }
        }
        false
    }
}
