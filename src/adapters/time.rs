//! System clock adapter.
//!
//! Monotonic time from `Instant`, wall time from the system clock, and
//! pauses that end early when the gateway is stopping.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::app::ports::Clock;
use crate::shutdown::Shutdown;

pub struct SystemClock {
    start: Instant,
    shutdown: Shutdown,
}

impl SystemClock {
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            start: Instant::now(),
            shutdown,
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn pause(&self, period: Duration) -> bool {
        self.shutdown.wait(period)
    }

    fn is_running(&self) -> bool {
        !self.shutdown.is_triggered()
    }
}
