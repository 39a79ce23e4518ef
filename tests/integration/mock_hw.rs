//! Mock adapters for integration tests.
//!
//! Each mock records what the machine did to it so tests can assert on the
//! full command history without touching sysfs, serial ports, sockets or a
//! broker.  [`VirtualClock`] advances virtual time on every pause and
//! reports shutdown once its budget is spent, so polling handlers always
//! terminate.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use kiosk_gateway::app::ports::{Broker, Clock, ModemPort, PowerRailPort};
use kiosk_gateway::error::{BrokerError, GpioError};

// ── VirtualClock ──────────────────────────────────────────────

pub struct VirtualClock {
    now: Mutex<Duration>,
    budget: Duration,
}

#[allow(dead_code)]
impl VirtualClock {
    /// A clock that stops once `budget` of virtual time has passed.
    pub fn new(budget: Duration) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Duration::ZERO),
            budget,
        })
    }

    pub fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    pub fn elapsed(&self) -> Duration {
        *self.now.lock()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }

    fn utc(&self) -> DateTime<Utc> {
        Self::epoch() + chrono::Duration::from_std(*self.now.lock()).unwrap()
    }

    fn pause(&self, period: Duration) -> bool {
        let mut now = self.now.lock();
        *now += period;
        *now <= self.budget
    }

    fn is_running(&self) -> bool {
        *self.now.lock() <= self.budget
    }
}

// ── MockRail ──────────────────────────────────────────────────

#[derive(Default)]
pub struct RailState {
    /// Every level written to the control line, in order.
    pub control: Vec<bool>,
    /// Scripted sense readings; `sense_default` once exhausted.
    pub sense: VecDeque<bool>,
    pub sense_default: bool,
    pub sense_reads: usize,
}

#[derive(Clone, Default)]
pub struct MockRail(pub Arc<Mutex<RailState>>);

#[allow(dead_code)]
impl MockRail {
    pub fn with_sense(script: &[bool], then: bool) -> Self {
        let rail = Self::default();
        {
            let mut s = rail.0.lock();
            s.sense = script.iter().copied().collect();
            s.sense_default = then;
        }
        rail
    }

    pub fn script(&self, script: &[bool], then: bool) {
        let mut s = self.0.lock();
        s.sense = script.iter().copied().collect();
        s.sense_default = then;
    }

    pub fn control_high(&self) -> bool {
        self.0.lock().control.last().copied().unwrap_or(false)
    }

    pub fn control_history(&self) -> Vec<bool> {
        self.0.lock().control.clone()
    }
}

impl PowerRailPort for MockRail {
    fn set_power(&mut self, on: bool) -> Result<(), GpioError> {
        self.0.lock().control.push(on);
        Ok(())
    }

    fn is_powered(&mut self) -> Result<bool, GpioError> {
        let mut s = self.0.lock();
        s.sense_reads += 1;
        let default = s.sense_default;
        Ok(s.sense.pop_front().unwrap_or(default))
    }
}

// ── MockModem ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemCall {
    Probe(Duration),
    FindDialer(String),
    Kill(u32),
    Dial(PathBuf),
}

#[derive(Default)]
pub struct ModemState {
    pub calls: Vec<ModemCall>,
    /// Scripted probe outcomes; failure once exhausted.
    pub probes: VecDeque<bool>,
    pub dialers: Vec<u32>,
    pub process_table_broken: bool,
    pub kill_fails: bool,
    pub dial_fails: bool,
}

#[derive(Clone, Default)]
pub struct MockModem(pub Arc<Mutex<ModemState>>);

#[allow(dead_code)]
impl MockModem {
    pub fn calls(&self) -> Vec<ModemCall> {
        self.0.lock().calls.clone()
    }

    pub fn probes(&self, outcomes: &[bool]) {
        self.0.lock().probes = outcomes.iter().copied().collect();
    }
}

impl ModemPort for MockModem {
    fn probe(&mut self, _targets: &[String], timeout: Duration) -> io::Result<()> {
        let mut s = self.0.lock();
        s.calls.push(ModemCall::Probe(timeout));
        if s.probes.pop_front().unwrap_or(false) {
            Ok(())
        } else {
            Err(io::ErrorKind::TimedOut.into())
        }
    }

    fn find_dialer(&mut self, name: &str) -> io::Result<Vec<u32>> {
        let mut s = self.0.lock();
        s.calls.push(ModemCall::FindDialer(name.to_string()));
        if s.process_table_broken {
            return Err(io::ErrorKind::PermissionDenied.into());
        }
        Ok(s.dialers.clone())
    }

    fn kill(&mut self, pid: u32) -> io::Result<()> {
        let mut s = self.0.lock();
        s.calls.push(ModemCall::Kill(pid));
        if s.kill_fails {
            Err(io::ErrorKind::PermissionDenied.into())
        } else {
            s.dialers.retain(|p| *p != pid);
            Ok(())
        }
    }

    fn dial(&mut self, script: &Path) -> io::Result<()> {
        let mut s = self.0.lock();
        s.calls.push(ModemCall::Dial(script.to_path_buf()));
        if s.dial_fails {
            Err(io::ErrorKind::NotFound.into())
        } else {
            Ok(())
        }
    }
}

// ── MockBroker ────────────────────────────────────────────────

#[derive(Default)]
pub struct MockBroker {
    pub published: Mutex<Vec<(String, String)>>,
    pub refuse: Mutex<Option<fn() -> BrokerError>>,
    /// Publishes handed off but not yet completed.
    pub outstanding: Mutex<usize>,
    pub withhold_acks: Mutex<bool>,
}

#[allow(dead_code)]
impl MockBroker {
    pub fn refuse_with(&self, error: fn() -> BrokerError) {
        *self.refuse.lock() = Some(error);
    }

    pub fn accept(&self) {
        *self.refuse.lock() = None;
    }

    /// Stop (`true`) or resume (`false`) completing publishes.
    pub fn withhold_acks(&self, withhold: bool) {
        *self.withhold_acks.lock() = withhold;
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }
}

impl Broker for MockBroker {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if let Some(error) = *self.refuse.lock() {
            return Err(error());
        }
        self.published.lock().push((
            topic.to_string(),
            String::from_utf8_lossy(payload).into_owned(),
        ));
        *self.outstanding.lock() += 1;
        Ok(())
    }

    fn confirm(&self, _timeout: Duration) -> Result<(), BrokerError> {
        let mut outstanding = self.outstanding.lock();
        if *self.withhold_acks.lock() || *outstanding == 0 {
            return Err(BrokerError::Unconfirmed);
        }
        *outstanding -= 1;
        Ok(())
    }
}
