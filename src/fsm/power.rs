//! QR-gated power sequencing.
//!
//! ```text
//!            scan accepted              sense on
//!  EnterQr ───────────────▶ QrAccepted ─────────▶ PoweredOn ──▶ Closing
//!     ▲                         │ window elapsed      ▲            │ sense off
//!     │                         ▼                     │ sense on   ▼
//!     ├──────────────── OvertimeClose                 └──── ClosingTimed
//!     │                                                            │
//!     └─────────────── unpowered for min_closed ◀──────────────────┘
//! ```
//!
//! Every transition that matters to the back office enqueues a status
//! record (`1` authorised, `2` powered on, `3` powered off, `0` forced
//! shutdown).  Polling handlers loop internally and only return early when
//! the clock reports shutdown.

use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use super::{Label, Machine};
use crate::app::ports::{Clock, PowerRailPort, TelemetrySink};
use crate::config::PowerConfig;
use crate::qr::{QrGate, ScanLine};
use crate::telemetry::{BootStatus, BootUp, Topic};

// ---------------------------------------------------------------------------
// States and events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    /// Waiting for a QR scan.
    EnterQr,
    /// Rail energised, waiting for the sense line to confirm.
    QrAccepted,
    /// Power confirmed.
    PoweredOn,
    /// Device running; waiting for it to switch off.
    Closing,
    /// Confirmation never came within the power-on window.
    OvertimeClose,
    /// Device off; grace window before the rail is parked.
    ClosingTimed,
}

impl Label for PowerState {
    const ALL: &'static [Self] = &[
        Self::EnterQr,
        Self::QrAccepted,
        Self::PoweredOn,
        Self::Closing,
        Self::OvertimeClose,
        Self::ClosingTimed,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Self::EnterQr => "EnterQR",
            Self::QrAccepted => "QRAccepted",
            Self::PoweredOn => "PoweredOn",
            Self::Closing => "Closing",
            Self::OvertimeClose => "OvertimeClose",
            Self::ClosingTimed => "ClosingTimed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    Scan,
    AwaitPower,
    ReportOn,
    AwaitOff,
    ForceOff,
    Park,
}

impl Label for PowerEvent {
    const ALL: &'static [Self] = &[
        Self::Scan,
        Self::AwaitPower,
        Self::ReportOn,
        Self::AwaitOff,
        Self::ForceOff,
        Self::Park,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Self::Scan => "Scan",
            Self::AwaitPower => "AwaitPower",
            Self::ReportOn => "ReportOn",
            Self::AwaitOff => "AwaitOff",
            Self::ForceOff => "ForceOff",
            Self::Park => "Park",
        }
    }
}

/// The one event that applies in each state.
pub fn event_for(state: PowerState) -> PowerEvent {
    match state {
        PowerState::EnterQr => PowerEvent::Scan,
        PowerState::QrAccepted => PowerEvent::AwaitPower,
        PowerState::PoweredOn => PowerEvent::ReportOn,
        PowerState::Closing => PowerEvent::AwaitOff,
        PowerState::OvertimeClose => PowerEvent::ForceOff,
        PowerState::ClosingTimed => PowerEvent::Park,
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything the power handlers touch.
pub struct PowerContext {
    pub scanner: Box<dyn Read + Send>,
    pub rail: Box<dyn PowerRailPort>,
    pub sink: Arc<dyn TelemetrySink>,
    pub clock: Arc<dyn Clock>,
    pub gate: QrGate,
    /// Partial scan line carried between reads.
    pub line: ScanLine,
    /// Account of the session in progress; stamped on every status record.
    pub account: String,
    /// Monotonic time the current timed state was entered.
    pub since: Duration,
    sense_poll: Duration,
    close_poll: Duration,
    power_on_timeout: Duration,
    min_closed: Duration,
}

impl PowerContext {
    pub fn new(
        config: &PowerConfig,
        scanner: Box<dyn Read + Send>,
        rail: Box<dyn PowerRailPort>,
        sink: Arc<dyn TelemetrySink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scanner,
            rail,
            sink,
            clock,
            gate: QrGate::new(config.role_id.clone(), config.qr_expiration()),
            line: ScanLine::new(),
            account: String::new(),
            since: Duration::ZERO,
            sense_poll: config.sense_poll(),
            close_poll: config.close_poll(),
            power_on_timeout: config.power_on_timeout(),
            min_closed: config.min_closed(),
        }
    }

    fn report(&self, status: BootStatus) {
        let record = BootUp {
            time: self.clock.utc(),
            account: self.account.clone(),
            status,
        };
        let stored = serde_json::to_string(&record)
            .map_err(crate::error::Error::from)
            .and_then(|json| self.sink.append(Topic::Status, &json));
        match stored {
            Ok(id) => info!(target: "power", "status {} queued as #{id}", status as u8),
            Err(e) => error!(target: "power", "status {} lost: {e}", status as u8),
        }
    }

    fn sense(&mut self) -> Option<bool> {
        match self.rail.is_powered() {
            Ok(on) => Some(on),
            Err(e) => {
                warn!(target: "power", "power-sense read failed: {e}");
                None
            }
        }
    }

    fn elapsed(&self) -> Duration {
        self.clock.now().saturating_sub(self.since)
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn scan(ctx: &mut PowerContext) -> PowerState {
    let mut byte = [0u8; 1];
    while ctx.clock.is_running() {
        match ctx.scanner.read(&mut byte) {
            Ok(1) => {}
            Ok(_) => {
                if !ctx.clock.pause(ctx.sense_poll) {
                    break;
                }
                continue;
            }
            Err(e) if is_idle(&e) => continue,
            Err(e) => {
                warn!(target: "scanner", "read failed: {e}");
                if !ctx.clock.pause(ctx.close_poll) {
                    break;
                }
                continue;
            }
        }

        let Some(line) = ctx.line.feed(byte[0]) else {
            continue;
        };
        let line = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => line,
            Err(rejected) => {
                info!(target: "power", "scan discarded: {rejected}");
                continue;
            }
        };

        let payload = match ctx.gate.evaluate(&line, ctx.clock.utc()) {
            Ok(payload) => payload,
            Err(rejected) => {
                info!(target: "power", "scan rejected: {rejected}");
                continue;
            }
        };

        if let Err(e) = ctx.rail.set_power(true) {
            error!(target: "power", "could not energise rail for {}: {e}", payload.account);
            continue;
        }
        info!(target: "power", "scan accepted for {}", payload.account);
        ctx.gate.accept(&payload);
        ctx.account = payload.account;
        ctx.since = ctx.clock.now();
        ctx.report(BootStatus::Authorized);
        return PowerState::QrAccepted;
    }
    PowerState::EnterQr
}

fn await_power(ctx: &mut PowerContext) -> PowerState {
    while ctx.clock.is_running() {
        if ctx.sense() == Some(true) {
            return PowerState::PoweredOn;
        }
        if ctx.elapsed() > ctx.power_on_timeout {
            warn!(
                target: "power",
                "no power confirmation within {}s",
                ctx.power_on_timeout.as_secs()
            );
            return PowerState::OvertimeClose;
        }
        if !ctx.clock.pause(ctx.sense_poll) {
            break;
        }
    }
    PowerState::QrAccepted
}

fn report_on(ctx: &mut PowerContext) -> PowerState {
    ctx.report(BootStatus::PoweredOn);
    PowerState::Closing
}

fn await_off(ctx: &mut PowerContext) -> PowerState {
    while ctx.clock.is_running() {
        if ctx.sense() == Some(false) {
            ctx.report(BootStatus::PoweredOff);
            ctx.since = ctx.clock.now();
            return PowerState::ClosingTimed;
        }
        if !ctx.clock.pause(ctx.close_poll) {
            break;
        }
    }
    PowerState::Closing
}

fn force_off(ctx: &mut PowerContext) -> PowerState {
    ctx.report(BootStatus::TimeoutShutdown);
    if let Err(e) = ctx.rail.set_power(false) {
        error!(target: "power", "could not release rail: {e}");
    }
    ctx.line.clear();
    PowerState::EnterQr
}

fn park(ctx: &mut PowerContext) -> PowerState {
    while ctx.clock.is_running() {
        match ctx.sense() {
            Some(true) => {
                info!(target: "power", "device powered again during grace window");
                return PowerState::PoweredOn;
            }
            Some(false) if ctx.elapsed() >= ctx.min_closed => {
                if let Err(e) = ctx.rail.set_power(false) {
                    error!(target: "power", "could not release rail: {e}");
                }
                debug!(target: "power", "rail parked after {}s off", ctx.elapsed().as_secs());
                ctx.line.clear();
                return PowerState::EnterQr;
            }
            _ => {}
        }
        if !ctx.clock.pause(ctx.close_poll) {
            break;
        }
    }
    PowerState::ClosingTimed
}

/// Serial read timeouts are the normal idle condition, not faults.
fn is_idle(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Build the power machine with its full transition table, starting in
/// `EnterQr`.
pub fn build_power_machine() -> Machine<PowerState, PowerEvent, PowerContext> {
    let mut m = Machine::new("power", PowerState::EnterQr);
    m.add_handler(PowerState::EnterQr, PowerEvent::Scan, scan);
    m.add_handler(PowerState::QrAccepted, PowerEvent::AwaitPower, await_power);
    m.add_handler(PowerState::PoweredOn, PowerEvent::ReportOn, report_on);
    m.add_handler(PowerState::Closing, PowerEvent::AwaitOff, await_off);
    m.add_handler(PowerState::OvertimeClose, PowerEvent::ForceOff, force_off);
    m.add_handler(PowerState::ClosingTimed, PowerEvent::Park, park);
    m
}

/// Drive the power machine until the clock reports shutdown.
pub fn run(machine: &Machine<PowerState, PowerEvent, PowerContext>, ctx: &mut PowerContext) {
    machine.run(ctx, event_for, |c| c.clock.is_running());
}
