//! Cellular link supervision.
//!
//! ```text
//!        ┌──────── probe ok ──────────┐
//!        ▼                            │
//!    Networked ──rest──▶ Judge ───────┘
//!        ▲                 │ probe failed
//!        │                 ▼
//!        │           NotNetworked ──no dialer──▶ NoProcess ──dial, settle──▶ Judge
//!        │                 │ dialer running          ▲
//!        │                 ▼                         │
//!        └─ probe ok ─ ExistProcess ── probe failed, kill dialer
//! ```
//!
//! Every handler is bounded by a probe timeout or a cancellable pause, so
//! the loop never blocks indefinitely.

use std::sync::Arc;

use log::{error, info, warn};

use super::{Label, Machine};
use crate::app::ports::{Clock, ModemPort};
use crate::config::CellularConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Judge,
    Networked,
    NotNetworked,
    ExistProcess,
    NoProcess,
}

impl Label for CellState {
    const ALL: &'static [Self] = &[
        Self::Judge,
        Self::Networked,
        Self::NotNetworked,
        Self::ExistProcess,
        Self::NoProcess,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Self::Judge => "Judge",
            Self::Networked => "Networked",
            Self::NotNetworked => "NotNetworked",
            Self::ExistProcess => "ExistProcess",
            Self::NoProcess => "NoProcess",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellEvent {
    Probe,
    Rest,
    CheckProcess,
    WaitOrKill,
    Dial,
}

impl Label for CellEvent {
    const ALL: &'static [Self] = &[
        Self::Probe,
        Self::Rest,
        Self::CheckProcess,
        Self::WaitOrKill,
        Self::Dial,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Self::Probe => "Probe",
            Self::Rest => "Rest",
            Self::CheckProcess => "CheckProcess",
            Self::WaitOrKill => "WaitOrKill",
            Self::Dial => "Dial",
        }
    }
}

pub fn event_for(state: CellState) -> CellEvent {
    match state {
        CellState::Judge => CellEvent::Probe,
        CellState::Networked => CellEvent::Rest,
        CellState::NotNetworked => CellEvent::CheckProcess,
        CellState::ExistProcess => CellEvent::WaitOrKill,
        CellState::NoProcess => CellEvent::Dial,
    }
}

pub struct CellularContext {
    pub modem: Box<dyn ModemPort>,
    pub clock: Arc<dyn Clock>,
    pub config: CellularConfig,
}

impl CellularContext {
    pub fn new(config: CellularConfig, modem: Box<dyn ModemPort>, clock: Arc<dyn Clock>) -> Self {
        Self {
            modem,
            clock,
            config,
        }
    }
}

fn judge(ctx: &mut CellularContext) -> CellState {
    match ctx.modem.probe(&ctx.config.probe_targets, ctx.config.probe_timeout()) {
        Ok(()) => {
            info!(target: "cellular", "link is up");
            CellState::Networked
        }
        Err(e) => {
            warn!(target: "cellular", "link is down: {e}");
            CellState::NotNetworked
        }
    }
}

fn rest(ctx: &mut CellularContext) -> CellState {
    ctx.clock.pause(ctx.config.steady_poll());
    CellState::Judge
}

fn check_process(ctx: &mut CellularContext) -> CellState {
    match ctx.modem.find_dialer(&ctx.config.dialer_process) {
        Ok(pids) if !pids.is_empty() => {
            info!(target: "cellular", "{} running (pid {pids:?})", ctx.config.dialer_process);
            CellState::ExistProcess
        }
        Ok(_) => {
            info!(target: "cellular", "no {} process", ctx.config.dialer_process);
            CellState::NoProcess
        }
        Err(e) => {
            error!(target: "cellular", "process table unreadable: {e}");
            CellState::NoProcess
        }
    }
}

fn wait_or_kill(ctx: &mut CellularContext) -> CellState {
    let Err(e) = ctx
        .modem
        .probe(&ctx.config.probe_targets, ctx.config.recovery_probe_timeout())
    else {
        info!(target: "cellular", "dialer brought the link up");
        return CellState::Networked;
    };

    warn!(target: "cellular", "dialer running but link still down: {e}");
    match ctx.modem.find_dialer(&ctx.config.dialer_process) {
        Ok(pids) => {
            for pid in pids {
                match ctx.modem.kill(pid) {
                    Ok(()) => info!(target: "cellular", "killed dialer pid {pid}"),
                    Err(e) => error!(target: "cellular", "kill of pid {pid} failed: {e}"),
                }
            }
        }
        Err(e) => error!(target: "cellular", "process table unreadable: {e}"),
    }
    CellState::NoProcess
}

fn dial(ctx: &mut CellularContext) -> CellState {
    match ctx.modem.dial(&ctx.config.dial_script) {
        Ok(()) => info!(target: "cellular", "started {}", ctx.config.dial_script.display()),
        Err(e) => error!(
            target: "cellular",
            "dial script {} failed: {e}",
            ctx.config.dial_script.display()
        ),
    }
    ctx.clock.pause(ctx.config.dial_settle());
    CellState::Judge
}

/// Build the connectivity machine, starting in `Judge`.
pub fn build_cellular_machine() -> Machine<CellState, CellEvent, CellularContext> {
    let mut m = Machine::new("cellular", CellState::Judge);
    m.add_handler(CellState::Judge, CellEvent::Probe, judge);
    m.add_handler(CellState::Networked, CellEvent::Rest, rest);
    m.add_handler(CellState::NotNetworked, CellEvent::CheckProcess, check_process);
    m.add_handler(CellState::ExistProcess, CellEvent::WaitOrKill, wait_or_kill);
    m.add_handler(CellState::NoProcess, CellEvent::Dial, dial);
    m
}

pub fn run(machine: &Machine<CellState, CellEvent, CellularContext>, ctx: &mut CellularContext) {
    machine.run(ctx, event_for, |c| c.clock.is_running());
}
