//! Connectivity machine against a scripted modem.

use std::path::PathBuf;
use std::time::Duration;

use kiosk_gateway::config::CellularConfig;
use kiosk_gateway::fsm::Machine;
use kiosk_gateway::fsm::cellular::{CellEvent, CellState, CellularContext, build_cellular_machine, event_for};

use crate::mock_hw::{MockModem, ModemCall, VirtualClock};

fn rig(modem: &MockModem) -> (CellularContext, std::sync::Arc<VirtualClock>) {
    let clock = VirtualClock::new(Duration::from_secs(86_400));
    let ctx = CellularContext::new(CellularConfig::default(), Box::new(modem.clone()), clock.clone());
    (ctx, clock)
}

fn step(m: &Machine<CellState, CellEvent, CellularContext>, ctx: &mut CellularContext) -> CellState {
    m.call(event_for(m.current_state()), ctx)
}

#[test]
fn healthy_link_rests_then_rejudges() {
    let modem = MockModem::default();
    modem.probes(&[true]);
    let (mut ctx, clock) = rig(&modem);
    let m = build_cellular_machine();

    assert_eq!(step(&m, &mut ctx), CellState::Networked);
    assert_eq!(step(&m, &mut ctx), CellState::Judge);
    assert_eq!(clock.elapsed(), Duration::from_secs(90));
    assert_eq!(modem.calls(), vec![ModemCall::Probe(Duration::from_secs(10))]);
}

#[test]
fn no_dialer_dials_before_judging_again() {
    let modem = MockModem::default();
    let (mut ctx, clock) = rig(&modem);
    let m = build_cellular_machine();

    assert_eq!(step(&m, &mut ctx), CellState::NotNetworked);
    assert_eq!(step(&m, &mut ctx), CellState::NoProcess);
    assert_eq!(step(&m, &mut ctx), CellState::Judge);
    assert_eq!(clock.elapsed(), Duration::from_secs(90));
    step(&m, &mut ctx);

    assert_eq!(
        modem.calls(),
        vec![
            ModemCall::Probe(Duration::from_secs(10)),
            ModemCall::FindDialer("pppd".into()),
            ModemCall::Dial(PathBuf::from("./ppp-on.sh")),
            ModemCall::Probe(Duration::from_secs(10)),
        ]
    );
}

#[test]
fn failed_dial_still_returns_to_judge() {
    let modem = MockModem::default();
    modem.0.lock().dial_fails = true;
    let (mut ctx, _clock) = rig(&modem);
    let m = build_cellular_machine();

    step(&m, &mut ctx);
    step(&m, &mut ctx);
    assert_eq!(step(&m, &mut ctx), CellState::Judge);
}

#[test]
fn running_dialer_gets_a_long_probe_before_being_killed() {
    let modem = MockModem::default();
    modem.0.lock().dialers = vec![41, 42];
    let (mut ctx, _clock) = rig(&modem);
    let m = build_cellular_machine();

    assert_eq!(step(&m, &mut ctx), CellState::NotNetworked);
    assert_eq!(step(&m, &mut ctx), CellState::ExistProcess);
    assert_eq!(step(&m, &mut ctx), CellState::NoProcess);

    let calls = modem.calls();
    assert_eq!(calls[2], ModemCall::Probe(Duration::from_secs(120)));
    assert!(calls.contains(&ModemCall::Kill(41)));
    assert!(calls.contains(&ModemCall::Kill(42)));
}

#[test]
fn kill_failure_still_moves_to_dialing() {
    let modem = MockModem::default();
    {
        let mut s = modem.0.lock();
        s.dialers = vec![7];
        s.kill_fails = true;
    }
    let (mut ctx, _clock) = rig(&modem);
    let m = build_cellular_machine();

    step(&m, &mut ctx);
    step(&m, &mut ctx);
    assert_eq!(step(&m, &mut ctx), CellState::NoProcess);
    assert_eq!(step(&m, &mut ctx), CellState::Judge);
    assert!(modem.calls().contains(&ModemCall::Dial(PathBuf::from("./ppp-on.sh"))));
}

#[test]
fn dialer_that_recovers_is_left_alone() {
    let modem = MockModem::default();
    modem.0.lock().dialers = vec![7];
    modem.probes(&[false, true]);
    let (mut ctx, _clock) = rig(&modem);
    let m = build_cellular_machine();

    step(&m, &mut ctx);
    step(&m, &mut ctx);
    assert_eq!(step(&m, &mut ctx), CellState::Networked);
    assert!(!modem.calls().iter().any(|c| matches!(c, ModemCall::Kill(_))));
}

#[test]
fn unreadable_process_table_falls_back_to_dialing() {
    let modem = MockModem::default();
    modem.0.lock().process_table_broken = true;
    let (mut ctx, _clock) = rig(&modem);
    let m = build_cellular_machine();

    step(&m, &mut ctx);
    assert_eq!(step(&m, &mut ctx), CellState::NoProcess);
}

#[test]
fn run_loop_self_heals_until_the_clock_stops() {
    let modem = MockModem::default();
    let clock = VirtualClock::new(Duration::from_secs(1000));
    let mut ctx = CellularContext::new(CellularConfig::default(), Box::new(modem.clone()), clock.clone());
    let m = build_cellular_machine();

    kiosk_gateway::fsm::cellular::run(&m, &mut ctx);

    let dials = modem
        .calls()
        .iter()
        .filter(|c| matches!(c, ModemCall::Dial(_)))
        .count();
    // 90 s settle per dial within a 1000 s budget.
    assert_eq!(dials, 12);
}
