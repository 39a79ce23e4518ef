//! Power-sequencing machine against a scripted scanner, a mock rail and a
//! volatile queue.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use kiosk_gateway::config::PowerConfig;
use kiosk_gateway::fsm::power::{PowerContext, PowerState, build_power_machine, event_for};
use kiosk_gateway::queue::TelemetryQueue;
use kiosk_gateway::telemetry::Topic;

use crate::mock_hw::{MockRail, VirtualClock};

const ROLE: &str = "kiosk-a";

fn config() -> PowerConfig {
    PowerConfig {
        role_id: ROLE.into(),
        ..PowerConfig::default()
    }
}

/// One CR-terminated scan generated `age_secs` before the clock epoch.
fn scan(age_secs: i64, account: &str) -> String {
    let time = (VirtualClock::epoch().timestamp() - age_secs) * 1000;
    let json = format!(r#"{{"time":{time},"account":"{account}","role":"{ROLE}"}}"#);
    format!("{}\r\n", STANDARD.encode(json))
}

struct Rig {
    ctx: PowerContext,
    rail: MockRail,
    queue: TelemetryQueue,
    clock: Arc<VirtualClock>,
}

fn rig(scans: &str, rail: MockRail, budget: Duration) -> Rig {
    let queue = TelemetryQueue::volatile().unwrap();
    let clock = VirtualClock::new(budget);
    let ctx = PowerContext::new(
        &config(),
        Box::new(Cursor::new(scans.as_bytes().to_vec())),
        Box::new(rail.clone()),
        Arc::new(queue.clone()),
        clock.clone(),
    );
    Rig {
        ctx,
        rail,
        queue,
        clock,
    }
}

/// Drain the queue into `(status, account)` pairs.
fn statuses(queue: &TelemetryQueue) -> Vec<(u64, String)> {
    let mut out = Vec::new();
    while let Some(r) = queue.oldest().unwrap() {
        assert_eq!(r.topic, Topic::Status);
        let v: serde_json::Value = serde_json::from_str(&r.payload).unwrap();
        out.push((
            v["status"].as_u64().unwrap(),
            v["account"].as_str().unwrap().to_string(),
        ));
        queue.remove(r.id).unwrap();
    }
    out
}

#[test]
fn full_cycle_reports_authorised_on_and_off() {
    let mut r = rig(&scan(5, "u-1"), MockRail::with_sense(&[false, false, true], true), Duration::from_secs(86_400));
    let m = build_power_machine();

    assert_eq!(m.call(event_for(m.current_state()), &mut r.ctx), PowerState::QrAccepted);
    assert!(r.rail.control_high());

    assert_eq!(m.call(event_for(m.current_state()), &mut r.ctx), PowerState::PoweredOn);
    assert_eq!(m.call(event_for(m.current_state()), &mut r.ctx), PowerState::Closing);

    // Running for two polls, then off.
    r.rail.script(&[true, true], false);
    assert_eq!(m.call(event_for(m.current_state()), &mut r.ctx), PowerState::ClosingTimed);

    let before_park = r.clock.elapsed();
    assert_eq!(m.call(event_for(m.current_state()), &mut r.ctx), PowerState::EnterQr);
    assert!(r.clock.elapsed() - before_park >= Duration::from_secs(3600));
    assert!(!r.rail.control_high());

    assert_eq!(
        statuses(&r.queue),
        vec![(1, "u-1".into()), (2, "u-1".into()), (3, "u-1".into())]
    );
}

#[test]
fn missing_confirmation_forces_exactly_one_shutdown_record() {
    let mut r = rig(&scan(5, "u-1"), MockRail::with_sense(&[], false), Duration::from_secs(86_400));
    let m = build_power_machine();

    m.call(event_for(m.current_state()), &mut r.ctx);
    assert_eq!(m.call(event_for(m.current_state()), &mut r.ctx), PowerState::OvertimeClose);
    assert!(r.clock.elapsed() > Duration::from_secs(300));
    assert!(r.rail.control_high(), "rail stays up until the forced close");

    assert_eq!(m.call(event_for(m.current_state()), &mut r.ctx), PowerState::EnterQr);
    assert!(!r.rail.control_high());
    assert_eq!(r.rail.control_history(), vec![true, false]);

    let s = statuses(&r.queue);
    assert_eq!(s, vec![(1, "u-1".into()), (0, "u-1".into())]);
    assert_eq!(s.iter().filter(|(status, _)| *status == 0).count(), 1);
}

#[test]
fn repeated_account_is_skipped_until_a_new_one_scans() {
    // The forced close advances the clock ~300 s; the later scans are
    // stamped so they are one second old when read.
    let scans = format!("{}{}{}", scan(5, "u-1"), scan(-299, "u-1"), scan(-299, "u-2"));
    let mut r = rig(&scans, MockRail::with_sense(&[], false), Duration::from_secs(86_400));
    let m = build_power_machine();

    m.call(event_for(m.current_state()), &mut r.ctx);
    m.call(event_for(m.current_state()), &mut r.ctx);
    m.call(event_for(m.current_state()), &mut r.ctx);
    assert_eq!(m.current_state(), PowerState::EnterQr);

    assert_eq!(m.call(event_for(m.current_state()), &mut r.ctx), PowerState::QrAccepted);
    assert_eq!(r.ctx.account, "u-2");
    assert_eq!(
        statuses(&r.queue),
        vec![(1, "u-1".into()), (0, "u-1".into()), (1, "u-2".into())]
    );
}

#[test]
fn expired_scan_never_energises_the_rail() {
    let mut r = rig(&scan(301, "u-1"), MockRail::default(), Duration::from_secs(60));
    let m = build_power_machine();

    assert_eq!(m.call(event_for(m.current_state()), &mut r.ctx), PowerState::EnterQr);
    assert!(r.rail.control_history().is_empty());
    assert!(r.queue.is_empty().unwrap());
}

#[test]
fn scan_for_another_role_is_rejected() {
    let json = format!(r#"{{"time":{},"account":"u-9"}}"#, VirtualClock::epoch().timestamp() * 1000);
    let line = format!("{}\r", STANDARD.encode(json));
    let mut r = rig(&line, MockRail::default(), Duration::from_secs(60));
    let m = build_power_machine();

    assert_eq!(m.call(event_for(m.current_state()), &mut r.ctx), PowerState::EnterQr);
    assert!(r.rail.control_history().is_empty());
}

#[test]
fn garbage_lines_do_not_block_a_later_valid_scan() {
    let scans = format!("not-base64!!\r{}\r{}", STANDARD.encode("[]"), scan(1, "u-3"));
    let mut r = rig(&scans, MockRail::default(), Duration::from_secs(60));
    let m = build_power_machine();

    assert_eq!(m.call(event_for(m.current_state()), &mut r.ctx), PowerState::QrAccepted);
    assert_eq!(r.ctx.account, "u-3");
}

#[test]
fn power_returning_in_grace_window_reports_on_again() {
    let mut r = rig(&scan(5, "u-1"), MockRail::with_sense(&[true], false), Duration::from_secs(86_400));
    let m = build_power_machine();

    m.call(event_for(m.current_state()), &mut r.ctx); // -> QrAccepted
    m.call(event_for(m.current_state()), &mut r.ctx); // -> PoweredOn
    m.call(event_for(m.current_state()), &mut r.ctx); // -> Closing
    assert_eq!(m.call(event_for(m.current_state()), &mut r.ctx), PowerState::ClosingTimed);

    r.rail.script(&[false, false, true], false);
    assert_eq!(m.call(event_for(m.current_state()), &mut r.ctx), PowerState::PoweredOn);
    assert!(r.rail.control_high(), "rail is not parked while the device is back on");
    assert_eq!(m.call(event_for(m.current_state()), &mut r.ctx), PowerState::Closing);

    let s: Vec<u64> = statuses(&r.queue).into_iter().map(|(s, _)| s).collect();
    assert_eq!(s, vec![1, 2, 3, 2]);
}

#[test]
fn run_loop_ends_when_the_clock_stops() {
    let mut r = rig("", MockRail::default(), Duration::from_secs(5));
    let m = build_power_machine();
    kiosk_gateway::fsm::power::run(&m, &mut r.ctx);
    assert_eq!(m.current_state(), PowerState::EnterQr);
    assert!(r.clock.elapsed() > Duration::from_secs(5));
}
