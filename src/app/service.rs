//! Gateway service: builds every subsystem and runs each loop on its own
//! thread.
//!
//! ```text
//!                      ┌──────────────────────────────┐
//!  scanner, lines ───▶ │ power machine      (thread)  │──┐
//!  modem tooling  ───▶ │ cellular machine   (thread)  │  │ append
//!  GNSS ports     ───▶ │ geo producer       (thread)  │──┤
//!                      └──────────────────────────────┘  ▼
//!                                              TelemetryQueue (SQLite)
//!                                                         │ oldest/remove
//!                      ┌──────────────────────────────┐   ▼
//!          broker ◀─── │ MQTT network thread ◀── publisher (thread)
//!                      └──────────────────────────────┘
//! ```
//!
//! A subsystem whose setup fails logs the error and ends its own thread;
//! the others keep running.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::adapters::hardware::PowerRail;
use crate::adapters::modem::SystemModem;
use crate::adapters::mqtt::MqttBroker;
use crate::adapters::time::SystemClock;
use crate::config::{GatewayConfig, GeoConfig, PowerConfig};
use crate::drivers::gpio::{Direction, SysfsLine};
use crate::drivers::{serial, task};
use crate::error::Result;
use crate::fsm::{cellular, power};
use crate::geo::{self, GeoProducer};
use crate::publisher::Publisher;
use crate::queue::TelemetryQueue;
use crate::shutdown::Shutdown;

use super::ports::{Broker, Clock, PowerRailPort, TelemetrySink};

const LOOP_STACK_KB: usize = 256;

/// Running gateway: the worker threads plus the broker handle used to close
/// the session on shutdown.
pub struct Gateway {
    workers: Vec<JoinHandle<()>>,
    broker: Option<Arc<MqttBroker>>,
}

impl Gateway {
    /// Start every enabled subsystem.
    pub fn start(config: &GatewayConfig, queue: &TelemetryQueue, shutdown: &Shutdown) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(shutdown.clone()));
        let sink: Arc<dyn TelemetrySink> = Arc::new(queue.clone());
        let mut workers = Vec::new();

        let broker = match MqttBroker::connect(&config.broker, shutdown.clone()) {
            Ok((broker, network)) => {
                workers.push(network);
                let broker = Arc::new(broker);
                let publisher = Publisher::new(
                    queue.clone(),
                    Arc::clone(&broker) as Arc<dyn Broker>,
                    Arc::clone(&clock),
                    &config.broker,
                    &config.store,
                );
                spawn(&mut workers, "publisher", move || publisher.run());
                Some(broker)
            }
            Err(e) => {
                error!(target: "broker", "client setup failed, records will queue: {e}");
                None
            }
        };

        let cellular_config = config.cellular.clone();
        let cellular_clock = Arc::clone(&clock);
        spawn(&mut workers, "cellular", move || {
            let machine = cellular::build_cellular_machine();
            let mut ctx = cellular::CellularContext::new(
                cellular_config,
                Box::new(SystemModem::new()),
                cellular_clock,
            );
            cellular::run(&machine, &mut ctx);
        });

        let power_config = config.power.clone();
        let power_sink = Arc::clone(&sink);
        let power_clock = Arc::clone(&clock);
        spawn(&mut workers, "power", move || {
            if let Err(e) = run_power(&power_config, power_sink, power_clock) {
                error!(target: "power", "subsystem disabled: {e}");
            }
        });

        if config.geo.enabled {
            let geo_config = config.geo.clone();
            spawn(&mut workers, "geo", move || {
                if let Err(e) = run_geo(&geo_config, sink, clock) {
                    error!(target: "geo", "subsystem disabled: {e}");
                }
            });
        } else {
            info!(target: "geo", "disabled by configuration");
        }

        Self { workers, broker }
    }

    /// Close the broker session and wait up to `grace` for the loops to
    /// notice shutdown.  Returns the number of threads still running.
    pub fn stop(self, grace: Duration) -> usize {
        if let Some(broker) = &self.broker {
            broker.disconnect();
        }
        join_with_grace(self.workers, grace)
    }
}

fn spawn(workers: &mut Vec<JoinHandle<()>>, name: &'static str, f: impl FnOnce() + Send + 'static) {
    match task::spawn_loop(name, LOOP_STACK_KB, f) {
        Ok(handle) => workers.push(handle),
        Err(e) => error!(target: "gateway", "could not start '{name}': {e}"),
    }
}

fn run_power(config: &PowerConfig, sink: Arc<dyn TelemetrySink>, clock: Arc<dyn Clock>) -> Result<()> {
    let mut scanner = serial::open(
        &config.scanner_port,
        config.scanner_baud,
        Duration::from_millis(config.scanner_read_timeout_ms),
    )?;
    if config.configure_scanner {
        serial::configure_scanner(scanner.as_mut(), clock.as_ref())?;
    }

    let control = SysfsLine::open(config.control_gpio, Direction::Out)?;
    let sense = SysfsLine::open(config.sense_gpio, Direction::In)?;
    let mut rail = PowerRail::new(control, sense, config.sense_active_low);
    // Start from a known-off rail.
    rail.set_power(false)?;

    let machine = power::build_power_machine();
    let mut ctx = power::PowerContext::new(config, Box::new(scanner), Box::new(rail), sink, clock);
    power::run(&machine, &mut ctx);
    Ok(())
}

fn run_geo(config: &GeoConfig, sink: Arc<dyn TelemetrySink>, clock: Arc<dyn Clock>) -> Result<()> {
    let timeout = Duration::from_secs(1);
    {
        let mut control = serial::open(&config.control_port, config.baud, timeout)?;
        geo::init_gnss(control.as_mut(), clock.as_ref())?;
    }
    let data = serial::open(&config.data_port, config.baud, timeout)?;
    GeoProducer::new(config, Box::new(data), sink, clock).run();
    Ok(())
}

/// Join every handle that finishes within `grace`; the rest are left
/// detached.  Returns how many were left.
pub fn join_with_grace(handles: Vec<JoinHandle<()>>, grace: Duration) -> usize {
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline && handles.iter().any(|h| !h.is_finished()) {
        std::thread::sleep(Duration::from_millis(50));
    }

    let mut left = 0;
    for handle in handles {
        let name = handle.thread().name().unwrap_or("unnamed").to_string();
        if handle.is_finished() {
            if handle.join().is_err() {
                error!(target: "gateway", "'{name}' panicked");
            }
        } else {
            warn!(target: "gateway", "'{name}' still running after {}s", grace.as_secs());
            left += 1;
        }
    }
    left
}
