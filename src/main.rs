//! Kiosk Gateway main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  PowerRail        SystemModem     MqttBroker     SystemClock   │
//! │  (sysfs lines)    (probe/dial)    (rumqttc)      (shutdown)    │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  power machine · cellular machine · geo · publisher    │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  TelemetryQueue (SQLite) between producers and publisher       │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use kiosk_gateway::app::service::Gateway;
use kiosk_gateway::config::GatewayConfig;
use kiosk_gateway::logging;
use kiosk_gateway::queue::TelemetryQueue;
use kiosk_gateway::shutdown::Shutdown;

/// How long loops get to notice shutdown before the process exits anyway.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Gateway configuration file (TOML).
    #[arg(long, short, value_name = "FILE", default_value = "gateway.toml")]
    config: PathBuf,

    /// Append logs to this file instead of stderr.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Log filter, e.g. `info` or `info,cellular=debug`.
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = GatewayConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(file) = cli.log_file {
        config.log.file = Some(file);
    }
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }
    logging::init(&config.log).context("initialising logging")?;

    info!(target: "gateway", "kiosk-gateway {} starting", env!("CARGO_PKG_VERSION"));

    let queue = TelemetryQueue::open(&config.store.path)
        .with_context(|| format!("opening queue {}", config.store.path.display()))?;
    queue.report_backlog()?;

    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.trigger()).context("installing signal handler")?;
    }

    let gateway = Gateway::start(&config, &queue, &shutdown);

    while !shutdown.is_triggered() {
        shutdown.wait(Duration::from_secs(3600));
    }

    let left = gateway.stop(SHUTDOWN_GRACE);
    if left > 0 {
        warn!(target: "gateway", "exiting with {left} loop(s) still busy");
    }
    info!(target: "gateway", "stopped");
    Ok(())
}
