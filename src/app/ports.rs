//! Port traits: the hexagonal boundary between the machines and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Machine handlers / publisher (domain)
//! ```
//!
//! Driven adapters (sysfs lines, serial scanner, modem tooling, SQLite queue,
//! MQTT client) implement these traits.  Handler contexts hold them as
//! trait objects, so every machine runs unchanged against the mocks in
//! `tests/`.

use std::io;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{BrokerError, GpioError, Result};
use crate::telemetry::Topic;

// ───────────────────────────────────────────────────────────────
// Clock port (monotonic time, wall time, cancellable waits)
// ───────────────────────────────────────────────────────────────

/// Time source and sleeper for a drive loop.
///
/// `pause` is the only way handlers wait.  The production adapter backs it
/// with the process [`Shutdown`](crate::shutdown::Shutdown) signal; the test
/// clock advances virtual time instead of sleeping.
pub trait Clock: Send + Sync {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;

    /// Wall-clock time, used for QR age checks and record timestamps.
    fn utc(&self) -> DateTime<Utc>;

    /// Wait `period`.  Returns `false` if the gateway is stopping.
    fn pause(&self, period: Duration) -> bool;

    /// `false` once shutdown has been requested.
    fn is_running(&self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Power rail port (domain → power-control output, power-sense input)
// ───────────────────────────────────────────────────────────────

/// The two digital lines of the power-sequenced device.
///
/// Polarity is resolved by the adapter: `true` always means "energised"
/// / "powered", whatever the electrical level.
pub trait PowerRailPort: Send {
    /// Drive the power-control output.
    fn set_power(&mut self, on: bool) -> core::result::Result<(), GpioError>;

    /// Read the power-sense input.
    fn is_powered(&mut self) -> core::result::Result<bool, GpioError>;
}

// ───────────────────────────────────────────────────────────────
// Telemetry sink port (domain → durable queue)
// ───────────────────────────────────────────────────────────────

/// Append-only side of the store-and-forward queue.
pub trait TelemetrySink: Send + Sync {
    /// Persist one record; returns the id the store assigned.
    fn append(&self, topic: Topic, payload: &str) -> Result<i64>;
}

// ───────────────────────────────────────────────────────────────
// Modem port (domain → reachability probe, dialer process)
// ───────────────────────────────────────────────────────────────

/// Everything the connectivity machine does to the cellular link.
pub trait ModemPort: Send {
    /// TCP-connect to each target in order; `Ok` on the first success.
    fn probe(&mut self, targets: &[String], timeout: Duration) -> io::Result<()>;

    /// PIDs of running processes named `name`.
    fn find_dialer(&mut self, name: &str) -> io::Result<Vec<u32>>;

    /// Send a kill signal to `pid` without waiting for it to exit.
    fn kill(&mut self, pid: u32) -> io::Result<()>;

    /// Make `script` executable and start it; returns once it is spawned.
    fn dial(&mut self, script: &Path) -> io::Result<()>;
}

// ───────────────────────────────────────────────────────────────
// Broker port (publisher → MQTT client)
// ───────────────────────────────────────────────────────────────

/// QoS 2 publish split into hand-off and completion.
///
/// `publish` returning `Ok` only means the client queued the message (not
/// retained).  `confirm` blocks up to `timeout` for the broker to complete
/// the oldest publish not yet confirmed.
pub trait Broker: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]) -> core::result::Result<(), BrokerError>;

    fn confirm(&self, timeout: Duration) -> core::result::Result<(), BrokerError>;
}
