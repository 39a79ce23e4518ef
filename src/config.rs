//! Gateway configuration
//!
//! All tunable parameters for the gateway, loaded from a TOML file.
//! Every field has a default so a minimal file only needs the site-specific
//! values (role id, broker address, dial script).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Core gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub power: PowerConfig,
    pub cellular: CellularConfig,
    pub broker: BrokerConfig,
    pub geo: GeoConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
}

/// QR scanner and power-rail sequencing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    // --- Lines ---
    /// sysfs number of the power-control output.
    pub control_gpio: u32,
    /// sysfs number of the power-sense input.
    pub sense_gpio: u32,
    /// `true` when a low level on the sense line means "powered".
    pub sense_active_low: bool,

    // --- Scanner ---
    /// Serial device of the QR scanner.
    pub scanner_port: String,
    pub scanner_baud: u32,
    /// Serial read timeout; bounds how long a scan read can ignore shutdown.
    pub scanner_read_timeout_ms: u64,
    /// Send the light/brightness configuration frames at startup.
    pub configure_scanner: bool,

    // --- Authorisation ---
    /// Identifier a QR payload must contain to power this device.
    pub role_id: String,
    /// Maximum QR code age (seconds).
    pub qr_expiration_secs: u64,

    // --- Timing ---
    /// Power-on window after acceptance before a forced shutdown (seconds).
    pub power_on_timeout_secs: u64,
    /// How long the device must stay unpowered before the rail is parked (seconds).
    pub min_closed_secs: u64,
    /// Sense polling interval while waiting for power-on confirmation (milliseconds).
    pub sense_poll_ms: u64,
    /// Sense polling interval while closing / parked (seconds).
    pub close_poll_secs: u64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            control_gpio: 21,
            sense_gpio: 18,
            sense_active_low: true,

            scanner_port: "/dev/ttyUSB0".into(),
            scanner_baud: 115_200,
            scanner_read_timeout_ms: 1000,
            configure_scanner: true,

            role_id: String::new(),
            qr_expiration_secs: 300,

            power_on_timeout_secs: 300,
            min_closed_secs: 3600,
            sense_poll_ms: 100,
            close_poll_secs: 10,
        }
    }
}

/// Cellular link supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CellularConfig {
    /// `host:port` reachability targets, tried in order.
    pub probe_targets: Vec<String>,
    /// Dial script invoked when no dialer is running.
    pub dial_script: PathBuf,
    /// Process name of the dialer (matched against the process table).
    pub dialer_process: String,
    /// TCP probe timeout in the `Judge` state (seconds).
    pub probe_timeout_secs: u64,
    /// TCP probe timeout while a dialer is running (seconds).
    pub recovery_probe_timeout_secs: u64,
    /// Sleep between link checks while networked (seconds).
    pub steady_poll_secs: u64,
    /// Settle time after invoking the dial script (seconds).
    pub dial_settle_secs: u64,
}

impl Default for CellularConfig {
    fn default() -> Self {
        Self {
            probe_targets: vec!["114.114.114.114:53".into(), "8.8.8.8:53".into()],
            dial_script: PathBuf::from("./ppp-on.sh"),
            dialer_process: "pppd".into(),
            probe_timeout_secs: 10,
            recovery_probe_timeout_secs: 120,
            steady_poll_secs: 90,
            dial_settle_secs: 90,
        }
    }
}

/// Client certificate material for a TLS broker connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsFiles {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// MQTT broker connection and topics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    /// Present = connect over TLS with a client certificate.
    pub tls: Option<TlsFiles>,
    /// Topic for power-sequencing status records.
    pub topic_boot_up: String,
    /// Topic for GPS fixes.
    pub topic_gps: String,
    /// Capacity of the client's outgoing request queue.
    pub request_capacity: usize,
    /// Pause before the network thread retries after a connection error (seconds).
    pub reconnect_backoff_secs: u64,
    /// How long the publisher waits for a QoS 2 completion per drain step (seconds).
    pub ack_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "kiosk-gateway".into(),
            username: None,
            password: None,
            keep_alive_secs: 60,
            tls: None,
            topic_boot_up: "gateway/bootup".into(),
            topic_gps: "gateway/gps".into(),
            request_capacity: 64,
            reconnect_backoff_secs: 5,
            ack_timeout_secs: 10,
        }
    }
}

/// GNSS producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub enabled: bool,
    /// AT command port of the modem.
    pub control_port: String,
    /// NMEA output port of the modem.
    pub data_port: String,
    pub baud: u32,
    /// Wait after a persisted fix (seconds).
    pub period_secs: u64,
    /// Wait after a sentence without a fix (seconds).
    pub no_fix_backoff_secs: u64,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            control_port: "/dev/ttyUSB2".into(),
            data_port: "/dev/ttyUSB1".into(),
            baud: 115_200,
            period_secs: 100,
            no_fix_backoff_secs: 10,
        }
    }
}

/// Durable queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Publisher sleep when the queue is empty (seconds).
    pub idle_poll_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./mqttmsg.db"),
            idle_poll_secs: 150,
        }
    }
}

/// Log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `env_logger` filter string, e.g. `info` or `info,cellular=debug`.
    pub level: String,
    /// Append to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
        }
    }
}

impl GatewayConfig {
    /// Read, parse and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        let p = &self.power;
        if p.role_id.trim().is_empty() {
            return Err(Error::Config("power.role_id must be set".into()));
        }
        if p.control_gpio == p.sense_gpio {
            return Err(Error::Config(
                "power.control_gpio and power.sense_gpio must differ".into(),
            ));
        }
        if p.power_on_timeout_secs == 0 || p.qr_expiration_secs == 0 {
            return Err(Error::Config(
                "power timeouts must be greater than zero".into(),
            ));
        }
        if p.sense_poll_ms == 0 || p.close_poll_secs == 0 || p.scanner_read_timeout_ms == 0 {
            return Err(Error::Config("power poll intervals must be greater than zero".into()));
        }

        let c = &self.cellular;
        if c.probe_targets.is_empty() {
            return Err(Error::Config("cellular.probe_targets is empty".into()));
        }
        if c.probe_timeout_secs == 0 || c.recovery_probe_timeout_secs == 0 {
            return Err(Error::Config("cellular probe timeouts must be greater than zero".into()));
        }
        if c.dialer_process.is_empty() {
            return Err(Error::Config("cellular.dialer_process must be set".into()));
        }

        let b = &self.broker;
        if b.topic_boot_up.is_empty() || b.topic_gps.is_empty() {
            return Err(Error::Config("broker topics must be set".into()));
        }
        if b.keep_alive_secs < 5 {
            return Err(Error::Config("broker.keep_alive_secs must be at least 5".into()));
        }
        if b.request_capacity == 0 {
            return Err(Error::Config("broker.request_capacity must be greater than zero".into()));
        }
        if b.ack_timeout_secs == 0 {
            return Err(Error::Config("broker.ack_timeout_secs must be greater than zero".into()));
        }

        if self.store.idle_poll_secs == 0 {
            return Err(Error::Config("store.idle_poll_secs must be greater than zero".into()));
        }
        Ok(())
    }
}

impl PowerConfig {
    pub fn qr_expiration(&self) -> Duration {
        Duration::from_secs(self.qr_expiration_secs)
    }

    pub fn power_on_timeout(&self) -> Duration {
        Duration::from_secs(self.power_on_timeout_secs)
    }

    pub fn min_closed(&self) -> Duration {
        Duration::from_secs(self.min_closed_secs)
    }

    pub fn sense_poll(&self) -> Duration {
        Duration::from_millis(self.sense_poll_ms)
    }

    pub fn close_poll(&self) -> Duration {
        Duration::from_secs(self.close_poll_secs)
    }
}

impl CellularConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn recovery_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_probe_timeout_secs)
    }

    pub fn steady_poll(&self) -> Duration {
        Duration::from_secs(self.steady_poll_secs)
    }

    pub fn dial_settle(&self) -> Duration {
        Duration::from_secs(self.dial_settle_secs)
    }
}
