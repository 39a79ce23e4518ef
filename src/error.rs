//! Unified error types for the gateway.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! startup paths' error handling uniform.  Drive loops never return these:
//! handlers log them and fall back to a next state instead.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level gateway error
// ---------------------------------------------------------------------------

/// Every fallible setup or store operation funnels into this type.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is invalid or could not be loaded.
    #[error("config: {0}")]
    Config(String),

    /// Plain OS-level I/O failure (files, sysfs, sockets, subprocesses).
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The durable telemetry queue failed.
    #[error("store: {0}")]
    Store(#[from] rusqlite::Error),

    /// A serial line could not be opened or configured.
    #[error("serial: {0}")]
    Serial(#[from] serialport::Error),

    /// A digital line could not be exported, configured or driven.
    #[error("gpio: {0}")]
    Gpio(#[from] GpioError),

    /// The QR scanner rejected (or garbled) a configuration frame.
    #[error("scanner handshake failed at {step}: response {response:02X?}")]
    Handshake {
        step: &'static str,
        response: Vec<u8>,
    },

    /// A telemetry payload could not be serialised.
    #[error("telemetry encode: {0}")]
    Telemetry(#[from] serde_json::Error),

    /// The broker client could not be constructed.
    #[error("broker: {0}")]
    Broker(#[from] BrokerError),
}

// ---------------------------------------------------------------------------
// Digital line errors
// ---------------------------------------------------------------------------

/// Faults raised by the sysfs digital line driver.
#[derive(Debug, Error)]
pub enum GpioError {
    /// Writing the line number to `export`/`unexport` failed.
    #[error("export of line {line} failed: {source}")]
    Export {
        line: u32,
        #[source]
        source: std::io::Error,
    },
    /// Setting `direction` failed.
    #[error("direction of line {line} failed: {source}")]
    Direction {
        line: u32,
        #[source]
        source: std::io::Error,
    },
    /// Reading or writing `value` failed.
    #[error("value access on line {line} failed: {source}")]
    Value {
        line: u32,
        #[source]
        source: std::io::Error,
    },
    /// `value` held something other than `0` or `1`.
    #[error("line {line} reported unrecognised level {raw:?}")]
    BadLevel { line: u32, raw: String },
    /// The operation does not match the line's configured direction.
    #[error("line {0} is not configured for this operation")]
    WrongDirection(u32),
}

impl embedded_hal::digital::Error for GpioError {
    fn kind(&self) -> embedded_hal::digital::ErrorKind {
        embedded_hal::digital::ErrorKind::Other
    }
}

// ---------------------------------------------------------------------------
// Broker errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The client's outgoing request queue is full; try again later.
    #[error("outgoing queue full")]
    Backpressure,
    /// The client is gone (network thread exited).
    #[error("client disconnected")]
    Disconnected,
    /// The broker has not completed delivery of the outstanding publish yet.
    #[error("delivery not confirmed")]
    Unconfirmed,
    /// Client-side configuration problem (TLS material, options).
    #[error("setup: {0}")]
    Setup(String),
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Gateway-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
