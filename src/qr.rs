//! QR scan decoding and authorisation.
//!
//! A scan arrives on the serial line as standard base64 terminated by CR.
//! The decoded bytes are JSON `{"time": <ms epoch>, "account": "..."}`.
//!
//! [`ScanLine`] assembles bytes into lines with a fixed bound;
//! [`QrGate`] decides whether a decoded scan may power the device.

use core::fmt;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Longest scan line kept; longer lines are discarded whole.
pub const MAX_SCAN_LINE: usize = 2048;

/// Decoded QR payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QrPayload {
    /// Generation time, milliseconds since the Unix epoch.
    pub time: i64,
    pub account: String,
}

/// Why a scan did not authorise a power-on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrRejection {
    /// Not valid standard base64.
    Base64,
    /// Decoded bytes are not the expected JSON object.
    Json,
    /// Older than the expiration window.
    Expired { age_secs: i64 },
    /// Same account as the last accepted scan.
    Duplicate,
    /// The payload does not carry this gateway's role id.
    RoleMismatch,
    /// Line exceeded [`MAX_SCAN_LINE`] before its terminator.
    Oversized,
}

impl fmt::Display for QrRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Base64 => f.write_str("not base64"),
            Self::Json => f.write_str("not a QR payload"),
            Self::Expired { age_secs } => write!(f, "expired ({age_secs}s old)"),
            Self::Duplicate => f.write_str("duplicate account"),
            Self::RoleMismatch => f.write_str("role id not present"),
            Self::Oversized => write!(f, "line longer than {MAX_SCAN_LINE} bytes"),
        }
    }
}

// ---------------------------------------------------------------------------
// Line assembly
// ---------------------------------------------------------------------------

/// Accumulates scanner bytes into CR-terminated lines.
///
/// LF bytes are dropped so scanners configured for CRLF behave the same.
#[derive(Default)]
pub struct ScanLine {
    buf: heapless::Vec<u8, MAX_SCAN_LINE>,
    overflowed: bool,
}

impl ScanLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte.  Returns a finished line (or the overflow rejection)
    /// when `byte` is the terminator.
    pub fn feed(&mut self, byte: u8) -> Option<Result<String, QrRejection>> {
        match byte {
            b'\r' => {
                let line = if self.overflowed {
                    Err(QrRejection::Oversized)
                } else {
                    Ok(String::from_utf8_lossy(&self.buf).into_owned())
                };
                self.clear();
                Some(line)
            }
            b'\n' => None,
            _ => {
                if !self.overflowed && self.buf.push(byte).is_err() {
                    self.overflowed = true;
                }
                None
            }
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.overflowed = false;
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.buf.is_empty() && !self.overflowed
    }
}

// ---------------------------------------------------------------------------
// Authorisation
// ---------------------------------------------------------------------------

/// Session-scoped QR authorisation state.
pub struct QrGate {
    role_id: String,
    expiration: Duration,
    last_accepted: Option<String>,
}

impl QrGate {
    pub fn new(role_id: impl Into<String>, expiration: Duration) -> Self {
        Self {
            role_id: role_id.into(),
            expiration,
            last_accepted: None,
        }
    }

    /// Check a scan line against age, duplicate and role rules, in that
    /// order.  Does not change the gate; call [`accept`](Self::accept) once
    /// the power-on actually happens.
    pub fn evaluate(&self, line: &str, now: DateTime<Utc>) -> Result<QrPayload, QrRejection> {
        let decoded = STANDARD
            .decode(line.trim())
            .map_err(|_| QrRejection::Base64)?;
        let payload: QrPayload =
            serde_json::from_slice(&decoded).map_err(|_| QrRejection::Json)?;

        let age_secs = now.timestamp() - payload.time.div_euclid(1000);
        if age_secs > self.expiration.as_secs() as i64 {
            return Err(QrRejection::Expired { age_secs });
        }

        if self.last_accepted.as_deref() == Some(payload.account.as_str()) {
            return Err(QrRejection::Duplicate);
        }

        // The role id is matched against the raw decoded text, so it may sit
        // in any field the issuer chooses.
        let text = String::from_utf8_lossy(&decoded);
        if !text.contains(self.role_id.as_str()) {
            return Err(QrRejection::RoleMismatch);
        }

        Ok(payload)
    }

    /// Record `payload` as the most recently accepted scan.
    pub fn accept(&mut self, payload: &QrPayload) {
        self.last_accepted = Some(payload.account.clone());
    }

    #[cfg(test)]
    fn last_accepted(&self) -> Option<&str> {
        self.last_accepted.as_deref()
    }
}
