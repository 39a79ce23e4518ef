//! Outbound telemetry records and their JSON payloads.
//!
//! Producers serialise a [`BootUp`] or [`GeoFix`] and append it to the
//! queue under a [`Topic`]; the publisher maps the topic to a broker topic.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// Queue topic of a record.  Stored as `"Status"` / `"GPS"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Status,
    Gps,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "Status",
            Self::Gps => "GPS",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Status" => Ok(Self::Status),
            "GPS" => Ok(Self::Gps),
            other => Err(format!("unknown topic {other:?}")),
        }
    }
}

/// Power-sequencing status codes carried in [`BootUp::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BootStatus {
    /// Power-on window elapsed without confirmation; rail forced off.
    TimeoutShutdown = 0,
    /// QR code accepted; rail energised.
    Authorized = 1,
    /// Power-sense confirmed the device is on.
    PoweredOn = 2,
    /// Power-sense reports the device went off.
    PoweredOff = 3,
}

impl Serialize for BootStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// Status payload: `{"time": RFC3339, "account": "...", "status": 0..3}`.
#[derive(Debug, Clone, Serialize)]
pub struct BootUp {
    pub time: DateTime<Utc>,
    pub account: String,
    pub status: BootStatus,
}

/// GPS payload: coordinates as 6-decimal signed degree strings.
#[derive(Debug, Clone, Serialize)]
pub struct GeoFix {
    pub time: DateTime<Utc>,
    pub latitude: String,
    pub longitude: String,
}

/// A queued record as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: i64,
    pub topic: Topic,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}
