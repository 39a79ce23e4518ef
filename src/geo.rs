//! GNSS producer.
//!
//! The modem's GNSS engine is started over its AT control port, then NMEA
//! sentences are read from the data port.  Each `$GPGGA` sentence with a
//! GPS or DGPS fix becomes one `GPS` queue record.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::app::ports::{Clock, TelemetrySink};
use crate::config::GeoConfig;
use crate::error::Result;
use crate::telemetry::{GeoFix, Topic};

/// AT commands sent once at startup, in order.
pub const GNSS_INIT: [&str; 3] = [
    "AT+QGPSEND\r",
    "AT+QGPSCFG=\"gpsnmeatype\",1\r",
    "AT+QGPS=1,,,,10\r",
];

const AT_SETTLE: Duration = Duration::from_secs(1);

/// Longest NMEA line kept (the standard caps sentences at 82 bytes).
const MAX_NMEA_LINE: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NmeaError {
    #[error("not a GPGGA sentence")]
    Unsupported,
    #[error("GPGGA sentence has {0} fields, expected at least 8")]
    Truncated(usize),
    #[error("coordinate or hemisphere missing")]
    MissingCoordinate,
    #[error("coordinate {0:?} is not a number")]
    BadNumber(String),
}

/// The GGA fields the gateway uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gga {
    pub fix_time: String,
    pub latitude: String,
    pub latitude_hemisphere: String,
    pub longitude: String,
    pub longitude_hemisphere: String,
    pub fix_quality: String,
    pub satellites: String,
}

impl Gga {
    /// Quality `1` (GPS) or `2` (DGPS).
    pub fn has_fix(&self) -> bool {
        matches!(self.fix_quality.as_str(), "1" | "2")
    }

    pub fn latitude_degrees(&self) -> core::result::Result<String, NmeaError> {
        parse_degrees(&self.latitude, &self.latitude_hemisphere)
    }

    pub fn longitude_degrees(&self) -> core::result::Result<String, NmeaError> {
        parse_degrees(&self.longitude, &self.longitude_hemisphere)
    }
}

pub fn parse_gga(line: &str) -> core::result::Result<Gga, NmeaError> {
    let tokens: Vec<&str> = line.trim().split(',').collect();
    if tokens[0] != "$GPGGA" {
        return Err(NmeaError::Unsupported);
    }
    if tokens.len() < 8 {
        return Err(NmeaError::Truncated(tokens.len()));
    }
    Ok(Gga {
        fix_time: tokens[1].to_string(),
        latitude: tokens[2].to_string(),
        latitude_hemisphere: tokens[3].to_string(),
        longitude: tokens[4].to_string(),
        longitude_hemisphere: tokens[5].to_string(),
        fix_quality: tokens[6].to_string(),
        satellites: tokens[7].to_string(),
    })
}

/// `ddmm.mmmm` / `dddmm.mmmm` to signed decimal degrees with six decimals.
pub fn parse_degrees(value: &str, hemisphere: &str) -> core::result::Result<String, NmeaError> {
    if value.is_empty() || hemisphere.is_empty() {
        return Err(NmeaError::MissingCoordinate);
    }
    let raw: f64 = value
        .parse()
        .map_err(|_| NmeaError::BadNumber(value.to_string()))?;
    let degrees = (raw / 100.0).floor();
    let minutes = (raw / 100.0 - degrees) * 100.0 / 60.0;
    let mut decimal = degrees + minutes;
    if hemisphere == "S" || hemisphere == "W" {
        decimal = -decimal;
    }
    Ok(format!("{decimal:.6}"))
}

/// Start the GNSS engine.  Each command is followed by a one-second settle
/// and a logged response read; a missing response is not fatal.
pub fn init_gnss<P: Read + Write + ?Sized>(port: &mut P, clock: &dyn Clock) -> Result<()> {
    let mut buf = [0u8; 128];
    for command in GNSS_INIT {
        port.write_all(command.as_bytes())?;
        port.flush()?;
        clock.pause(AT_SETTLE);
        match port.read(&mut buf) {
            Ok(n) => info!(
                target: "geo",
                "{} -> {:?}",
                command.trim_end(),
                String::from_utf8_lossy(&buf[..n]).trim()
            ),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                warn!(target: "geo", "{} -> no response", command.trim_end());
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// What one NMEA line led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A fix was queued under this id.
    Queued(i64),
    /// A GGA sentence without a fix.
    NoFix,
    /// Some other sentence, or one that could not be used.
    Skipped,
}

pub struct GeoProducer {
    source: Box<dyn Read + Send>,
    sink: Arc<dyn TelemetrySink>,
    clock: Arc<dyn Clock>,
    period: Duration,
    no_fix_backoff: Duration,
    line: heapless::Vec<u8, MAX_NMEA_LINE>,
    overflowed: bool,
}

impl GeoProducer {
    pub fn new(
        config: &GeoConfig,
        source: Box<dyn Read + Send>,
        sink: Arc<dyn TelemetrySink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            sink,
            clock,
            period: Duration::from_secs(config.period_secs),
            no_fix_backoff: Duration::from_secs(config.no_fix_backoff_secs),
            line: heapless::Vec::new(),
            overflowed: false,
        }
    }

    /// Handle one complete sentence.
    pub fn handle_line(&self, line: &str) -> Outcome {
        debug!(target: "geo", "{line}");
        let gga = match parse_gga(line) {
            Ok(gga) => gga,
            Err(_) => return Outcome::Skipped,
        };
        if !gga.has_fix() {
            info!(target: "geo", "no fix available");
            return Outcome::NoFix;
        }

        let coordinates = gga
            .latitude_degrees()
            .and_then(|lat| gga.longitude_degrees().map(|lon| (lat, lon)));
        let (latitude, longitude) = match coordinates {
            Ok(c) => c,
            Err(e) => {
                warn!(target: "geo", "fix without usable coordinates: {e}");
                return Outcome::Skipped;
            }
        };

        let fix = GeoFix {
            time: self.clock.utc(),
            latitude,
            longitude,
        };
        let stored = serde_json::to_string(&fix)
            .map_err(crate::error::Error::from)
            .and_then(|json| self.sink.append(Topic::Gps, &json));
        match stored {
            Ok(id) => {
                info!(target: "geo", "fix {},{} queued as #{id}", fix.latitude, fix.longitude);
                Outcome::Queued(id)
            }
            Err(e) => {
                error!(target: "geo", "fix lost: {e}");
                Outcome::Skipped
            }
        }
    }

    /// Read sentences until the clock reports shutdown.
    pub fn run(&mut self) {
        let mut byte = [0u8; 1];
        while self.clock.is_running() {
            match self.source.read(&mut byte) {
                Ok(1) => {}
                Ok(_) => {
                    if !self.clock.pause(Duration::from_secs(1)) {
                        break;
                    }
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) => {
                    warn!(target: "geo", "read failed: {e}");
                    if !self.clock.pause(self.no_fix_backoff) {
                        break;
                    }
                    continue;
                }
            }

            let Some(line) = self.feed(byte[0]) else {
                continue;
            };
            let wait = match self.handle_line(&line) {
                Outcome::Queued(_) => self.period,
                Outcome::NoFix => self.no_fix_backoff,
                Outcome::Skipped => continue,
            };
            if !self.clock.pause(wait) {
                break;
            }
        }
        debug!(target: "geo", "stopped");
    }

    fn feed(&mut self, byte: u8) -> Option<String> {
        match byte {
            b'\n' => {
                let line = (!self.overflowed)
                    .then(|| String::from_utf8_lossy(&self.line).trim_end_matches('\r').to_string());
                self.line.clear();
                self.overflowed = false;
                line
            }
            _ => {
                if !self.overflowed && self.line.push(byte).is_err() {
                    self.overflowed = true;
                }
                None
            }
        }
    }
}
