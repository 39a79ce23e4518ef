//! Serial lines: opening ports and the QR scanner's configuration handshake.

use std::io::{Read, Write};
use std::time::Duration;

use log::{debug, info};
use serialport::SerialPort;

use crate::app::ports::Clock;
use crate::error::{Error, Result};

/// Open `path` as 8N1 at `baud`, with `read_timeout` bounding every read.
pub fn open(path: &str, baud: u32, read_timeout: Duration) -> Result<Box<dyn SerialPort>> {
    let port = serialport::new(path, baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(read_timeout)
        .open()?;
    debug!(target: "scanner", "{path} open at {baud} baud");
    Ok(port)
}

// ---------------------------------------------------------------------------
// Scanner configuration
// ---------------------------------------------------------------------------

/// Reply the scanner sends for every accepted configuration frame.
pub const SCANNER_ACK: [u8; 7] = [0x02, 0x00, 0x00, 0x01, 0x00, 0x33, 0x31];

/// Configuration frames in send order: illumination and aiming parameters,
/// end-of-record, then save-to-flash.
pub const SCANNER_SETUP: [(&str, [u8; 9]); 6] = [
    ("light 1B", [0x7E, 0x00, 0x08, 0x01, 0x00, 0x1B, 0x0A, 0xAB, 0xCD]),
    ("light 1C", [0x7E, 0x00, 0x08, 0x01, 0x00, 0x1C, 0x00, 0xAB, 0xCD]),
    ("light 1D", [0x7E, 0x00, 0x08, 0x01, 0x00, 0x1D, 0x00, 0xAB, 0xCD]),
    ("light 1E", [0x7E, 0x00, 0x08, 0x01, 0x00, 0x1E, 0x00, 0xAB, 0xCD]),
    ("end of record", [0x7E, 0x00, 0x08, 0x01, 0x00, 0x60, 0x01, 0xAB, 0xCD]),
    ("save", [0x7E, 0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0xDE, 0xC8]),
];

const FRAME_SETTLE: Duration = Duration::from_secs(1);

/// Send every setup frame and require [`SCANNER_ACK`] after each.
///
/// Any mismatch (or a read timeout) aborts with [`Error::Handshake`]; the
/// scanner is then left in whatever state the last accepted frame put it.
pub fn configure_scanner<P: Read + Write + ?Sized>(port: &mut P, clock: &dyn Clock) -> Result<()> {
    let mut buf = [0u8; 64];
    for (step, frame) in SCANNER_SETUP {
        port.write_all(&frame)?;
        port.flush()?;
        clock.pause(FRAME_SETTLE);
        let n = match port.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
            Err(e) => return Err(e.into()),
        };
        if buf[..n] != SCANNER_ACK {
            return Err(Error::Handshake {
                step,
                response: buf[..n].to_vec(),
            });
        }
        debug!(target: "scanner", "{step} acknowledged");
    }
    info!(target: "scanner", "configuration saved");
    Ok(())
}
