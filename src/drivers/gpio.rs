//! Linux sysfs digital lines.
//!
//! A line is exported through `<root>/export`, configured through
//! `<root>/gpioN/direction` and driven or sampled through
//! `<root>/gpioN/value`.  Dropping a [`SysfsLine`] unexports it; output
//! lines are driven low first so a stopped gateway never leaves the rail
//! energised.
//!
//! [`SysfsLine`] implements the `embedded-hal` digital traits, so the
//! power-rail adapter is written against `InputPin` / `OutputPin` only.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use log::{debug, warn};

use crate::error::GpioError;

/// Default sysfs mount point.
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Pause before the single retry of a failed open; udev may still be
/// fixing permissions on a freshly exported line.
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn as_sysfs(self) -> &'static [u8] {
        match self {
            Self::In => b"in\n",
            Self::Out => b"out\n",
        }
    }
}

/// One exported sysfs line, owned by exactly one adapter.
pub struct SysfsLine {
    root: PathBuf,
    line: u32,
    direction: Direction,
    value: File,
}

impl SysfsLine {
    /// Open `line` under the default sysfs root, retrying once on failure.
    pub fn open(line: u32, direction: Direction) -> Result<Self, GpioError> {
        Self::open_with_retry(Path::new(SYSFS_GPIO_ROOT), line, direction)
    }

    pub fn open_with_retry(root: &Path, line: u32, direction: Direction) -> Result<Self, GpioError> {
        match Self::open_at(root, line, direction) {
            Ok(l) => Ok(l),
            Err(e) => {
                warn!(target: "gpio", "line {line}: {e}, retrying once");
                std::thread::sleep(OPEN_RETRY_DELAY);
                Self::open_at(root, line, direction)
            }
        }
    }

    /// Export (if needed), set the direction and open the value file.
    pub fn open_at(root: &Path, line: u32, direction: Direction) -> Result<Self, GpioError> {
        let dir = root.join(format!("gpio{line}"));
        if !dir.exists() {
            write_control(&root.join("export"), line)
                .map_err(|source| GpioError::Export { line, source })?;
        }

        OpenOptions::new()
            .write(true)
            .open(dir.join("direction"))
            .and_then(|mut f| f.write_all(direction.as_sysfs()))
            .map_err(|source| GpioError::Direction { line, source })?;

        let value = match direction {
            Direction::In => OpenOptions::new().read(true).open(dir.join("value")),
            Direction::Out => OpenOptions::new().write(true).open(dir.join("value")),
        }
        .map_err(|source| GpioError::Value { line, source })?;

        debug!(target: "gpio", "line {line} open as {direction:?}");
        Ok(Self {
            root: root.to_path_buf(),
            line,
            direction,
            value,
        })
    }

    /// Sample the line: `true` for level 1.
    pub fn level(&mut self) -> Result<bool, GpioError> {
        if self.direction != Direction::In {
            return Err(GpioError::WrongDirection(self.line));
        }
        let line = self.line;
        let mut raw = String::new();
        self.value
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.value.read_to_string(&mut raw))
            .map_err(|source| GpioError::Value { line, source })?;
        match raw.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(GpioError::BadLevel {
                line,
                raw: other.to_string(),
            }),
        }
    }

    /// Drive the line to level 1 (`true`) or 0.
    pub fn drive(&mut self, high: bool) -> Result<(), GpioError> {
        if self.direction != Direction::Out {
            return Err(GpioError::WrongDirection(self.line));
        }
        let line = self.line;
        let data: &[u8] = if high { b"1\n" } else { b"0\n" };
        self.value
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.value.write_all(data))
            .and_then(|()| self.value.flush())
            .map_err(|source| GpioError::Value { line, source })
    }
}

impl Drop for SysfsLine {
    fn drop(&mut self) {
        if self.direction == Direction::Out {
            if let Err(e) = self.drive(false) {
                warn!(target: "gpio", "line {} not released low: {e}", self.line);
            }
        }
        if let Err(e) = write_control(&self.root.join("unexport"), self.line) {
            debug!(target: "gpio", "unexport of line {} failed: {e}", self.line);
        }
    }
}

fn write_control(path: &Path, line: u32) -> std::io::Result<()> {
    let mut f = OpenOptions::new().write(true).open(path)?;
    f.write_all(format!("{line}\n").as_bytes())
}

// ---------------------------------------------------------------------------
// embedded-hal
// ---------------------------------------------------------------------------

impl ErrorType for SysfsLine {
    type Error = GpioError;
}

impl InputPin for SysfsLine {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.level()
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.level().map(|high| !high)
    }
}

impl OutputPin for SysfsLine {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.drive(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.drive(true)
    }
}
