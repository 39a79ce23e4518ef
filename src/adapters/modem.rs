//! Modem adapter: TCP reachability, the process table and the dial script.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use log::{debug, info};
use sysinfo::{Pid, PidExt, ProcessExt, ProcessRefreshKind, Signal, System, SystemExt};

use crate::app::ports::ModemPort;

pub struct SystemModem {
    system: System,
    /// Last dial script started; reaped once it exits.
    dialer: Option<Child>,
}

impl Default for SystemModem {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemModem {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            dialer: None,
        }
    }

    fn reap(&mut self) {
        let Some(child) = self.dialer.as_mut() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                info!(target: "cellular", "dial script exited: {status}");
                self.dialer = None;
            }
            Ok(None) => {}
            Err(e) => {
                debug!(target: "cellular", "dial script status unavailable: {e}");
                self.dialer = None;
            }
        }
    }
}

/// One TCP connect attempt per resolved address of each target, in order.
pub fn probe_targets(targets: &[String], timeout: Duration) -> io::Result<()> {
    let mut last = io::Error::new(io::ErrorKind::InvalidInput, "no probe targets");
    for target in targets {
        let addrs = match target.to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                last = e;
                continue;
            }
        };
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(_) => {
                    debug!(target: "cellular", "{target} reachable");
                    return Ok(());
                }
                Err(e) => last = e,
            }
        }
    }
    Err(last)
}

impl ModemPort for SystemModem {
    fn probe(&mut self, targets: &[String], timeout: Duration) -> io::Result<()> {
        probe_targets(targets, timeout)
    }

    fn find_dialer(&mut self, name: &str) -> io::Result<Vec<u32>> {
        self.reap();
        self.system
            .refresh_processes_specifics(ProcessRefreshKind::new());
        Ok(self
            .system
            .processes_by_exact_name(name)
            .map(|p| p.pid().as_u32())
            .collect())
    }

    fn kill(&mut self, pid: u32) -> io::Result<()> {
        let process = self
            .system
            .process(Pid::from_u32(pid))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no process {pid}")))?;
        match process.kill_with(Signal::Kill) {
            Some(true) => Ok(()),
            Some(false) => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("signal to {pid} refused"),
            )),
            None => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "SIGKILL not supported on this platform",
            )),
        }
    }

    fn dial(&mut self, script: &Path) -> io::Result<()> {
        self.reap();
        let mut permissions = std::fs::metadata(script)?.permissions();
        permissions.set_mode(permissions.mode() | 0o100);
        std::fs::set_permissions(script, permissions)?;

        let child = Command::new(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        debug!(target: "cellular", "dial script pid {}", child.id());
        self.dialer = Some(child);
        Ok(())
    }
}
