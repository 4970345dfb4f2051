//! Launching the external tunnel engine
//!
//! This module uses `unsafe` for the pre-exec hook that clears
//! close-on-exec on the device descriptor, so the engine inherits it.

#![allow(unsafe_code)]

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use wgnetns_core::{Error, InterfaceName, ProcessId, Result};
use wgnetns_namespace::TunDevice;

use crate::supervisor::control_socket_path;

/// Keeps the engine attached to its parent instead of daemonizing
pub const FOREGROUND_ENV: &str = "WG_PROCESS_FOREGROUND";
/// Number of the inherited descriptor holding the tunnel device
pub const TUN_FD_ENV: &str = "WG_TUN_FD";
/// Engine log verbosity (`error`, `verbose`, `debug`, `silent`)
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Default engine executable, looked up in `PATH`
pub const DEFAULT_ENGINE: &str = "wireguard-go";

/// Something that can start an engine on a tunnel device
pub trait EngineLauncher {
    /// Start the engine for `interface`, handing it `device`
    ///
    /// The device is consumed: on success the engine holds it, on failure
    /// it has been closed.
    ///
    /// # Errors
    /// Returns [`Error::ProcessSpawn`] if the engine cannot be started
    fn launch(
        &self,
        device: TunDevice,
        interface: &InterfaceName,
        work_dir: &Path,
    ) -> Result<TunnelProcessHandle>;
}

/// A running engine and the control socket it is expected to create
#[derive(Debug)]
pub struct TunnelProcessHandle {
    child: Child,
    pid: ProcessId,
    interface: InterfaceName,
    control_socket: PathBuf,
}

impl TunnelProcessHandle {
    /// Wrap a spawned engine
    ///
    /// # Errors
    /// Returns error if the child has already been reaped
    pub fn new(child: Child, interface: InterfaceName, work_dir: &Path) -> Result<Self> {
        let raw = child
            .id()
            .ok_or_else(|| Error::EngineExited {
                status: "reaped before it could be tracked".to_string(),
            })?;
        let pid = ProcessId::new(i32::try_from(raw).map_err(|_| {
            Error::invalid_config(format!("Process id {raw} out of range"))
        })?)?;
        let control_socket = control_socket_path(work_dir, &interface);
        Ok(Self {
            child,
            pid,
            interface,
            control_socket,
        })
    }

    /// Engine process id
    #[must_use]
    pub const fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Interface the engine serves
    #[must_use]
    pub const fn interface(&self) -> &InterfaceName {
        &self.interface
    }

    /// Where the engine will listen for control connections
    #[must_use]
    pub fn control_socket(&self) -> &Path {
        &self.control_socket
    }

    /// Exit status if the engine has already stopped
    ///
    /// # Errors
    /// Returns error if the status cannot be queried
    pub fn try_status(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Kill the engine and wait for it
    ///
    /// # Errors
    /// Returns error if the process cannot be signalled or reaped
    pub async fn terminate(mut self) -> Result<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            debug!(pid = %self.pid, %status, "Engine already exited");
            return Ok(status);
        }
        warn!(pid = %self.pid, interface = %self.interface, "Terminating engine");
        self.child.start_kill()?;
        Ok(self.child.wait().await?)
    }

    /// Stop tracking the engine, leaving it running
    ///
    /// The engine lives on until its device or working directory is torn
    /// down.
    #[must_use]
    pub fn detach(self) -> ProcessId {
        info!(pid = %self.pid, interface = %self.interface, "Engine detached");
        self.pid
    }
}

/// Launches `wireguard-go` (or a compatible engine) in the foreground with
/// the device passed by descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireguardGo {
    program: PathBuf,
    log_level: Option<String>,
}

impl Default for WireguardGo {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_ENGINE),
            log_level: None,
        }
    }
}

impl WireguardGo {
    /// Launcher for the given executable
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            log_level: None,
        }
    }

    /// Forward a log level to the engine
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Engine executable
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, interface: &InterfaceName, work_dir: &Path, tun_fd: RawFd) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(interface.as_str())
            .current_dir(work_dir)
            .env_clear()
            .env(FOREGROUND_ENV, "1")
            .env(TUN_FD_ENV, tun_fd.to_string())
            .stdin(Stdio::null());
        if let Some(level) = &self.log_level {
            cmd.env(LOG_LEVEL_ENV, level);
        }
        cmd
    }
}

impl EngineLauncher for WireguardGo {
    fn launch(
        &self,
        device: TunDevice,
        interface: &InterfaceName,
        work_dir: &Path,
    ) -> Result<TunnelProcessHandle> {
        let tun_fd = device.as_raw_fd();
        let mut cmd = self.command(interface, work_dir, tun_fd);

        // SAFETY: the hook only calls fcntl(2), which is async-signal-safe.
        unsafe {
            cmd.pre_exec(move || clear_cloexec(tun_fd));
        }

        debug!(
            program = %self.program.display(),
            interface = %interface,
            work_dir = %work_dir.display(),
            fd = tun_fd,
            "Spawning engine"
        );

        let spawned = cmd.spawn();
        // The engine holds its own copy now; ours is closed either way.
        drop(device);

        let child = spawned.map_err(|source| {
            warn!(program = %self.program.display(), error = %source, "Engine spawn failed");
            Error::ProcessSpawn {
                program: self.program.clone(),
                source,
            }
        })?;

        let handle = TunnelProcessHandle::new(child, interface.clone(), work_dir)?;
        info!(pid = %handle.pid(), interface = %interface, "Engine launched");
        Ok(handle)
    }
}

fn clear_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: plain fcntl(2) on a descriptor we own
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe_device(name: &str) -> (TunDevice, std::os::fd::OwnedFd) {
        let (read_end, write_end) = nix::unistd::pipe().unwrap();
        let device = TunDevice::from_parts(read_end, InterfaceName::new(name).unwrap(), 1420);
        (device, write_end)
    }

    #[test]
    fn test_default_launcher() {
        let launcher = WireguardGo::default();
        assert_eq!(launcher.program(), Path::new("wireguard-go"));
        assert_eq!(launcher.log_level, None);
    }

    #[test]
    fn test_command_environment() {
        let launcher = WireguardGo::new("/opt/wg/wireguard-go").with_log_level("debug");
        let name = InterfaceName::new("wg0").unwrap();
        let cmd = launcher.command(&name, Path::new("/tmp"), 7);
        let std_cmd = cmd.as_std();

        let envs: Vec<_> = std_cmd
            .get_envs()
            .map(|(k, v)| (k.to_string_lossy().into_owned(), v.map(|v| v.to_string_lossy().into_owned())))
            .collect();
        assert!(envs.contains(&("WG_PROCESS_FOREGROUND".to_string(), Some("1".to_string()))));
        assert!(envs.contains(&("WG_TUN_FD".to_string(), Some("7".to_string()))));
        assert!(envs.contains(&("LOG_LEVEL".to_string(), Some("debug".to_string()))));

        let args: Vec<_> = std_cmd.get_args().collect();
        assert_eq!(args, vec!["wg0"]);
        assert_eq!(std_cmd.get_current_dir(), Some(Path::new("/tmp")));
    }

    #[tokio::test]
    async fn test_spawn_failure_closes_device() {
        let (device, write_end) = pipe_device("wg0");
        let launcher = WireguardGo::new("/nonexistent/wireguard-go");
        let dir = tempfile::tempdir().unwrap();

        let err = launcher
            .launch(device, &InterfaceName::new("wg0").unwrap(), dir.path())
            .unwrap_err();
        assert!(matches!(err, Error::ProcessSpawn { .. }));

        // The read end is gone, so writing breaks the pipe
        assert_eq!(
            nix::unistd::write(&write_end, b"x"),
            Err(nix::errno::Errno::EPIPE)
        );
    }

    #[test]
    fn test_clear_cloexec() {
        let (read_end, _write_end) = nix::unistd::pipe().unwrap();
        let fd = read_end.as_raw_fd();
        // pipe() sets no flags; force FD_CLOEXEC first
        unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
        clear_cloexec(fd).unwrap();
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert_eq!(flags & libc::FD_CLOEXEC, 0);
    }
}
