//! Engine supervision: launch, then wait for the control socket

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use wgnetns_core::{Error, InterfaceName, Result};
use wgnetns_namespace::TunDevice;

use crate::engine::{EngineLauncher, TunnelProcessHandle};

/// Default interval between socket existence checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Default bound on the readiness wait
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Control socket location for `interface` in `work_dir`
#[must_use]
pub fn control_socket_path(work_dir: &Path, interface: &InterfaceName) -> PathBuf {
    work_dir.join(interface.socket_file_name())
}

/// How to wait for the control socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Sleep between existence checks
    pub poll_interval: Duration,
    /// Give up after this long; `None` waits as long as the engine lives
    pub timeout: Option<Duration>,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: Some(DEFAULT_READY_TIMEOUT),
        }
    }
}

impl ReadinessConfig {
    /// Set the poll interval
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the timeout (`None` for unbounded)
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Poll until `path` exists
///
/// Returns how long the wait took. When `engine` is given, an engine exit
/// ends the wait early.
///
/// # Errors
/// - [`Error::ReadinessTimeout`] if the bound passes first
/// - [`Error::EngineExited`] if the engine stops first
pub async fn wait_for_socket(
    path: &Path,
    config: &ReadinessConfig,
    mut engine: Option<&mut TunnelProcessHandle>,
) -> Result<Duration> {
    let started = Instant::now();
    loop {
        // Plain std::fs: tokio::fs would start blocking-pool threads, and
        // later fork()s must happen in a single-threaded process.
        if path.try_exists()? {
            let waited = started.elapsed();
            debug!(path = %path.display(), ?waited, "Control socket present");
            return Ok(waited);
        }

        if let Some(handle) = engine.as_deref_mut()
            && let Some(status) = handle.try_status()?
        {
            warn!(pid = %handle.pid(), %status, "Engine exited while starting");
            return Err(Error::EngineExited {
                status: status.to_string(),
            });
        }

        let waited = started.elapsed();
        if let Some(limit) = config.timeout
            && waited >= limit
        {
            warn!(path = %path.display(), ?waited, "Control socket did not appear");
            return Err(Error::ReadinessTimeout {
                path: path.to_path_buf(),
                waited,
            });
        }

        tokio::time::sleep(config.poll_interval).await;
    }
}

/// Starts engines and waits for them to accept control connections
#[derive(Debug, Clone, Default)]
pub struct TunnelProcessSupervisor<L> {
    launcher: L,
    readiness: ReadinessConfig,
}

impl<L: EngineLauncher> TunnelProcessSupervisor<L> {
    /// Create a supervisor around `launcher`
    #[must_use]
    pub const fn new(launcher: L, readiness: ReadinessConfig) -> Self {
        Self {
            launcher,
            readiness,
        }
    }

    /// Readiness settings
    #[must_use]
    pub const fn readiness(&self) -> &ReadinessConfig {
        &self.readiness
    }

    /// Launch the engine for `interface` on `device`
    ///
    /// A leftover socket file from an engine that is gone is removed first,
    /// otherwise the readiness check would succeed immediately.
    ///
    /// # Errors
    /// - [`Error::InvalidConfig`] if a live engine already serves the socket
    /// - [`Error::ProcessSpawn`] if the engine cannot be started (the device
    ///   is closed)
    pub async fn launch(
        &self,
        device: TunDevice,
        interface: &InterfaceName,
        work_dir: &Path,
    ) -> Result<TunnelProcessHandle> {
        let socket = control_socket_path(work_dir, interface);
        clear_stale_socket(&socket).await?;
        self.launcher.launch(device, interface, work_dir)
    }

    /// Wait until the engine's control socket exists
    ///
    /// # Errors
    /// Returns [`Error::ReadinessTimeout`] or [`Error::EngineExited`]
    pub async fn wait_ready(&self, handle: &mut TunnelProcessHandle) -> Result<Duration> {
        let path = handle.control_socket().to_path_buf();
        let waited = wait_for_socket(&path, &self.readiness, Some(handle)).await?;
        info!(path = %path.display(), ?waited, "Control socket ready");
        Ok(waited)
    }
}

async fn clear_stale_socket(path: &Path) -> Result<()> {
    if !path.try_exists()? {
        return Ok(());
    }
    if tokio::net::UnixStream::connect(path).await.is_ok() {
        return Err(Error::invalid_config(format!(
            "{} is served by a running engine",
            path.display()
        )));
    }
    debug!(path = %path.display(), "Removing stale control socket");
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
