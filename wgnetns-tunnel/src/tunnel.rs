//! The whole creation sequence, from namespace to configured tunnel

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use wgnetns_core::{
    ConfigSource, DEFAULT_MTU, InterfaceName, Lifecycle, ProcessId, Result, TunnelState,
    UapiConfig,
};
use wgnetns_namespace::{DeviceConfig, DeviceProvider, TunDeviceFactory};

use crate::engine::{DEFAULT_ENGINE, EngineLauncher, TunnelProcessHandle, WireguardGo};
use crate::supervisor::{ReadinessConfig, TunnelProcessSupervisor};
use crate::uapi::UapiClient;

/// Settings shared by every tunnel a builder creates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelOptions {
    /// Engine working directory; holds the control socket
    pub work_dir: PathBuf,
    /// Engine executable
    pub engine: PathBuf,
    /// Log level forwarded to the engine
    pub engine_log_level: Option<String>,
    /// Interface MTU
    pub mtu: u32,
    /// Keep the packet information header on the device
    pub packet_info: bool,
    /// Control socket wait
    pub readiness: ReadinessConfig,
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            engine: PathBuf::from(DEFAULT_ENGINE),
            engine_log_level: None,
            mtu: DEFAULT_MTU,
            packet_info: true,
            readiness: ReadinessConfig::default(),
        }
    }
}

impl TunnelOptions {
    /// Default options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working directory
    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Set the engine executable
    #[must_use]
    pub fn with_engine(mut self, program: impl Into<PathBuf>) -> Self {
        self.engine = program.into();
        self
    }

    /// Forward a log level to the engine
    #[must_use]
    pub fn with_engine_log_level(mut self, level: impl Into<String>) -> Self {
        self.engine_log_level = Some(level.into());
        self
    }

    /// Set the interface MTU
    #[must_use]
    pub const fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    /// Enable or disable the packet information header
    #[must_use]
    pub const fn with_packet_info(mut self, enable: bool) -> Self {
        self.packet_info = enable;
        self
    }

    /// Set the readiness wait
    #[must_use]
    pub const fn with_readiness(mut self, readiness: ReadinessConfig) -> Self {
        self.readiness = readiness;
        self
    }

    /// Device settings derived from these options
    #[must_use]
    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig::new()
            .with_mtu(self.mtu)
            .with_packet_info(self.packet_info)
    }

    /// Engine launcher derived from these options
    #[must_use]
    pub fn launcher(&self) -> WireguardGo {
        let launcher = WireguardGo::new(&self.engine);
        match &self.engine_log_level {
            Some(level) => launcher.with_log_level(level.clone()),
            None => launcher,
        }
    }
}

/// One tunnel to create
#[derive(Debug, Clone)]
pub struct TunnelRequest {
    /// Process whose namespaces receive the interface
    pub target: ProcessId,
    /// Interface name
    pub interface: InterfaceName,
    /// Engine working directory
    pub work_dir: PathBuf,
}

impl TunnelRequest {
    /// Request `interface` inside `target`, working in `work_dir`
    #[must_use]
    pub fn new(target: ProcessId, interface: InterfaceName, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            target,
            interface,
            work_dir: work_dir.into(),
        }
    }
}

/// A configured tunnel whose engine is running
#[derive(Debug)]
pub struct ReadyTunnel {
    engine: TunnelProcessHandle,
    transitions: Vec<(TunnelState, Duration)>,
}

impl ReadyTunnel {
    /// Interface name
    #[must_use]
    pub const fn interface(&self) -> &InterfaceName {
        self.engine.interface()
    }

    /// Engine control socket
    #[must_use]
    pub fn control_socket(&self) -> &Path {
        self.engine.control_socket()
    }

    /// Engine process id
    #[must_use]
    pub const fn engine_pid(&self) -> ProcessId {
        self.engine.pid()
    }

    /// States the request went through, with their offsets from the start
    #[must_use]
    pub fn transitions(&self) -> &[(TunnelState, Duration)] {
        &self.transitions
    }

    /// Client for further control requests
    #[must_use]
    pub fn client(&self) -> UapiClient {
        UapiClient::new(self.control_socket())
    }

    /// Leave the engine running on its own
    #[must_use]
    pub fn detach(self) -> ProcessId {
        self.engine.detach()
    }

    /// Stop the engine
    ///
    /// # Errors
    /// Returns error if the engine cannot be killed or reaped
    pub async fn shutdown(self) -> Result<()> {
        let socket = self.control_socket().to_path_buf();
        self.engine.terminate().await?;
        remove_socket(&socket);
        Ok(())
    }
}

/// Runs the creation sequence: device, engine, readiness, configuration
#[derive(Debug, Clone)]
pub struct TunnelBuilder<D, L> {
    devices: D,
    supervisor: TunnelProcessSupervisor<L>,
}

impl TunnelBuilder<TunDeviceFactory, WireguardGo> {
    /// Builder for real devices and the configured engine
    #[must_use]
    pub fn from_options(options: &TunnelOptions) -> Self {
        Self::new(
            TunDeviceFactory::new(options.device_config()),
            options.launcher(),
            options.readiness,
        )
    }
}

impl<D: DeviceProvider, L: EngineLauncher> TunnelBuilder<D, L> {
    /// Builder over any device provider and engine launcher
    #[must_use]
    pub const fn new(devices: D, launcher: L, readiness: ReadinessConfig) -> Self {
        Self {
            devices,
            supervisor: TunnelProcessSupervisor::new(launcher, readiness),
        }
    }

    /// Create and configure a tunnel
    ///
    /// The configuration is loaded before anything is created. If a step
    /// fails after the engine started, the engine is killed and its socket
    /// removed before the error is returned.
    ///
    /// # Errors
    /// Returns the error of the first failing step
    pub async fn create(
        &self,
        request: &TunnelRequest,
        source: &dyn ConfigSource,
    ) -> Result<ReadyTunnel> {
        let mut lifecycle = Lifecycle::new(request.interface.clone());
        info!(
            pid = %request.target,
            interface = %request.interface,
            work_dir = %request.work_dir.display(),
            "Creating tunnel"
        );

        match self.run(request, source, &mut lifecycle).await {
            Ok(engine) => Ok(ReadyTunnel {
                engine,
                transitions: lifecycle.transitions().to_vec(),
            }),
            Err(e) => {
                lifecycle.fail(&e);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        request: &TunnelRequest,
        source: &dyn ConfigSource,
        lifecycle: &mut Lifecycle,
    ) -> Result<TunnelProcessHandle> {
        let config = source.load()?;
        debug!(peers = config.peers.len(), public_key = %config.public_key(), "Configuration loaded");

        // The helper joins and creates in one go; both steps are done once
        // the device arrives.
        let device = self
            .devices
            .create_device(request.target, &request.interface)?;
        lifecycle.advance(TunnelState::NamespaceJoined)?;
        lifecycle.advance(TunnelState::DeviceCreated)?;

        let mut engine = self
            .supervisor
            .launch(device, &request.interface, &request.work_dir)
            .await?;
        lifecycle.advance(TunnelState::EngineLaunched)?;

        match self.configure(&mut engine, &config, lifecycle).await {
            Ok(()) => Ok(engine),
            Err(e) => {
                cleanup(engine).await;
                Err(e)
            }
        }
    }

    async fn configure(
        &self,
        engine: &mut TunnelProcessHandle,
        config: &UapiConfig,
        lifecycle: &mut Lifecycle,
    ) -> Result<()> {
        self.supervisor.wait_ready(engine).await?;
        lifecycle.advance(TunnelState::ControlSocketReady)?;

        // Scoped: the connection closes here on every path
        let mut conn = UapiClient::new(engine.control_socket()).connect().await?;
        conn.set_config(config).await?;
        drop(conn);

        lifecycle.advance(TunnelState::Configured)?;
        lifecycle.advance(TunnelState::Ready)
    }
}

/// Release an engine that never became usable
async fn cleanup(engine: TunnelProcessHandle) {
    let socket = engine.control_socket().to_path_buf();
    if let Err(e) = engine.terminate().await {
        warn!(error = %e, "Failed to terminate engine during cleanup");
    }
    remove_socket(&socket);
}

fn remove_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed control socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove control socket"),
    }
}
