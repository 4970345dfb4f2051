//! Tunnel engine supervision and configuration
//!
//! This crate turns a namespaced tunnel device into a configured WireGuard
//! tunnel:
//! - Engine launch - the external engine inherits the device descriptor
//! - Readiness - bounded wait for the engine's control socket
//! - UAPI - the key/value control protocol spoken over that socket
//! - Orchestration - the whole creation sequence with cleanup on failure

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod engine;
pub mod supervisor;
pub mod tunnel;
pub mod uapi;

pub use engine::{EngineLauncher, TunnelProcessHandle, WireguardGo};
pub use supervisor::{ReadinessConfig, TunnelProcessSupervisor, control_socket_path};
pub use tunnel::{ReadyTunnel, TunnelBuilder, TunnelOptions, TunnelRequest};
pub use uapi::{DeviceState, PeerStats, UapiClient, UapiConnection};
