//! wgnetns Core - Foundation types, errors, and configuration model
//!
//! This crate provides the abstractions shared by the namespace, tunnel and
//! CLI crates: the error taxonomy, validated identifiers, WireGuard keys, the
//! device configuration consumed by the control protocol, and the state
//! machine that a tunnel-creation request walks through.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod key;
pub mod state;
pub mod types;
pub mod wgconf;

pub use config::{ConfigSource, IpPrefix, Peer, UapiConfig};
pub use error::{Error, Result};
pub use key::{Key, PrivateKey};
pub use state::{Lifecycle, TunnelState};
pub use types::{InterfaceName, ProcessId};
pub use wgconf::WgConfFile;

/// MTU assigned to newly created tunnel interfaces.
///
/// Leaves room for the WireGuard encapsulation overhead on a 1500 byte link.
pub const DEFAULT_MTU: u32 = 1420;
