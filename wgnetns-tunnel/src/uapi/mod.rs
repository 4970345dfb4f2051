//! Control protocol client for the tunnel engine
//!
//! The engine listens on `<work_dir>/<interface>.sock` and speaks the
//! cross-platform WireGuard userspace API: plain-text `key=value` requests
//! and responses.

pub mod client;
pub mod protocol;

pub use client::{UapiClient, UapiConnection};
pub use protocol::{DeviceState, Operation, PeerStats};
