//! Tunnel devices inside another process's namespaces
//!
//! This crate creates a tunnel interface that lives in the user and network
//! namespace of an arbitrary target process while handing its open
//! descriptor back to the caller:
//! - Namespace joining - setns(2) into user then network namespace
//! - Descriptor channel - `SCM_RIGHTS` transfer over a socket pair
//! - Device factory - a disposable helper per device, so the caller's own
//!   namespaces never change

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod channel;
pub mod config;
pub mod info;
pub mod joiner;
mod sys;
pub mod tundev;

pub use channel::{DescriptorChannel, Received};
pub use config::{DeviceConfig, NamespaceKind};
pub use info::{NamespaceInfo, NamespaceTarget, has_interface, interfaces_for_pid};
pub use joiner::NamespaceJoiner;
pub use tundev::{DeviceProvider, TunDevice, TunDeviceFactory};
