//! Namespace kinds and device creation settings

use nix::sched::CloneFlags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use wgnetns_core::{DEFAULT_MTU, ProcessId};

/// Namespace kinds this crate can join
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    /// User namespace (UID/GID mapping, capabilities)
    User,
    /// Network namespace (interfaces, routes, sockets)
    Net,
}

impl NamespaceKind {
    /// Join order required by the kernel: the user namespace grants the
    /// capabilities needed to enter the network namespace it owns
    pub const JOIN_ORDER: [Self; 2] = [Self::User, Self::Net];

    /// Name of the entry under `/proc/<pid>/ns`
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Net => "net",
        }
    }

    /// Flag passed to setns(2) to check the descriptor's kind
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::User => CloneFlags::CLONE_NEWUSER,
            Self::Net => CloneFlags::CLONE_NEWNET,
        }
    }

    /// Path of this namespace for a given process
    #[must_use]
    pub fn path_for(self, pid: ProcessId) -> PathBuf {
        PathBuf::from(format!("/proc/{pid}/ns/{}", self.proc_name()))
    }

    /// Path of this namespace for the calling process
    #[must_use]
    pub fn path_for_self(self) -> PathBuf {
        PathBuf::from(format!("/proc/self/ns/{}", self.proc_name()))
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proc_name())
    }
}

/// Settings applied to a freshly created tunnel device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Interface MTU
    pub mtu: u32,

    /// Keep the 4-byte packet information header on reads and writes
    /// (that is, do not request `IFF_NO_PI`)
    pub packet_info: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            packet_info: true,
        }
    }
}

impl DeviceConfig {
    /// Create the default device configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the MTU
    #[must_use]
    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    /// Enable or disable the packet information header
    #[must_use]
    pub fn with_packet_info(mut self, enable: bool) -> Self {
        self.packet_info = enable;
        self
    }

    /// Flags for the TUNSETIFF request
    #[must_use]
    pub fn tun_flags(&self) -> libc::c_short {
        // IFF_TUN and IFF_NO_PI both fit in a short
        #[allow(clippy::cast_possible_truncation)]
        let mut flags = libc::IFF_TUN as libc::c_short;
        if !self.packet_info {
            #[allow(clippy::cast_possible_truncation)]
            {
                flags |= libc::IFF_NO_PI as libc::c_short;
            }
        }
        flags
    }
}
