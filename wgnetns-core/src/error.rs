//! Error types for wgnetns

use std::path::PathBuf;
use std::time::Duration;

use nix::errno::Errno;
use thiserror::Error;

/// wgnetns error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Joining a namespace failed: target gone, permission denied,
    /// or user/network ordering violated
    #[error("Namespace error: {message}")]
    Namespace {
        /// Error message
        message: String,
        /// Underlying OS error, if the failure came from a syscall
        errno: Option<Errno>,
    },

    /// The tunnel device could not be created or configured
    #[error("Device creation error: {message}")]
    DeviceCreation {
        /// Error message
        message: String,
        /// Underlying OS error, if the failure came from a syscall
        errno: Option<Errno>,
    },

    /// The descriptor channel closed before a device descriptor arrived
    #[error("Descriptor handoff failed: {message}")]
    Handoff {
        /// Error message
        message: String,
    },

    /// The tunnel engine could not be spawned
    #[error("Failed to spawn {}: {source}", program.display())]
    ProcessSpawn {
        /// Program that failed to start
        program: PathBuf,
        /// Spawn error
        #[source]
        source: std::io::Error,
    },

    /// The engine answered a control request with a non-zero errno
    #[error("Protocol error: {operation} request failed with errno={errno}")]
    Protocol {
        /// Request kind (`set` or `get`)
        operation: &'static str,
        /// Status code returned by the engine
        errno: i32,
    },

    /// The engine's reply could not be understood
    #[error("Invalid control response: {message}")]
    InvalidResponse {
        /// Error message
        message: String,
    },

    /// The control socket did not appear in time
    #[error("Control socket {} not ready after {waited:?}", path.display())]
    ReadinessTimeout {
        /// Expected socket path
        path: PathBuf,
        /// How long we waited
        waited: Duration,
    },

    /// The engine exited before its control socket appeared
    #[error("Tunnel engine exited before becoming ready: {status}")]
    EngineExited {
        /// Exit status description
        status: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// System error from nix
    #[error("System error: {0}")]
    System(#[from] nix::Error),
}

impl Error {
    /// Build an [`Error::InvalidConfig`] from anything displayable
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// OS error code carried by this error, if any
    #[must_use]
    pub fn os_error(&self) -> Option<i32> {
        match self {
            Self::Namespace { errno, .. } | Self::DeviceCreation { errno, .. } => {
                errno.map(|e| e as i32)
            }
            Self::System(errno) => Some(*errno as i32),
            Self::Io(e) | Self::ProcessSpawn { source: e, .. } => e.raw_os_error(),
            Self::Protocol { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}

/// Result type alias for wgnetns operations
pub type Result<T> = std::result::Result<T, Error>;
