//! Tunnel creation lifecycle with structured tracing
//!
//! A creation request walks forward through [`TunnelState`] exactly once.
//! [`Lifecycle`] enforces the ordering and records when each step completed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::{Error, InterfaceName, Result};

/// Steps of a tunnel-creation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    /// Nothing acquired yet
    Idle,
    /// The helper process has entered the target namespaces
    NamespaceJoined,
    /// The tunnel device descriptor is held by the caller
    DeviceCreated,
    /// The engine process has been spawned with the device
    EngineLaunched,
    /// The engine's control socket exists
    ControlSocketReady,
    /// The configuration has been accepted by the engine
    Configured,
    /// The tunnel is up; terminal
    Ready,
    /// Some step failed; terminal
    Failed,
}

impl TunnelState {
    /// Whether no further transition is possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }

    /// The state that follows this one on the success path
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::NamespaceJoined),
            Self::NamespaceJoined => Some(Self::DeviceCreated),
            Self::DeviceCreated => Some(Self::EngineLaunched),
            Self::EngineLaunched => Some(Self::ControlSocketReady),
            Self::ControlSocketReady => Some(Self::Configured),
            Self::Configured => Some(Self::Ready),
            Self::Ready | Self::Failed => None,
        }
    }

    /// Lowercase name used in logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::NamespaceJoined => "namespace_joined",
            Self::DeviceCreated => "device_created",
            Self::EngineLaunched => "engine_launched",
            Self::ControlSocketReady => "control_socket_ready",
            Self::Configured => "configured",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forward-only state tracker for one creation request
#[derive(Debug)]
pub struct Lifecycle {
    interface: InterfaceName,
    state: TunnelState,
    started: Instant,
    transitions: Vec<(TunnelState, Duration)>,
}

impl Lifecycle {
    /// Start tracking a request in [`TunnelState::Idle`]
    #[must_use]
    pub fn new(interface: InterfaceName) -> Self {
        Self {
            interface,
            state: TunnelState::Idle,
            started: Instant::now(),
            transitions: Vec::new(),
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> TunnelState {
        self.state
    }

    /// States entered so far, with the time since the request started
    #[must_use]
    pub fn transitions(&self) -> &[(TunnelState, Duration)] {
        &self.transitions
    }

    /// Move to `next`, which must be the immediate successor of the
    /// current state
    ///
    /// # Errors
    /// Returns error if the transition skips or revisits a state, or the
    /// lifecycle already ended
    pub fn advance(&mut self, next: TunnelState) -> Result<()> {
        if next == TunnelState::Failed || self.state.next() != Some(next) {
            return Err(Error::invalid_config(format!(
                "Illegal tunnel state transition {} -> {next}",
                self.state
            )));
        }

        let elapsed = self.started.elapsed();
        tracing::info!(
            interface = %self.interface,
            from = %self.state,
            to = %next,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "Tunnel state changed"
        );

        self.state = next;
        self.transitions.push((next, elapsed));
        Ok(())
    }

    /// Record a failure. Has no effect once a terminal state is reached.
    pub fn fail(&mut self, error: &Error) {
        if self.state.is_terminal() {
            return;
        }

        tracing::error!(
            interface = %self.interface,
            state = %self.state,
            error = %error,
            "Tunnel creation failed"
        );

        self.transitions
            .push((TunnelState::Failed, self.started.elapsed()));
        self.state = TunnelState::Failed;
    }
}
