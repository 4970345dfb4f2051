//! Core type definitions with strong typing and validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Network interface name with kernel-compatible validation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceName(String);

impl InterfaceName {
    /// Maximum length for interface names (`IFNAMSIZ` minus the NUL)
    pub const MAX_LENGTH: usize = 15;

    /// Create a new `InterfaceName` with validation
    ///
    /// # Errors
    /// Returns error if the name is empty, too long, `.`/`..`, or contains
    /// `/`, whitespace, `:` or NUL
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_config("Interface name cannot be empty"));
        }

        if name.len() > Self::MAX_LENGTH {
            return Err(Error::invalid_config(format!(
                "Interface name too long (max {} bytes)",
                Self::MAX_LENGTH
            )));
        }

        if name == "." || name == ".." {
            return Err(Error::invalid_config(format!(
                "Invalid interface name: {name}"
            )));
        }

        if name
            .chars()
            .any(|c| c == '/' || c == ':' || c == '\0' || c.is_whitespace())
        {
            return Err(Error::invalid_config(
                "Interface name cannot contain '/', ':', NUL or whitespace",
            ));
        }

        Ok(())
    }

    /// Get the interface name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the control socket the engine creates for this interface
    #[must_use]
    pub fn socket_file_name(&self) -> String {
        format!("{}.sock", self.0)
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InterfaceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for InterfaceName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<InterfaceName> for String {
    fn from(name: InterfaceName) -> Self {
        name.0
    }
}

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ProcessId(i32);

impl ProcessId {
    /// Create from raw PID
    #[must_use]
    pub const fn from_raw(pid: i32) -> Self {
        Self(pid)
    }

    /// Create from raw PID, rejecting values that can never name a process
    ///
    /// # Errors
    /// Returns error if `pid` is zero or negative
    pub fn new(pid: i32) -> Result<Self> {
        if pid <= 0 {
            return Err(Error::invalid_config(format!(
                "Process ID must be positive, got {pid}"
            )));
        }
        Ok(Self(pid))
    }

    /// Get the current process ID
    #[must_use]
    pub fn current() -> Self {
        #[allow(clippy::cast_possible_wrap)]
        Self(std::process::id() as i32)
    }

    /// Convert to `nix::unistd::Pid`
    #[must_use]
    pub const fn as_nix_pid(self) -> nix::unistd::Pid {
        nix::unistd::Pid::from_raw(self.0)
    }

    /// Get raw PID value
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProcessId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let pid = s
            .trim()
            .parse::<i32>()
            .map_err(|e| Error::invalid_config(format!("Invalid process ID {s:?}: {e}")))?;
        Self::new(pid)
    }
}

impl From<nix::unistd::Pid> for ProcessId {
    fn from(pid: nix::unistd::Pid) -> Self {
        Self(pid.as_raw())
    }
}

impl From<ProcessId> for nix::unistd::Pid {
    fn from(pid: ProcessId) -> Self {
        nix::unistd::Pid::from_raw(pid.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_name_validation() {
        assert!(InterfaceName::new("wg0").is_ok());
        assert!(InterfaceName::new("a".repeat(15)).is_ok());
        assert!(InterfaceName::new("").is_err());
        assert!(InterfaceName::new("a".repeat(16)).is_err());
        assert!(InterfaceName::new("wg 0").is_err());
        assert!(InterfaceName::new("wg/0").is_err());
        assert!(InterfaceName::new("..").is_err());
    }

    #[test]
    fn test_interface_name_socket_file() {
        let name = InterfaceName::new("wg.0").unwrap();
        assert_eq!(name.socket_file_name(), "wg.0.sock");
    }

    #[test]
    fn test_interface_name_serde() {
        let name = InterfaceName::new("wg0").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"wg0\"");
        let back: InterfaceName = serde_json::from_str(&json).unwrap();
        assert_eq!(name, back);
        assert!(serde_json::from_str::<InterfaceName>("\"\"").is_err());
    }

    #[test]
    fn test_process_id() {
        let pid = ProcessId::from_raw(123);
        assert_eq!(pid.as_raw(), 123);

        let nix_pid = pid.as_nix_pid();
        assert_eq!(nix_pid.as_raw(), 123);
    }

    #[test]
    fn test_process_id_parse() {
        assert_eq!("42".parse::<ProcessId>().unwrap().as_raw(), 42);
        assert!("0".parse::<ProcessId>().is_err());
        assert!("-7".parse::<ProcessId>().is_err());
        assert!("abc".parse::<ProcessId>().is_err());
    }
}
