//! Namespace identity and interface inspection through `/proc`

use std::fs;
use std::io;

use nix::errno::Errno;
use wgnetns_core::{Error, InterfaceName, ProcessId, Result};

use crate::config::NamespaceKind;

/// Namespace identities (`user:[4026531837]` style links) of one process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceInfo {
    /// User namespace ID
    pub user: String,
    /// Network namespace ID
    pub net: String,
}

impl NamespaceInfo {
    /// Read namespace IDs for a specific PID
    ///
    /// # Errors
    /// Returns [`Error::Namespace`] if the process does not exist or its
    /// namespaces cannot be inspected
    pub fn for_pid(pid: ProcessId) -> Result<Self> {
        Ok(Self {
            user: read_ns_link(NamespaceKind::User.path_for(pid))?,
            net: read_ns_link(NamespaceKind::Net.path_for(pid))?,
        })
    }

    /// Read namespace IDs of the calling process
    ///
    /// # Errors
    /// Returns error if `/proc/self/ns` cannot be read
    pub fn current() -> Result<Self> {
        Ok(Self {
            user: read_ns_link(NamespaceKind::User.path_for_self())?,
            net: read_ns_link(NamespaceKind::Net.path_for_self())?,
        })
    }

    /// Identity of one namespace kind
    #[must_use]
    pub fn get(&self, kind: NamespaceKind) -> &str {
        match kind {
            NamespaceKind::User => &self.user,
            NamespaceKind::Net => &self.net,
        }
    }
}

impl std::fmt::Display for NamespaceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "  USER:   {}", self.user)?;
        writeln!(f, "  NET:    {}", self.net)
    }
}

fn read_ns_link(path: std::path::PathBuf) -> Result<String> {
    fs::read_link(&path)
        .map(|p| p.to_string_lossy().into_owned())
        .map_err(|e| namespace_io_error(&format!("Failed to read {}", path.display()), &e))
}

pub(crate) fn namespace_io_error(context: &str, e: &io::Error) -> Error {
    Error::Namespace {
        message: format!("{context}: {e}"),
        errno: e.raw_os_error().map(Errno::from_raw),
    }
}

/// A process whose user and network namespaces are to be joined
///
/// Captures the namespace identities at construction so a later check can
/// tell whether the PID still refers to the same process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceTarget {
    pid: ProcessId,
    namespaces: NamespaceInfo,
}

impl NamespaceTarget {
    /// Capture the target's namespace identities
    ///
    /// # Errors
    /// Returns [`Error::Namespace`] if the process does not exist
    pub fn capture(pid: ProcessId) -> Result<Self> {
        let namespaces = NamespaceInfo::for_pid(pid)?;
        tracing::debug!(
            pid = %pid,
            user_ns = %namespaces.user,
            net_ns = %namespaces.net,
            "Captured namespace target"
        );
        Ok(Self { pid, namespaces })
    }

    /// Target PID
    #[must_use]
    pub const fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Namespace identities seen at capture time
    #[must_use]
    pub const fn namespaces(&self) -> &NamespaceInfo {
        &self.namespaces
    }

    /// Verify the PID still names a process in the captured namespaces
    ///
    /// # Errors
    /// Returns [`Error::Namespace`] with `ESRCH` if the process is gone or
    /// the PID was reused by a process elsewhere
    pub fn verify(&self) -> Result<()> {
        let now = NamespaceInfo::for_pid(self.pid)?;
        if now == self.namespaces {
            Ok(())
        } else {
            Err(Error::Namespace {
                message: format!("Process {} changed namespaces since capture", self.pid),
                errno: Some(Errno::ESRCH),
            })
        }
    }
}

/// Interfaces visible in the network namespace of `pid`
///
/// # Errors
/// Returns [`Error::Namespace`] if the process does not exist
pub fn interfaces_for_pid(pid: ProcessId) -> Result<Vec<String>> {
    let path = format!("/proc/{pid}/net/dev");
    let text = fs::read_to_string(&path)
        .map_err(|e| namespace_io_error(&format!("Failed to read {path}"), &e))?;
    Ok(parse_net_dev(&text))
}

/// Whether `name` exists in the network namespace of `pid`
///
/// # Errors
/// Returns [`Error::Namespace`] if the process does not exist
pub fn has_interface(pid: ProcessId, name: &InterfaceName) -> Result<bool> {
    Ok(interfaces_for_pid(pid)?
        .iter()
        .any(|iface| iface == name.as_str()))
}

/// `/proc/net/dev` has two header lines, then `name: counters...`
fn parse_net_dev(text: &str) -> Vec<String> {
    text.lines()
        .skip(2)
        .filter_map(|line| line.split_once(':'))
        .map(|(name, _)| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_namespaces() {
        let info = NamespaceInfo::current().unwrap();
        assert!(info.user.starts_with("user:["));
        assert!(info.net.starts_with("net:["));
    }

    #[test]
    fn test_self_matches_current() {
        let by_pid = NamespaceInfo::for_pid(ProcessId::current()).unwrap();
        let current = NamespaceInfo::current().unwrap();
        assert_eq!(by_pid, current);
    }

    #[test]
    fn test_missing_process() {
        let err = NamespaceTarget::capture(ProcessId::from_raw(999_999_999)).unwrap_err();
        assert!(matches!(err, Error::Namespace { .. }));
        assert_eq!(err.os_error(), Some(Errno::ENOENT as i32));
    }

    #[test]
    fn test_capture_and_verify_self() {
        let target = NamespaceTarget::capture(ProcessId::current()).unwrap();
        assert!(target.verify().is_ok());
    }

    #[test]
    fn test_parse_net_dev() {
        let text = "Inter-|   Receive                            |  Transmit\n \
                    face |bytes    packets errs drop fifo frame compressed multicast|bytes\n    \
                    lo:  123 4 0 0 0 0 0 0 123 4 0 0 0 0 0 0\n  \
                    wg0:    0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0\n";
        assert_eq!(parse_net_dev(text), vec!["lo", "wg0"]);
    }

    #[test]
    fn test_loopback_visible() {
        let ifaces = interfaces_for_pid(ProcessId::current()).unwrap();
        assert!(ifaces.iter().any(|i| i == "lo"));
    }
}
