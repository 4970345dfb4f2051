//! Joining another process's namespaces with setns(2)
//!
//! Joining is one-way for the calling process: there is no way back to the
//! namespaces it started in. Only ever call this from a disposable child.

use std::fs::File;

use nix::errno::Errno;
use nix::sched::setns;
use wgnetns_core::{Error, ProcessId, Result};

use crate::config::NamespaceKind;
use crate::info::{NamespaceInfo, namespace_io_error};

/// Switch the calling process into `kind` namespace of `pid`
///
/// # Errors
/// Returns [`Error::Namespace`] carrying the OS error if the target is gone,
/// the caller lacks permission, or the kernel rejects the request
pub fn join(pid: ProcessId, kind: NamespaceKind) -> Result<()> {
    let path = kind.path_for(pid);
    let ns = File::open(&path)
        .map_err(|e| namespace_io_error(&format!("Failed to open {}", path.display()), &e))?;

    setns(&ns, kind.clone_flag()).map_err(|errno| Error::Namespace {
        message: format!("setns({kind}) into process {pid} failed: {errno}"),
        errno: Some(errno),
    })
}

/// Joins the user and then the network namespace of one target
///
/// Remembers what has been joined so the network namespace can never be
/// entered ahead of its owning user namespace.
#[derive(Debug)]
pub struct NamespaceJoiner {
    target: ProcessId,
    user_joined: bool,
    net_joined: bool,
}

impl NamespaceJoiner {
    /// Prepare to join the namespaces of `target`
    #[must_use]
    pub const fn new(target: ProcessId) -> Self {
        Self {
            target,
            user_joined: false,
            net_joined: false,
        }
    }

    /// Target process
    #[must_use]
    pub const fn target(&self) -> ProcessId {
        self.target
    }

    /// Whether the given namespace has been joined (or was already shared)
    #[must_use]
    pub const fn has_joined(&self, kind: NamespaceKind) -> bool {
        match kind {
            NamespaceKind::User => self.user_joined,
            NamespaceKind::Net => self.net_joined,
        }
    }

    /// Join one namespace of the target
    ///
    /// A namespace the caller already shares with the target is not
    /// re-entered; setns(2) on one's own user namespace fails with `EINVAL`.
    ///
    /// # Errors
    /// Returns [`Error::Namespace`] if the network namespace is requested
    /// before the user namespace, or if the join itself fails
    pub fn join(&mut self, kind: NamespaceKind) -> Result<()> {
        if kind == NamespaceKind::Net && !self.user_joined {
            return Err(Error::Namespace {
                message: "network namespace must be joined after the user namespace".to_string(),
                errno: Some(Errno::EPERM),
            });
        }

        if self.has_joined(kind) {
            return Ok(());
        }

        let ours = NamespaceInfo::current()?;
        let theirs = NamespaceInfo::for_pid(self.target)?;
        if ours.get(kind) != theirs.get(kind) {
            join(self.target, kind)?;
        }

        match kind {
            NamespaceKind::User => self.user_joined = true,
            NamespaceKind::Net => self.net_joined = true,
        }
        Ok(())
    }

    /// Join every namespace in the required order
    ///
    /// # Errors
    /// Returns the first join failure
    pub fn join_all(&mut self) -> Result<()> {
        for kind in NamespaceKind::JOIN_ORDER {
            self.join(kind)?;
        }
        Ok(())
    }
}
