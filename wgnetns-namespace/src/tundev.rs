//! Tunnel device creation inside another process's namespaces
//!
//! This module uses `unsafe` for fork(): joining a namespace cannot be
//! undone, so the join and the device creation happen in a short-lived child
//! that hands the open device back over a [`DescriptorChannel`] and exits.
//!
//! fork() only duplicates the calling thread. Call
//! [`TunDeviceFactory::create_in_namespace`] before the caller starts other
//! threads, or at least while none of them can hold the allocator lock.

#![allow(unsafe_code)]

use std::fs::OpenOptions;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::panic::AssertUnwindSafe;

use nix::errno::Errno;
use nix::sys::socket::{AddressFamily, SockFlag, SockType, socket};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use tracing::{debug, info, warn};
use wgnetns_core::{Error, InterfaceName, ProcessId, Result};

use crate::channel::DescriptorChannel;
use crate::config::DeviceConfig;
use crate::info::NamespaceTarget;
use crate::joiner::NamespaceJoiner;
use crate::sys::{IfReqFlags, set_mtu, tun_set_iff};

const TUN_CONTROL_PATH: &str = "/dev/net/tun";

/// Report header: stage byte + native-endian errno
const REPORT_HEADER: usize = 5;
const REPORT_MAX: usize = REPORT_HEADER + libc::IFNAMSIZ;

/// An open tunnel device
///
/// The descriptor stays valid wherever it travels, independent of the
/// namespace the interface lives in. Dropping the device closes it.
#[derive(Debug)]
pub struct TunDevice {
    fd: OwnedFd,
    name: InterfaceName,
    mtu: u32,
}

impl TunDevice {
    /// Assemble a device from an already-open descriptor
    #[must_use]
    pub const fn from_parts(fd: OwnedFd, name: InterfaceName, mtu: u32) -> Self {
        Self { fd, name, mtu }
    }

    /// Interface name assigned by the kernel
    #[must_use]
    pub const fn name(&self) -> &InterfaceName {
        &self.name
    }

    /// MTU set on the interface
    #[must_use]
    pub const fn mtu(&self) -> u32 {
        self.mtu
    }

    /// Give up the device, keeping only the descriptor
    #[must_use]
    pub fn into_fd(self) -> OwnedFd {
        self.fd
    }
}

impl AsFd for TunDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for TunDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Something that can produce a tunnel device inside a target's namespaces
pub trait DeviceProvider {
    /// Create interface `name` in the network namespace of `target`
    ///
    /// # Errors
    /// Returns [`Error::Namespace`], [`Error::DeviceCreation`] or
    /// [`Error::Handoff`] depending on which step failed
    fn create_device(&self, target: ProcessId, name: &InterfaceName) -> Result<TunDevice>;
}

/// Where the helper child stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Stage {
    Created = 0,
    Namespace = 1,
    Open = 2,
    Device = 3,
    Mtu = 4,
}

impl Stage {
    const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Created),
            1 => Some(Self::Namespace),
            2 => Some(Self::Open),
            3 => Some(Self::Device),
            4 => Some(Self::Mtu),
            _ => None,
        }
    }
}

/// What the helper child tells the parent, in-band
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChildReport {
    stage: Stage,
    errno: i32,
    name: String,
}

impl ChildReport {
    fn created(name: String) -> Self {
        Self {
            stage: Stage::Created,
            errno: 0,
            name,
        }
    }

    fn failed(stage: Stage, errno: i32) -> Self {
        Self {
            stage,
            errno,
            name: String::new(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(REPORT_MAX);
        out.push(self.stage as u8);
        out.extend_from_slice(&self.errno.to_ne_bytes());
        out.extend_from_slice(self.name.as_bytes());
        out
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < REPORT_HEADER {
            return None;
        }
        let stage = Stage::from_byte(bytes[0])?;
        let errno = i32::from_ne_bytes(bytes[1..REPORT_HEADER].try_into().ok()?);
        let name = String::from_utf8(bytes[REPORT_HEADER..].to_vec()).ok()?;
        Some(Self { stage, errno, name })
    }

    /// Translate a failure report into the caller-facing error
    fn into_error(self, target: ProcessId, requested: &InterfaceName) -> Error {
        let errno = (self.errno != 0).then(|| Errno::from_raw(self.errno));
        let cause = errno.map_or_else(|| "unknown error".to_string(), |e| e.to_string());
        match self.stage {
            Stage::Namespace => Error::Namespace {
                message: format!("failed to join namespaces of process {target}: {cause}"),
                errno,
            },
            Stage::Open => Error::DeviceCreation {
                message: format!("failed to open {TUN_CONTROL_PATH}: {cause}"),
                errno,
            },
            Stage::Device => Error::DeviceCreation {
                message: format!("TUNSETIFF for {requested} failed: {cause}"),
                errno,
            },
            Stage::Mtu => Error::DeviceCreation {
                message: format!("setting MTU on {requested} failed: {cause}"),
                errno,
            },
            Stage::Created => Error::Handoff {
                message: "helper reported success without a descriptor".to_string(),
            },
        }
    }
}

/// Creates tunnel devices in other processes' namespaces, one disposable
/// helper process per device
#[derive(Debug, Clone, Default)]
pub struct TunDeviceFactory {
    config: DeviceConfig,
}

impl TunDeviceFactory {
    /// Create a factory with the given device settings
    #[must_use]
    pub const fn new(config: DeviceConfig) -> Self {
        Self { config }
    }

    /// Create a factory with default settings (MTU 1420)
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Device settings
    #[must_use]
    pub const fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Create interface `name` inside the user and network namespaces of
    /// `target` and return its open descriptor
    ///
    /// # Errors
    /// - [`Error::Namespace`] if the target is gone or cannot be joined
    /// - [`Error::DeviceCreation`] if the interface cannot be created or
    ///   its MTU cannot be set (for example the name is already taken)
    /// - [`Error::Handoff`] if the helper died before sending the device
    pub fn create_in_namespace(
        &self,
        target: ProcessId,
        name: &InterfaceName,
    ) -> Result<TunDevice> {
        let target = NamespaceTarget::capture(target)?;
        let (ours, theirs) = DescriptorChannel::pair()?;

        info!(
            pid = %target.pid(),
            interface = %name,
            mtu = self.config.mtu,
            "Creating tunnel device in target namespaces"
        );

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                drop(ours);
                let code = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    child_process(&target, name, &self.config, &theirs)
                }))
                .unwrap_or(2);
                // SAFETY: _exit skips atexit handlers and stdio flushing that
                // belong to the parent's copy of this address space.
                unsafe { libc::_exit(code) }
            }
            Ok(ForkResult::Parent { child }) => {
                drop(theirs);
                debug!(helper = %child, "Waiting for device descriptor");
                let received = ours.receive(REPORT_MAX);
                let status = reap(child);
                self.finish(received, &status, target.pid(), name)
            }
            Err(errno) => Err(Error::DeviceCreation {
                message: format!("fork failed: {errno}"),
                errno: Some(errno),
            }),
        }
    }

    fn finish(
        &self,
        received: Result<Option<crate::channel::Received>>,
        status: &str,
        target: ProcessId,
        requested: &InterfaceName,
    ) -> Result<TunDevice> {
        let Some(received) = received? else {
            warn!(status, "Helper exited without handing off a device");
            return Err(Error::Handoff {
                message: format!("helper process {status} before sending the device"),
            });
        };

        let report = ChildReport::decode(&received.payload).ok_or_else(|| Error::Handoff {
            message: "helper sent a malformed report".to_string(),
        })?;

        match (report.stage, received.fd) {
            (Stage::Created, Some(fd)) => {
                let name = InterfaceName::new(report.name)?;
                info!(
                    interface = %name,
                    fd = fd.as_raw_fd(),
                    "Tunnel device received from helper"
                );
                Ok(TunDevice::from_parts(fd, name, self.config.mtu))
            }
            // A stray descriptor on a failure report is dropped (closed) here.
            (_, _) => Err(report.into_error(target, requested)),
        }
    }
}

impl DeviceProvider for TunDeviceFactory {
    fn create_device(&self, target: ProcessId, name: &InterfaceName) -> Result<TunDevice> {
        self.create_in_namespace(target, name)
    }
}

/// Helper child: join, create, report. Never logs and never returns to
/// the caller's code; the exit code only matters for the parent's log.
fn child_process(
    target: &NamespaceTarget,
    name: &InterfaceName,
    config: &DeviceConfig,
    channel: &DescriptorChannel,
) -> i32 {
    match build_device(target, name, config) {
        Ok((fd, assigned)) => {
            let report = ChildReport::created(assigned);
            let sent = channel.send(&report.encode(), Some(fd.as_fd()));
            drop(fd);
            i32::from(sent.is_err())
        }
        Err(report) => {
            let _ = channel.send(&report.encode(), None);
            1
        }
    }
}

fn build_device(
    target: &NamespaceTarget,
    name: &InterfaceName,
    config: &DeviceConfig,
) -> std::result::Result<(OwnedFd, String), ChildReport> {
    let os_error = |stage: Stage| move |e: Error| ChildReport::failed(stage, e.os_error().unwrap_or(0));
    let errno = |stage: Stage| move |e: Errno| ChildReport::failed(stage, e as i32);

    target.verify().map_err(os_error(Stage::Namespace))?;
    NamespaceJoiner::new(target.pid())
        .join_all()
        .map_err(os_error(Stage::Namespace))?;

    let tun = OpenOptions::new()
        .read(true)
        .write(true)
        .open(TUN_CONTROL_PATH)
        .map_err(|e| ChildReport::failed(Stage::Open, e.raw_os_error().unwrap_or(0)))?;

    let mut req = IfReqFlags::new(name, config.tun_flags());
    let assigned = tun_set_iff(tun.as_fd(), &mut req).map_err(errno(Stage::Device))?;

    let sock = socket(
        AddressFamily::Inet,
        SockType::Datagram,
        SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(errno(Stage::Mtu))?;
    set_mtu(sock.as_fd(), &assigned, config.mtu).map_err(errno(Stage::Mtu))?;

    Ok((OwnedFd::from(tun), assigned))
}

/// Wait for the helper, describing how it ended
fn reap(child: Pid) -> String {
    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, code)) => return format!("exited with code {code}"),
            Ok(WaitStatus::Signaled(_, signal, _)) => return format!("was killed by {signal:?}"),
            Ok(_) | Err(Errno::EINTR) => {}
            Err(errno) => {
                warn!(helper = %child, error = %errno, "Failed to reap helper");
                return format!("could not be reaped ({errno})");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_round_trip() {
        let created = ChildReport::created("wg0".to_string());
        assert_eq!(ChildReport::decode(&created.encode()), Some(created));

        let failed = ChildReport::failed(Stage::Device, Errno::EBUSY as i32);
        assert_eq!(ChildReport::decode(&failed.encode()), Some(failed));
    }

    #[test]
    fn test_report_rejects_garbage() {
        assert_eq!(ChildReport::decode(&[0, 1]), None);
        assert_eq!(ChildReport::decode(&[9, 0, 0, 0, 0]), None);
    }

    #[test]
    fn test_failure_stage_maps_to_error_kind() {
        let pid = ProcessId::from_raw(77);
        let name = InterfaceName::new("wg0").unwrap();

        let err = ChildReport::failed(Stage::Namespace, Errno::EPERM as i32).into_error(pid, &name);
        assert!(matches!(err, Error::Namespace { .. }));
        assert_eq!(err.os_error(), Some(Errno::EPERM as i32));

        let err = ChildReport::failed(Stage::Device, Errno::EBUSY as i32).into_error(pid, &name);
        assert!(matches!(err, Error::DeviceCreation { .. }));
        assert_eq!(err.os_error(), Some(Errno::EBUSY as i32));

        let err = ChildReport::failed(Stage::Mtu, Errno::EINVAL as i32).into_error(pid, &name);
        assert!(err.to_string().contains("MTU"));
    }

    #[test]
    fn test_channel_closed_is_handoff_error() {
        let factory = TunDeviceFactory::with_defaults();
        let name = InterfaceName::new("wg0").unwrap();
        let err = factory
            .finish(Ok(None), "exited with code 101", ProcessId::from_raw(1), &name)
            .unwrap_err();
        assert!(matches!(err, Error::Handoff { .. }));
    }

    #[test]
    fn test_failure_report_closes_stray_descriptor() {
        let factory = TunDeviceFactory::with_defaults();
        let name = InterfaceName::new("wg0").unwrap();
        let (read_end, write_end) = nix::unistd::pipe().unwrap();

        let received = crate::channel::Received {
            payload: ChildReport::failed(Stage::Device, Errno::EBUSY as i32).encode(),
            fd: Some(read_end),
        };
        let err = factory
            .finish(Ok(Some(received)), "exited with code 1", ProcessId::from_raw(1), &name)
            .unwrap_err();
        assert!(matches!(err, Error::DeviceCreation { .. }));

        // No reader left: the stray read end was closed
        let write = nix::unistd::write(&write_end, b"x");
        assert_eq!(write, Err(Errno::EPIPE));
    }

    #[test]
    fn test_nonexistent_target_fails_before_fork() {
        let factory = TunDeviceFactory::with_defaults();
        let name = InterfaceName::new("wg0").unwrap();
        let err = factory
            .create_in_namespace(ProcessId::from_raw(999_999_999), &name)
            .unwrap_err();
        assert!(matches!(err, Error::Namespace { .. }));
    }
}
