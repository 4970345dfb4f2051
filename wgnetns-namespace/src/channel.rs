//! Descriptor passing between processes via `SCM_RIGHTS`
//!
//! A descriptor number means nothing outside the process that owns it, so
//! the device is moved as ancillary data over a connected `AF_UNIX`
//! `SOCK_SEQPACKET` pair. The kernel installs a new descriptor in the
//! receiver's table; the sender's copy stays its own to close.

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::sys::socket::{
    AddressFamily, ControlMessage, ControlMessageOwned, MsgFlags, SockFlag, SockType, recvmsg,
    sendmsg, socketpair,
};
use wgnetns_core::{Error, Result};

/// One end of a descriptor-passing channel
#[derive(Debug)]
pub struct DescriptorChannel {
    sock: OwnedFd,
}

/// A message read from a [`DescriptorChannel`]
#[derive(Debug)]
pub struct Received {
    /// In-band bytes
    pub payload: Vec<u8>,
    /// Descriptor passed alongside, now owned by the receiver
    pub fd: Option<OwnedFd>,
}

impl DescriptorChannel {
    /// Create a connected pair of channel ends
    ///
    /// Both ends are close-on-exec; across fork(2) each side keeps one end
    /// and drops the other.
    ///
    /// # Errors
    /// Returns error if socketpair(2) fails
    pub fn pair() -> Result<(Self, Self)> {
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::SOCK_CLOEXEC,
        )
        .map_err(|errno| {
            tracing::error!(error = %errno, "socketpair failed");
            Error::System(errno)
        })?;
        Ok((Self { sock: a }, Self { sock: b }))
    }

    /// Send `payload`, optionally with a descriptor attached
    ///
    /// # Errors
    /// Returns error if sendmsg(2) fails or the message is truncated
    pub fn send(&self, payload: &[u8], fd: Option<BorrowedFd<'_>>) -> Result<()> {
        let iov = [IoSlice::new(payload)];
        let fds: Vec<RawFd> = fd.iter().map(AsRawFd::as_raw_fd).collect();
        let cmsgs: Vec<ControlMessage<'_>> = if fds.is_empty() {
            Vec::new()
        } else {
            vec![ControlMessage::ScmRights(&fds)]
        };

        loop {
            match sendmsg::<()>(
                self.sock.as_raw_fd(),
                &iov,
                &cmsgs,
                MsgFlags::MSG_NOSIGNAL,
                None,
            ) {
                Ok(n) if n == payload.len() => return Ok(()),
                Ok(n) => {
                    return Err(Error::Handoff {
                        message: format!("short send ({n} of {} bytes)", payload.len()),
                    });
                }
                Err(Errno::EINTR) => {}
                Err(errno) => return Err(Error::System(errno)),
            }
        }
    }

    /// Block until a message arrives
    ///
    /// Returns `None` once the peer has closed its end without sending.
    /// Received descriptors are close-on-exec.
    ///
    /// # Errors
    /// Returns error if recvmsg(2) fails or the control data was truncated
    pub fn receive(&self, max_payload: usize) -> Result<Option<Received>> {
        let mut payload = vec![0u8; max_payload.max(1)];
        let mut cmsg_buf = nix::cmsg_space!([RawFd; 1]);

        let (len, fd) = loop {
            let mut iov = [IoSliceMut::new(&mut payload)];
            match recvmsg::<()>(
                self.sock.as_raw_fd(),
                &mut iov,
                Some(&mut cmsg_buf),
                MsgFlags::MSG_CMSG_CLOEXEC,
            ) {
                Ok(msg) => {
                    let mut fd = None;
                    for cmsg in msg.cmsgs()? {
                        if let ControlMessageOwned::ScmRights(raw_fds) = cmsg {
                            for raw in raw_fds {
                                // SAFETY: the kernel just installed `raw` in our
                                // table; nothing else refers to it.
                                let owned = unsafe { OwnedFd::from_raw_fd(raw) };
                                if fd.is_none() {
                                    fd = Some(owned);
                                }
                            }
                        }
                    }
                    break (msg.bytes, fd);
                }
                Err(Errno::EINTR) => {}
                Err(errno) => return Err(Error::System(errno)),
            }
        };

        if len == 0 && fd.is_none() {
            return Ok(None);
        }
        payload.truncate(len);
        Ok(Some(Received { payload, fd }))
    }
}
