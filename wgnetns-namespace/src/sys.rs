//! Interface ioctls not wrapped by nix

#![allow(unsafe_code)]

use std::os::fd::{AsRawFd, BorrowedFd};

use nix::errno::Errno;
use wgnetns_core::InterfaceName;

const IFNAMSIZ: usize = libc::IFNAMSIZ;

/// `struct ifreq` as used for flags (TUNSETIFF)
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct IfReqFlags {
    pub name: [libc::c_char; IFNAMSIZ],
    pub flags: libc::c_short,
    _pad: [u8; 22],
}

/// `struct ifreq` as used for the MTU (SIOCSIFMTU)
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct IfReqMtu {
    pub name: [libc::c_char; IFNAMSIZ],
    pub mtu: libc::c_int,
    _pad: [u8; 20],
}

fn encode_name(name: &str) -> [libc::c_char; IFNAMSIZ] {
    let mut out = [0 as libc::c_char; IFNAMSIZ];
    for (dst, src) in out.iter_mut().zip(name.bytes().take(IFNAMSIZ - 1)) {
        *dst = src as libc::c_char;
    }
    out
}

pub(crate) fn decode_name(raw: &[libc::c_char; IFNAMSIZ]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

impl IfReqFlags {
    pub(crate) fn new(name: &InterfaceName, flags: libc::c_short) -> Self {
        Self {
            name: encode_name(name.as_str()),
            flags,
            _pad: [0; 22],
        }
    }
}

impl IfReqMtu {
    pub(crate) fn new(name: &str, mtu: libc::c_int) -> Self {
        Self {
            name: encode_name(name),
            mtu,
            _pad: [0; 20],
        }
    }
}

// TUNSETIFF is _IOW('T', 202, int) even though it takes a struct ifreq.
nix::ioctl_readwrite_bad!(
    tun_set_iff_raw,
    nix::request_code_write!(b'T', 202, std::mem::size_of::<libc::c_int>()),
    IfReqFlags
);
nix::ioctl_write_ptr_bad!(set_mtu_raw, libc::SIOCSIFMTU, IfReqMtu);

/// Attach `tun` (an open `/dev/net/tun`) to a new interface.
/// Returns the name the kernel assigned.
pub(crate) fn tun_set_iff(tun: BorrowedFd<'_>, req: &mut IfReqFlags) -> Result<String, Errno> {
    // SAFETY: `req` is a valid, initialised ifreq for the lifetime of the call;
    // the kernel writes the assigned name back into it.
    unsafe { tun_set_iff_raw(tun.as_raw_fd(), std::ptr::from_mut(req)) }?;
    Ok(decode_name(&req.name))
}

/// Set the MTU of interface `name` through any socket in its namespace
pub(crate) fn set_mtu(sock: BorrowedFd<'_>, name: &str, mtu: u32) -> Result<(), Errno> {
    let mtu = libc::c_int::try_from(mtu).map_err(|_| Errno::EINVAL)?;
    let req = IfReqMtu::new(name, mtu);
    // SAFETY: `req` is a valid ifreq that outlives the call.
    unsafe { set_mtu_raw(sock.as_raw_fd(), &raw const req) }?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ifreq_layout() {
        // struct ifreq is 40 bytes on Linux
        assert_eq!(std::mem::size_of::<IfReqFlags>(), 40);
        assert_eq!(std::mem::size_of::<IfReqMtu>(), 40);
    }

    #[test]
    fn test_tunsetiff_request_code() {
        let code = nix::request_code_write!(b'T', 202, std::mem::size_of::<libc::c_int>());
        assert_eq!(code as u64, 0x4004_54ca);
    }

    #[test]
    fn test_name_round_trip() {
        let name = InterfaceName::new("wg0").unwrap();
        let req = IfReqFlags::new(&name, 1);
        assert_eq!(decode_name(&req.name), "wg0");
        assert_eq!(req.name[3], 0);
    }
}
