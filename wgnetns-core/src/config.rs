//! Device configuration model
//!
//! [`UapiConfig`] is the shape of data pushed to, and read back from, a
//! running tunnel engine. Where it comes from is abstracted by
//! [`ConfigSource`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::key::{Key, PrivateKey};
use crate::{Error, Result};

/// An IP prefix in CIDR notation (`10.0.0.0/24`, `::/0`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpPrefix {
    addr: IpAddr,
    len: u8,
}

impl IpPrefix {
    /// Create a prefix, checking the length against the address family
    ///
    /// # Errors
    /// Returns error if `len` exceeds 32 (IPv4) or 128 (IPv6)
    pub fn new(addr: IpAddr, len: u8) -> Result<Self> {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if len > max {
            return Err(Error::invalid_config(format!(
                "Prefix length {len} too long for {addr}"
            )));
        }
        Ok(Self { addr, len })
    }

    /// Network address as written
    #[must_use]
    pub const fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Prefix length in bits
    #[must_use]
    pub const fn prefix_len(&self) -> u8 {
        self.len
    }

    /// The same prefix with host bits cleared (`10.0.0.1/24` becomes
    /// `10.0.0.0/24`), as the engine stores it
    #[must_use]
    pub fn network(&self) -> Self {
        let addr = match self.addr {
            IpAddr::V4(v4) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.len)).unwrap_or(0);
                IpAddr::V4((u32::from(v4) & mask).into())
            }
            IpAddr::V6(v6) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.len)).unwrap_or(0);
                IpAddr::V6((u128::from(v6) & mask).into())
            }
        };
        Self {
            addr,
            len: self.len,
        }
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl FromStr for IpPrefix {
    type Err = Error;

    /// A bare address is taken as a host route (`/32` or `/128`).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (addr, len) = match s.split_once('/') {
            Some((addr, len)) => (addr, Some(len)),
            None => (s, None),
        };
        let addr: IpAddr = addr
            .parse()
            .map_err(|e| Error::invalid_config(format!("Invalid address in {s:?}: {e}")))?;
        let len = match len {
            Some(len) => len
                .parse::<u8>()
                .map_err(|e| Error::invalid_config(format!("Invalid prefix length in {s:?}: {e}")))?,
            None if addr.is_ipv4() => 32,
            None => 128,
        };
        Self::new(addr, len)
    }
}

impl TryFrom<String> for IpPrefix {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<IpPrefix> for String {
    fn from(prefix: IpPrefix) -> Self {
        prefix.to_string()
    }
}

/// A remote tunnel endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Peer public key
    pub public_key: Key,

    /// Optional symmetric key mixed into the handshake
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<Key>,

    /// Last known network address of the peer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<SocketAddr>,

    /// Prefixes routed to, and accepted from, this peer
    #[serde(default)]
    pub allowed_ips: Vec<IpPrefix>,

    /// Keepalive interval in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_keepalive: Option<u16>,
}

impl Peer {
    /// Create a peer with only its public key set
    #[must_use]
    pub const fn new(public_key: Key) -> Self {
        Self {
            public_key,
            preshared_key: None,
            endpoint: None,
            allowed_ips: Vec::new(),
            persistent_keepalive: None,
        }
    }

    /// Set the endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: SocketAddr) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Add an allowed prefix
    #[must_use]
    pub fn with_allowed_ip(mut self, prefix: IpPrefix) -> Self {
        self.allowed_ips.push(prefix);
        self
    }

    /// Set the keepalive interval; 0 disables it
    #[must_use]
    pub fn with_persistent_keepalive(mut self, seconds: u16) -> Self {
        self.persistent_keepalive = (seconds != 0).then_some(seconds);
        self
    }

    /// Set the preshared key
    #[must_use]
    pub fn with_preshared_key(mut self, key: Key) -> Self {
        self.preshared_key = Some(key);
        self
    }

    /// Whether two peer records describe the same configuration,
    /// ignoring the order of allowed IPs and host bits inside them
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        let mine: BTreeSet<_> = self.allowed_ips.iter().map(IpPrefix::network).collect();
        let theirs: BTreeSet<_> = other.allowed_ips.iter().map(IpPrefix::network).collect();

        self.public_key == other.public_key
            && self.preshared_key == other.preshared_key
            && self.endpoint == other.endpoint
            && self.persistent_keepalive == other.persistent_keepalive
            && mine == theirs
    }
}

/// Configuration of a WireGuard device as spoken over the control socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UapiConfig {
    /// Device private key
    pub private_key: PrivateKey,

    /// UDP listen port; the engine picks one when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,

    /// Firewall mark for outgoing packets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fwmark: Option<u32>,

    /// Ordered peer list
    #[serde(default)]
    pub peers: Vec<Peer>,
}

impl UapiConfig {
    /// Create a configuration with no peers
    #[must_use]
    pub const fn new(private_key: PrivateKey) -> Self {
        Self {
            private_key,
            listen_port: None,
            fwmark: None,
            peers: Vec::new(),
        }
    }

    /// Set the listen port
    #[must_use]
    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = Some(port);
        self
    }

    /// Append a peer
    #[must_use]
    pub fn with_peer(mut self, peer: Peer) -> Self {
        self.peers.push(peer);
        self
    }

    /// Public key derived from the private key
    #[must_use]
    pub fn public_key(&self) -> Key {
        self.private_key.public_key()
    }

    /// Check invariants the engine would otherwise reject one by one
    ///
    /// # Errors
    /// Returns error if two peers share a public key
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for peer in &self.peers {
            if !seen.insert(peer.public_key) {
                return Err(Error::invalid_config(format!(
                    "Duplicate peer public key {}",
                    peer.public_key
                )));
            }
        }
        Ok(())
    }

    /// Compare peer sets, ignoring peer order and allowed-IP order
    #[must_use]
    pub fn same_peers(&self, other: &Self) -> bool {
        if self.peers.len() != other.peers.len() {
            return false;
        }
        let theirs: BTreeMap<_, _> = other
            .peers
            .iter()
            .map(|peer| (peer.public_key, peer))
            .collect();

        self.peers.iter().all(|peer| {
            theirs
                .get(&peer.public_key)
                .is_some_and(|other| peer.same_as(other))
        })
    }
}

/// Something that can supply a parsed tunnel configuration
pub trait ConfigSource {
    /// Produce the configuration to apply
    ///
    /// # Errors
    /// Returns error if the configuration cannot be read or is invalid
    fn load(&self) -> Result<UapiConfig>;
}

impl ConfigSource for UapiConfig {
    fn load(&self) -> Result<UapiConfig> {
        self.validate()?;
        Ok(self.clone())
    }
}
