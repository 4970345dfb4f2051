//! UAPI wire format
//!
//! Requests and responses are `key=value` lines closed by a blank line.
//! Keys travel as lowercase hex. A response always ends with `errno=<n>`.

use std::fmt::{Display, Write as _};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::trace;
use wgnetns_core::{Error, IpPrefix, Key, Peer, PrivateKey, Result, UapiConfig};

/// Request kind, used in error reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `set=1`
    Set,
    /// `get=1`
    Get,
}

impl Operation {
    /// Name of the command line key
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Get => "get",
        }
    }
}

/// Runtime counters of one peer, as reported by `get`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStats {
    /// Peer this entry belongs to
    pub public_key: Key,
    /// Time of the most recent handshake, if any happened
    pub last_handshake: Option<SystemTime>,
    /// Bytes received from the peer
    pub rx_bytes: u64,
    /// Bytes sent to the peer
    pub tx_bytes: u64,
}

/// Everything a `get` request reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Configuration in the same shape `set` accepts
    pub config: UapiConfig,
    /// Counters, one entry per peer in `config.peers` order
    pub stats: Vec<PeerStats>,
}

/// A parsed response: fields in arrival order plus the status code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// `key=value` pairs before the `errno` line
    pub fields: Vec<(String, String)>,
    /// Status code, 0 on success
    pub errno: i32,
}

impl Response {
    /// Turn a non-zero status into [`Error::Protocol`]
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] carrying the status code
    pub fn check(self, operation: Operation) -> Result<Vec<(String, String)>> {
        if self.errno == 0 {
            Ok(self.fields)
        } else {
            Err(Error::Protocol {
                operation: operation.as_str(),
                errno: self.errno,
            })
        }
    }
}

fn line(out: &mut String, key: &str, value: impl Display) {
    let _ = writeln!(out, "{key}={value}");
}

fn encode_peer(out: &mut String, peer: &Peer, replace_allowed_ips: bool) {
    line(out, "public_key", peer.public_key.to_hex());
    if let Some(psk) = &peer.preshared_key {
        line(out, "preshared_key", psk.to_hex());
    }
    if let Some(endpoint) = &peer.endpoint {
        // SocketAddr already brackets IPv6 addresses
        line(out, "endpoint", endpoint);
    }
    if replace_allowed_ips {
        line(out, "replace_allowed_ips", "true");
    }
    for prefix in &peer.allowed_ips {
        line(out, "allowed_ip", prefix);
    }
    if let Some(seconds) = peer.persistent_keepalive {
        line(out, "persistent_keepalive_interval", seconds);
    }
}

/// Request replacing the full device configuration, peers included
#[must_use]
pub fn encode_set(config: &UapiConfig) -> String {
    let mut out = String::new();
    line(&mut out, Operation::Set.as_str(), 1);
    line(&mut out, "private_key", config.private_key.secret().to_hex());
    if let Some(port) = config.listen_port {
        line(&mut out, "listen_port", port);
    }
    if let Some(mark) = config.fwmark {
        line(&mut out, "fwmark", mark);
    }
    line(&mut out, "replace_peers", "true");
    for peer in &config.peers {
        encode_peer(&mut out, peer, false);
    }
    out.push('\n');
    out
}

/// Request adding or updating individual peers, leaving others alone
///
/// A peer's allowed IPs, when given, replace that peer's existing list.
#[must_use]
pub fn encode_update(peers: &[Peer]) -> String {
    let mut out = String::new();
    line(&mut out, Operation::Set.as_str(), 1);
    for peer in peers {
        encode_peer(&mut out, peer, !peer.allowed_ips.is_empty());
    }
    out.push('\n');
    out
}

/// Request removing one peer
#[must_use]
pub fn encode_remove(public_key: &Key) -> String {
    let mut out = String::new();
    line(&mut out, Operation::Set.as_str(), 1);
    line(&mut out, "public_key", public_key.to_hex());
    line(&mut out, "remove", "true");
    out.push('\n');
    out
}

/// Request reading back the device
#[must_use]
pub const fn encode_get() -> &'static str {
    "get=1\n\n"
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidResponse {
        message: message.into(),
    }
}

/// Parse one response block (without its terminating blank line)
///
/// # Errors
/// Returns [`Error::InvalidResponse`] on a malformed line or a missing
/// `errno` line
pub fn parse_response(text: &str) -> Result<Response> {
    let mut fields = Vec::new();
    let mut errno = None;

    for raw in text.lines().filter(|l| !l.is_empty()) {
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| invalid(format!("line without '=': {raw:?}")))?;
        if key == "errno" {
            errno = Some(parse_value::<i32>(key, value)?);
        } else if errno.is_some() {
            return Err(invalid(format!("field {key:?} after errno")));
        } else {
            fields.push((key.to_string(), value.to_string()));
        }
    }

    let errno = errno.ok_or_else(|| invalid("response has no errno line"))?;
    Ok(Response { fields, errno })
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| invalid(format!("bad value for {key}: {value:?}")))
}

fn parse_key(key: &str, value: &str) -> Result<Key> {
    Key::from_hex(value).map_err(|_| invalid(format!("bad key for {key}")))
}

const NANOS_PER_SEC: u32 = 1_000_000_000;

#[derive(Default)]
struct PeerCounters {
    handshake_sec: u64,
    handshake_nsec: u32,
    rx_bytes: u64,
    tx_bytes: u64,
}

impl PeerCounters {
    fn into_stats(self, public_key: Key) -> Result<PeerStats> {
        if self.handshake_nsec >= NANOS_PER_SEC {
            return Err(invalid(format!(
                "last_handshake_time_nsec {} out of range",
                self.handshake_nsec
            )));
        }
        let last_handshake = if self.handshake_sec == 0 && self.handshake_nsec == 0 {
            None
        } else {
            let since_epoch = Duration::new(self.handshake_sec, self.handshake_nsec);
            Some(UNIX_EPOCH.checked_add(since_epoch).ok_or_else(|| {
                invalid(format!(
                    "last_handshake_time_sec {} out of range",
                    self.handshake_sec
                ))
            })?)
        };
        Ok(PeerStats {
            public_key,
            last_handshake,
            rx_bytes: self.rx_bytes,
            tx_bytes: self.tx_bytes,
        })
    }
}

/// Rebuild the device state from the fields of a `get` response
///
/// Unknown keys (such as `protocol_version`) are skipped. An all-zero
/// preshared key and a zero keepalive interval mean "not set".
///
/// # Errors
/// Returns [`Error::InvalidResponse`] if the private key is missing, a
/// value cannot be parsed or a handshake time is out of range
pub fn decode_device(fields: &[(String, String)]) -> Result<DeviceState> {
    let mut private_key = None;
    let mut listen_port = None;
    let mut fwmark = None;
    let mut peers: Vec<(Peer, PeerCounters)> = Vec::new();

    for (key, value) in fields {
        let key = key.as_str();
        match key {
            "private_key" => {
                private_key = Some(
                    PrivateKey::from_hex(value).map_err(|_| invalid("bad private_key"))?,
                );
            }
            "listen_port" => listen_port = Some(parse_value::<u16>(key, value)?),
            "fwmark" => {
                let mark = parse_value::<u32>(key, value)?;
                fwmark = (mark != 0).then_some(mark);
            }
            "public_key" => {
                peers.push((Peer::new(parse_key(key, value)?), PeerCounters::default()));
            }
            _ => {
                let Some((peer, counters)) = peers.last_mut() else {
                    trace!(key, "Skipping device field");
                    continue;
                };
                match key {
                    "preshared_key" => {
                        let psk = parse_key(key, value)?;
                        peer.preshared_key = psk.as_bytes().iter().any(|&b| b != 0).then_some(psk);
                    }
                    "endpoint" => peer.endpoint = Some(parse_value::<SocketAddr>(key, value)?),
                    "allowed_ip" => peer.allowed_ips.push(parse_value::<IpPrefix>(key, value)?),
                    "persistent_keepalive_interval" => {
                        let seconds = parse_value::<u16>(key, value)?;
                        peer.persistent_keepalive = (seconds != 0).then_some(seconds);
                    }
                    "last_handshake_time_sec" => counters.handshake_sec = parse_value(key, value)?,
                    "last_handshake_time_nsec" => {
                        counters.handshake_nsec = parse_value(key, value)?;
                    }
                    "rx_bytes" => counters.rx_bytes = parse_value(key, value)?,
                    "tx_bytes" => counters.tx_bytes = parse_value(key, value)?,
                    _ => trace!(key, "Skipping peer field"),
                }
            }
        }
    }

    let private_key = private_key.ok_or_else(|| invalid("device has no private key"))?;
    let mut config = UapiConfig::new(private_key);
    config.listen_port = listen_port;
    config.fwmark = fwmark;

    let mut stats = Vec::with_capacity(peers.len());
    for (peer, counters) in peers {
        stats.push(counters.into_stats(peer.public_key)?);
        config.peers.push(peer);
    }

    Ok(DeviceState { config, stats })
}
