//! Reader for WireGuard configuration files
//!
//! Understands the `[Interface]` / `[Peer]` format accepted by `wg setconf`
//! and `wg-quick`. Keys that only matter to `wg-quick` (addresses, DNS,
//! routing hooks) do not belong to the device and are skipped.

use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use crate::config::{ConfigSource, IpPrefix, Peer, UapiConfig};
use crate::key::{Key, PrivateKey};
use crate::{Error, Result};

const WG_QUICK_KEYS: &[&str] = &[
    "address",
    "dns",
    "mtu",
    "table",
    "preup",
    "postup",
    "predown",
    "postdown",
    "saveconfig",
];

/// A configuration file on disk
#[derive(Debug, Clone)]
pub struct WgConfFile {
    path: PathBuf,
}

impl WgConfFile {
    /// Refer to a configuration file; nothing is read until [`ConfigSource::load`]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for WgConfFile {
    fn load(&self) -> Result<UapiConfig> {
        let text = fs::read_to_string(&self.path).map_err(|e| {
            Error::invalid_config(format!("Failed to read {}: {e}", self.path.display()))
        })?;
        tracing::debug!(path = %self.path.display(), "Parsing WireGuard configuration");
        parse(&text)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Interface,
    Peer,
}

#[derive(Default)]
struct PeerDraft {
    line: usize,
    public_key: Option<Key>,
    preshared_key: Option<Key>,
    endpoint: Option<SocketAddr>,
    allowed_ips: Vec<IpPrefix>,
    persistent_keepalive: Option<u16>,
}

impl PeerDraft {
    fn finish(self) -> Result<Peer> {
        let public_key = self.public_key.ok_or_else(|| {
            Error::invalid_config(format!(
                "[Peer] section at line {} has no PublicKey",
                self.line
            ))
        })?;
        Ok(Peer {
            public_key,
            preshared_key: self.preshared_key,
            endpoint: self.endpoint,
            allowed_ips: self.allowed_ips,
            persistent_keepalive: self.persistent_keepalive,
        })
    }
}

/// Parse configuration file text
///
/// # Errors
/// Returns error on unknown sections or keys, malformed values, a missing
/// `PrivateKey`, or a peer without `PublicKey`
pub fn parse(text: &str) -> Result<UapiConfig> {
    let mut section = Section::None;
    let mut private_key = None;
    let mut listen_port = None;
    let mut fwmark = None;
    let mut peers = Vec::new();
    let mut current: Option<PeerDraft> = None;

    for (index, raw) in text.lines().enumerate() {
        let lineno = index + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('[') {
            if let Some(draft) = current.take() {
                peers.push(draft.finish()?);
            }
            section = match line.to_ascii_lowercase().as_str() {
                "[interface]" => Section::Interface,
                "[peer]" => {
                    current = Some(PeerDraft {
                        line: lineno,
                        ..PeerDraft::default()
                    });
                    Section::Peer
                }
                _ => {
                    return Err(Error::invalid_config(format!(
                        "line {lineno}: unknown section {line}"
                    )));
                }
            };
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| {
            Error::invalid_config(format!("line {lineno}: expected Key = Value"))
        })?;
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        let at = |e: Error| Error::invalid_config(format!("line {lineno}: {e}"));

        match (section, key.as_str()) {
            (Section::Interface, "privatekey") => {
                private_key = Some(PrivateKey::from_base64(value).map_err(at)?);
            }
            (Section::Interface, "listenport") => {
                listen_port = Some(parse_number::<u16>(value).map_err(at)?);
            }
            (Section::Interface, "fwmark") => {
                fwmark = parse_fwmark(value).map_err(at)?;
            }
            (Section::Interface, k) if WG_QUICK_KEYS.contains(&k) => {
                tracing::debug!(key = %k, line = lineno, "Ignoring wg-quick setting");
            }
            (Section::Peer, k) => {
                let draft = current.as_mut().ok_or_else(|| {
                    Error::invalid_config(format!("line {lineno}: peer key outside [Peer]"))
                })?;
                match k {
                    "publickey" => draft.public_key = Some(Key::from_base64(value).map_err(at)?),
                    "presharedkey" => {
                        draft.preshared_key = Some(Key::from_base64(value).map_err(at)?);
                    }
                    "endpoint" => draft.endpoint = Some(resolve_endpoint(value).map_err(at)?),
                    "allowedips" => {
                        for prefix in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                            draft.allowed_ips.push(prefix.parse().map_err(at)?);
                        }
                    }
                    "persistentkeepalive" => {
                        // 0 and `off` both disable keepalives
                        draft.persistent_keepalive = if value.eq_ignore_ascii_case("off") {
                            None
                        } else {
                            Some(parse_number::<u16>(value).map_err(at)?).filter(|&s| s != 0)
                        };
                    }
                    _ => {
                        return Err(Error::invalid_config(format!(
                            "line {lineno}: unknown [Peer] key {key}"
                        )));
                    }
                }
            }
            (Section::Interface, _) => {
                return Err(Error::invalid_config(format!(
                    "line {lineno}: unknown [Interface] key {key}"
                )));
            }
            (Section::None, _) => {
                return Err(Error::invalid_config(format!(
                    "line {lineno}: setting outside of any section"
                )));
            }
        }
    }

    if let Some(draft) = current.take() {
        peers.push(draft.finish()?);
    }

    let private_key =
        private_key.ok_or_else(|| Error::invalid_config("[Interface] has no PrivateKey"))?;

    let config = UapiConfig {
        private_key,
        listen_port,
        fwmark,
        peers,
    };
    config.validate()?;
    Ok(config)
}

fn parse_number<T: std::str::FromStr>(value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| Error::invalid_config(format!("invalid number {value:?}: {e}")))
}

fn parse_fwmark(value: &str) -> Result<Option<u32>> {
    if value.eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    let mark = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16)
            .map_err(|e| Error::invalid_config(format!("invalid fwmark {value:?}: {e}")))?,
        None => parse_number::<u32>(value)?,
    };
    Ok((mark != 0).then_some(mark))
}

/// Endpoints may name a host; the control protocol only takes addresses,
/// so names are resolved once here.
fn resolve_endpoint(value: &str) -> Result<SocketAddr> {
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let mut addrs = value
        .to_socket_addrs()
        .map_err(|e| Error::invalid_config(format!("cannot resolve endpoint {value:?}: {e}")))?;
    addrs
        .next()
        .ok_or_else(|| Error::invalid_config(format!("endpoint {value:?} has no addresses")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIVATE: &str = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=";
    const PEER: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";
    const PEER2: &str = "TrMvSoP4jYQlY6RIzBgbssQqY3vxI2Pi+y71lOWWXX0=";

    #[test]
    fn test_parse_full() {
        let text = format!(
            "# laptop\n\
             [Interface]\n\
             PrivateKey = {PRIVATE}\n\
             ListenPort = 51820\n\
             Address = 10.0.0.2/32\n\
             FwMark = 0x10\n\
             \n\
             [Peer]\n\
             PublicKey = {PEER}\n\
             Endpoint = 192.0.2.1:51820\n\
             AllowedIPs = 0.0.0.0/0, ::/0\n\
             PersistentKeepalive = 25\n\
             \n\
             [Peer]\n\
             PublicKey = {PEER2}\n\
             AllowedIPs = 10.1.0.0/16\n\
             AllowedIPs = 10.2.0.0/16 # second line\n"
        );
        let config = parse(&text).unwrap();

        assert_eq!(config.listen_port, Some(51820));
        assert_eq!(config.fwmark, Some(16));
        assert_eq!(config.peers.len(), 2);

        let first = &config.peers[0];
        assert_eq!(first.public_key.to_base64(), PEER);
        assert_eq!(first.endpoint, Some("192.0.2.1:51820".parse().unwrap()));
        assert_eq!(first.allowed_ips.len(), 2);
        assert_eq!(first.persistent_keepalive, Some(25));

        let second = &config.peers[1];
        assert_eq!(second.allowed_ips.len(), 2);
        assert_eq!(second.endpoint, None);
    }

    #[test]
    fn test_ipv6_endpoint() {
        let text = format!(
            "[Interface]\nPrivateKey = {PRIVATE}\n[Peer]\nPublicKey = {PEER}\nEndpoint = [2001:db8::1]:51820\n"
        );
        let config = parse(&text).unwrap();
        assert_eq!(
            config.peers[0].endpoint,
            Some("[2001:db8::1]:51820".parse().unwrap())
        );
    }

    #[test]
    fn test_missing_private_key() {
        let text = format!("[Peer]\nPublicKey = {PEER}\n");
        assert!(parse(&text).is_err());
    }

    #[test]
    fn test_peer_without_public_key() {
        let text = format!("[Interface]\nPrivateKey = {PRIVATE}\n[Peer]\nAllowedIPs = 10.0.0.0/8\n");
        let err = parse(&text).unwrap_err();
        assert!(err.to_string().contains("no PublicKey"));
    }

    #[test]
    fn test_unknown_key_reports_line() {
        let text = format!("[Interface]\nPrivateKey = {PRIVATE}\nBogus = 1\n");
        let err = parse(&text).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_keepalive_off() {
        let text = format!(
            "[Interface]\nPrivateKey = {PRIVATE}\n[Peer]\nPublicKey = {PEER}\nPersistentKeepalive = off\n"
        );
        assert_eq!(parse(&text).unwrap().peers[0].persistent_keepalive, None);
    }

    #[test]
    fn test_keepalive_zero_is_off() {
        let text = format!(
            "[Interface]\nPrivateKey = {PRIVATE}\n[Peer]\nPublicKey = {PEER}\nPersistentKeepalive = 0\n"
        );
        assert_eq!(parse(&text).unwrap().peers[0].persistent_keepalive, None);
    }
}
