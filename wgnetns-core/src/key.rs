//! WireGuard Curve25519 keys
//!
//! Configuration files carry keys as base64, the control protocol carries
//! them as lowercase hex. Both decode to the same 32 raw bytes.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{Error, Result};

/// Key size in bytes
pub const KEY_LEN: usize = 32;

/// A 32-byte WireGuard key (public or preshared)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Key([u8; KEY_LEN]);

impl Key {
    /// Wrap raw key bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Decode from base64 (configuration file format)
    ///
    /// # Errors
    /// Returns error if the text is not base64 or not 32 bytes long
    pub fn from_base64(text: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(text.trim())
            .map_err(|e| Error::invalid_config(format!("Invalid base64 key: {e}")))?;
        Self::from_slice(&bytes)
    }

    /// Decode from hex (control protocol format)
    ///
    /// # Errors
    /// Returns error if the text is not hex or not 32 bytes long
    pub fn from_hex(text: &str) -> Result<Self> {
        let mut bytes = [0u8; KEY_LEN];
        hex::decode_to_slice(text.trim(), &mut bytes)
            .map_err(|e| Error::invalid_config(format!("Invalid hex key: {e}")))?;
        Ok(Self(bytes))
    }

    fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            Error::invalid_config(format!(
                "Key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Encode as base64
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Encode as lowercase hex
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.to_base64())
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_base64(s)
    }
}

impl TryFrom<String> for Key {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_base64(&s)
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.to_base64()
    }
}

/// A device private key
///
/// Kept apart from [`Key`] so it never shows up in logs by accident.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivateKey(Key);

impl PrivateKey {
    /// Wrap raw key bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Key::from_bytes(bytes))
    }

    /// Decode from base64
    ///
    /// # Errors
    /// Returns error if the text is not a valid base64 key
    pub fn from_base64(text: &str) -> Result<Self> {
        Key::from_base64(text).map(Self)
    }

    /// Decode from hex
    ///
    /// # Errors
    /// Returns error if the text is not a valid hex key
    pub fn from_hex(text: &str) -> Result<Self> {
        Key::from_hex(text).map(Self)
    }

    /// The underlying key material
    #[must_use]
    pub const fn secret(&self) -> &Key {
        &self.0
    }

    /// Derive the matching X25519 public key
    #[must_use]
    pub fn public_key(&self) -> Key {
        let secret = StaticSecret::from(*self.0.as_bytes());
        Key::from_bytes(PublicKey::from(&secret).to_bytes())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(public={})", self.public_key())
    }
}

impl FromStr for PrivateKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_base64(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7748 section 6.1 test vector (Alice)
    const ALICE_PRIVATE: &str = "77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a";
    const ALICE_PUBLIC: &str = "8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a";

    #[test]
    fn test_public_key_derivation() {
        let private = PrivateKey::from_hex(ALICE_PRIVATE).unwrap();
        assert_eq!(private.public_key().to_hex(), ALICE_PUBLIC);
    }

    #[test]
    fn test_base64_and_hex_agree() {
        let key = Key::from_hex(ALICE_PUBLIC).unwrap();
        let b64 = key.to_base64();
        assert_eq!(b64.len(), 44);
        assert_eq!(Key::from_base64(&b64).unwrap(), key);
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(Key::from_base64("AAAA").is_err());
        assert!(Key::from_hex("abcd").is_err());
        assert!(Key::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_private_key_debug_is_redacted() {
        let private = PrivateKey::from_hex(ALICE_PRIVATE).unwrap();
        let shown = format!("{private:?}");
        assert!(!shown.contains(&private.secret().to_base64()));
        assert!(shown.contains(&private.public_key().to_base64()));
    }
}
