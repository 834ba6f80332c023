use std::{fmt, str::FromStr};

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::{rngs::OsRng, RngCore};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

pub const ADDRESS_LEN: usize = 20;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid hex: {0}")]
    Hex(String),
    #[error("address must be {ADDRESS_LEN} bytes, got {0}")]
    Length(usize),
    #[error("secret key must be 32 bytes, got {0}")]
    SecretKeyLength(usize),
}

/// Caller identity: the trailing 20 bytes of a SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_verifying_key(pk: &VerifyingKey) -> Self {
        Self::from_digest(Sha256::digest(pk.as_bytes()).into())
    }

    /// Deterministic address for a system-owned account such as the treasury.
    pub fn derived(label: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"monarchy:");
        hasher.update(label.as_bytes());
        Self::from_digest(hasher.finalize().into())
    }

    fn from_digest(digest: [u8; 32]) -> Self {
        let mut out = [0u8; ADDRESS_LEN];
        out.copy_from_slice(&digest[32 - ADDRESS_LEN..]);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| AddressError::Hex(e.to_string()))?;
        let arr: [u8; ADDRESS_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AddressError::Length(bytes.len()))?;
        Ok(Self(arr))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}

/// Holds the key material that stands behind a caller [`Address`].
pub struct Wallet {
    sk: SigningKey,
}

impl Wallet {
    pub fn generate() -> Self {
        let mut sk_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut sk_bytes);
        Self {
            sk: SigningKey::from_bytes(&sk_bytes),
        }
    }

    pub fn from_hex(sk_hex: &str) -> Result<Self, AddressError> {
        let bytes = hex::decode(sk_hex.trim()).map_err(|e| AddressError::Hex(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AddressError::SecretKeyLength(bytes.len()))?;
        Ok(Self {
            sk: SigningKey::from_bytes(&arr),
        })
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.sk.to_bytes())
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.sk.verifying_key().as_bytes())
    }

    pub fn address(&self) -> Address {
        Address::from_verifying_key(&self.sk.verifying_key())
    }
}
