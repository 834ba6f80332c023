use std::fmt;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

pub const NAME_LEN: usize = 32;

pub const VACANT: &str = "[Vacant]";

/// Display name in its fixed-width form: UTF-8 right-padded with zero bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MonarchName([u8; NAME_LEN]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("name is {len} bytes, at most {NAME_LEN} fit")]
pub struct NameTooLong {
    pub len: usize,
}

impl MonarchName {
    pub fn encode(text: &str) -> Result<Self, NameTooLong> {
        let bytes = text.as_bytes();
        if bytes.len() > NAME_LEN {
            return Err(NameTooLong { len: bytes.len() });
        }
        let mut out = [0u8; NAME_LEN];
        out[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(out))
    }

    pub fn vacant() -> Self {
        let mut out = [0u8; NAME_LEN];
        out[..VACANT.len()].copy_from_slice(VACANT.as_bytes());
        Self(out)
    }

    pub const fn from_bytes(bytes: [u8; NAME_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NAME_LEN] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Text with the zero padding stripped. Invalid UTF-8 is replaced lossily.
    pub fn as_str(&self) -> String {
        let end = self.0.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for MonarchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl fmt::Debug for MonarchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MonarchName({:?})", self.as_str())
    }
}

impl Serialize for MonarchName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for MonarchName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let encoded = encoded.strip_prefix("0x").unwrap_or(&encoded);
        let bytes = hex::decode(encoded).map_err(D::Error::custom)?;
        let arr: [u8; NAME_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| D::Error::custom("name must be 32 bytes"))?;
        Ok(Self(arr))
    }
}
