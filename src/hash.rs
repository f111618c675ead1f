//! Content-addressed hashes: 64 hex characters, SHA-256 of a type/length-prefixed body.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

pub const HASH_HEX_LEN: usize = 64;

/// An opaque content address. Equality and ordering are over the hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Hash([u8; 32]);

impl Hash {
    pub const ZERO: Self = Self([0; 32]);

    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    pub fn short(self) -> String {
        self.to_hex()[..7].to_owned()
    }
}

/// Hashes `body` as if it were stored under `kind` with a `"<kind> <len>\0"` header,
/// matching the object store's on-disk framing.
pub fn hash_object(kind: &str, body: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(b" ");
    hasher.update(body.len().to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(body);
    Hash(hasher.finalize().into())
}

impl Debug for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if f.alternate() { write!(f, "{}", self.short()) } else { write!(f, "{}", self.to_hex()) }
    }
}

impl FromStr for Hash {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_end();
        if s.len() != HASH_HEX_LEN {
            return Err(crate::error::Error::InvalidHash { value: s.to_owned() });
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| crate::error::Error::InvalidHash { value: s.to_owned() })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Hash {
    type Error = crate::error::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Hash> for String {
    fn from(h: Hash) -> Self {
        h.to_hex()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_hex() {
        let h = hash_object("blob", b"hello world");
        let s = h.to_hex();
        assert_eq!(s.len(), HASH_HEX_LEN);
        assert_eq!(s.parse::<Hash>().unwrap(), h);
    }

    #[test]
    fn different_kinds_hash_differently() {
        let a = hash_object("blob", b"same bytes");
        let b = hash_object("tree", b"same bytes");
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_short_hash() {
        assert!("abcd".parse::<Hash>().is_err());
    }
}
