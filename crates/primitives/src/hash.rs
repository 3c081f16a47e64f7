//! Double-SHA256 and the hash newtypes used across the client.
//!
//! Bitcoin displays block hashes and transaction ids byte-reversed relative to
//! the order in which they appear inside raw headers and transactions.
//! [`BlockHash`] and [`Txid`] store the internal (raw) byte order and reverse
//! only at the hex boundary. [`ChunkHash`] is a plain digest over a group of
//! concatenated raw headers and is displayed un-reversed, matching the format
//! of pre-computed checkpoint files.

use crate::header::CodecError;
use alloy_primitives::hex;
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};

/// Computes the double-SHA256 digest of `data`.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// Parses a 64-character hex string into 32 bytes, reversing if requested.
fn parse_hash_hex(s: &str, reverse: bool) -> Result<[u8; 32], CodecError> {
    let decoded = hex::decode(s)?;
    let mut bytes: [u8; 32] =
        decoded.try_into().map_err(|_| CodecError::InvalidLength { expected: 32, actual: s.len() / 2 })?;
    if reverse {
        bytes.reverse();
    }
    Ok(bytes)
}

/// A block hash in internal byte order.
///
/// The [`fmt::Display`] form is the byte-reversed lowercase hex familiar from
/// block explorers; [`FromStr`] parses that form back.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    /// The all-zero hash, marking the pre-genesis chain state.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Wraps 32 bytes already in internal order.
    pub const fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The internal-order bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({self})")
    }
}

impl FromStr for BlockHash {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hash_hex(s, true).map(Self)
    }
}

impl serde::Serialize for BlockHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for BlockHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A transaction id in internal byte order, displayed byte-reversed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Txid([u8; 32]);

impl Txid {
    /// Wraps 32 bytes already in internal order.
    pub const fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The internal-order bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

impl fmt::Debug for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txid({self})")
    }
}

impl FromStr for Txid {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hash_hex(s, true).map(Self)
    }
}

impl serde::Serialize for Txid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Txid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The double-SHA256 digest of a full group of concatenated raw headers.
///
/// Displayed as plain (un-reversed) lowercase hex, the format used by
/// checkpoint files.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkHash([u8; 32]);

impl ChunkHash {
    /// Hashes a group of raw headers in order.
    pub fn of_group<H: AsRef<[u8]>>(headers: &[H]) -> Self {
        let mut hasher = Sha256::new();
        for header in headers {
            hasher.update(header.as_ref());
        }
        let first: [u8; 32] = hasher.finalize().into();
        Self(Sha256::digest(first).into())
    }

    /// Wraps a raw 32-byte digest.
    pub const fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The digest bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkHash({self})")
    }
}

impl FromStr for ChunkHash {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hash_hex(s, false).map(Self)
    }
}

impl serde::Serialize for ChunkHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for ChunkHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
