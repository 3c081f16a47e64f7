//! The 80-byte block-header codec.

use crate::hash::{BlockHash, sha256d};
use alloy_primitives::hex;
use thiserror::Error;

/// The size of a raw encoded block header in bytes.
pub const RAW_HEADER_SIZE: usize = 80;

/// A raw 80-byte block header encoding.
pub type RawHeader = [u8; RAW_HEADER_SIZE];

/// An error from decoding raw header material.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The input did not have the expected byte length.
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// The required byte length.
        expected: usize,
        /// The byte length that was supplied.
        actual: usize,
    },

    /// The input was not valid hex.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// A decoded block header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// The block version.
    pub version: u32,
    /// The hash of the preceding block.
    pub prev_blockhash: BlockHash,
    /// The root of the block's transaction merkle tree.
    pub merkle_root: BlockHash,
    /// The block timestamp.
    pub time: u32,
    /// The compact encoding of the proof-of-work target.
    pub bits: u32,
    /// The proof-of-work nonce.
    pub nonce: u32,
}

impl BlockHeader {
    /// Decodes a raw header. Fails unless the input is exactly 80 bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let raw: &RawHeader = bytes
            .try_into()
            .map_err(|_| CodecError::InvalidLength { expected: RAW_HEADER_SIZE, actual: bytes.len() })?;
        Ok(Self::from_raw(raw))
    }

    /// Decodes a raw header whose length is already established.
    pub fn from_raw(raw: &RawHeader) -> Self {
        let le_u32 = |offset: usize| {
            u32::from_le_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
        };
        let hash_at = |offset: usize| {
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(&raw[offset..offset + 32]);
            BlockHash::from_raw(bytes)
        };

        Self {
            version: le_u32(0),
            prev_blockhash: hash_at(4),
            merkle_root: hash_at(36),
            time: le_u32(68),
            bits: le_u32(72),
            nonce: le_u32(76),
        }
    }

    /// Encodes the header back into its raw 80-byte form. Exact inverse of
    /// [`Self::decode`].
    pub fn encode(&self) -> RawHeader {
        let mut raw = [0u8; RAW_HEADER_SIZE];
        raw[0..4].copy_from_slice(&self.version.to_le_bytes());
        raw[4..36].copy_from_slice(self.prev_blockhash.as_bytes());
        raw[36..68].copy_from_slice(self.merkle_root.as_bytes());
        raw[68..72].copy_from_slice(&self.time.to_le_bytes());
        raw[72..76].copy_from_slice(&self.bits.to_le_bytes());
        raw[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        raw
    }

    /// The header's block hash.
    pub fn hash(&self) -> BlockHash {
        header_hash(&self.encode())
    }
}

/// The double-SHA256 block hash of a raw header.
pub fn header_hash(raw: &RawHeader) -> BlockHash {
    BlockHash::from_raw(sha256d(raw))
}

/// The `prev_blockhash` field of a raw header, read without a full decode.
pub fn raw_prev_hash(raw: &RawHeader) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&raw[4..36]);
    BlockHash::from_raw(bytes)
}

/// Splits a concatenated hex string of raw headers, as returned by remote
/// providers, into individual raw headers.
///
/// The input length must be a multiple of 160 hex characters.
pub fn split_concat_hex(concat: &str) -> Result<Vec<RawHeader>, CodecError> {
    let bytes = hex::decode(concat)?;
    if !bytes.len().is_multiple_of(RAW_HEADER_SIZE) {
        return Err(CodecError::InvalidLength {
            expected: RAW_HEADER_SIZE,
            actual: bytes.len() % RAW_HEADER_SIZE,
        });
    }

    Ok(bytes
        .chunks_exact(RAW_HEADER_SIZE)
        .map(|chunk| {
            let mut raw = [0u8; RAW_HEADER_SIZE];
            raw.copy_from_slice(chunk);
            raw
        })
        .collect())
}
