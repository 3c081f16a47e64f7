//! # spv-primitives
//!
//! Core types shared by the SPV header-chain client:
//!
//! - [`hash`]: double-SHA256 and the [`BlockHash`], [`Txid`] and [`ChunkHash`] newtypes
//!   with their external hex representations.
//! - [`header`]: the 80-byte [`BlockHeader`] codec.
//! - [`target`]: compact-bits decoding and the retarget-every-2016-blocks rule.
//! - [`merkle`]: merkle-branch root recomputation for transaction inclusion proofs.
//! - [`types`]: the [`Latest`] chain tip and the bootstrap [`Checkpoint`].

pub mod hash;
pub use hash::{BlockHash, ChunkHash, Txid, sha256d};

pub mod header;
pub use header::{
    BlockHeader, CodecError, RAW_HEADER_SIZE, RawHeader, header_hash, raw_prev_hash,
    split_concat_hex,
};

pub mod target;
pub use target::{MAX_TARGET, TARGET_TIMESPAN_SECS, next_target, target_from_bits};

pub mod merkle;
pub use merkle::merkle_root_from_branch;

pub mod types;
pub use types::{CHUNK_SIZE, Checkpoint, Latest, MAX_BUFFERED_HEADERS};
