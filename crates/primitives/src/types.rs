//! Shared chain types: the verified tip and the bootstrap checkpoint.

use crate::hash::{BlockHash, ChunkHash};
use serde::{Deserialize, Serialize};

/// The number of headers in one chunk, aligned to the difficulty retarget
/// interval.
pub const CHUNK_SIZE: usize = 2016;

/// The maximum number of raw headers a compact-mode store may buffer: one
/// short of a full chunk, since a complete chunk is immediately confirmed.
pub const MAX_BUFFERED_HEADERS: usize = CHUNK_SIZE - 1;

/// The locally-verified chain tip.
///
/// Height `-1` with the zero hash marks the pre-genesis state. Readers always
/// receive a copy; the value is mutated only inside the sync critical section
/// or during bootstrap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Latest {
    /// The hash of the tip header.
    pub hash: BlockHash,
    /// The height of the tip header.
    pub height: i64,
}

impl Latest {
    /// The pre-genesis tip: height `-1`, zero hash.
    pub const GENESIS: Self = Self { hash: BlockHash::ZERO, height: -1 };

    /// The chunk index containing this tip. `-1` for the pre-genesis state.
    pub const fn chunk_index(&self) -> i64 {
        self.height.div_euclid(CHUNK_SIZE as i64)
    }
}

/// Pre-computed chunk hashes used to seed an empty compact-mode store,
/// skipping the initial header download.
///
/// Consumed only at bootstrap and trusted as out-of-band data; chunks are
/// still re-verified against these hashes whenever their headers are fetched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// The hash of the last header covered by `chunk_hashes`.
    pub last_block_hash: BlockHash,
    /// The confirmed chunk hashes, in chunk-index order.
    pub chunk_hashes: Vec<ChunkHash>,
}
