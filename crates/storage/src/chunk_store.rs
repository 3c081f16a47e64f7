//! Chunk bookkeeping on top of a [`Storage`] backend.

use crate::{Storage, StorageError};
use spv_primitives::{
    BlockHash, CHUNK_SIZE, Checkpoint, ChunkHash, Latest, RawHeader, header_hash,
};

/// The bookkeeping layer between the sync engine and a [`Storage`] backend.
///
/// `ChunkStore` owns the invariants the raw backend does not know about:
///
/// - the height formula `confirmed_chunks * 2016 + buffered_headers - 1`
///   (compact) or `headers - 1` (full);
/// - compact-mode chunk overflow: committing a verified batch confirms as
///   many full 2016-header groups as the batch completes, appending one
///   chunk hash per group and never buffering across a chunk boundary;
/// - the reorg rewind operations for both retention modes.
#[derive(Debug)]
pub struct ChunkStore<S> {
    storage: S,
}

impl<S: Storage> ChunkStore<S> {
    /// Wraps a storage backend.
    pub const fn new(storage: S) -> Self {
        Self { storage }
    }

    /// The wrapped backend.
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Whether the backend runs in compact mode.
    pub fn is_compact(&self) -> bool {
        self.storage.is_compact()
    }

    /// Resolves once the backend is usable.
    pub async fn ready(&self) -> Result<(), StorageError> {
        self.storage.ready().await
    }

    /// Wipes all persisted state.
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.storage.clear().await
    }

    /// The locally-verified chain height derived from the stored counts.
    /// `-1` when the store is empty.
    pub async fn height(&self) -> Result<i64, StorageError> {
        let headers = self.storage.headers_count().await? as i64;
        if self.storage.is_compact() {
            let chunks = self.storage.chunk_hashes_count().await? as i64;
            Ok(chunks * CHUNK_SIZE as i64 + headers - 1)
        } else {
            Ok(headers - 1)
        }
    }

    /// Derives the chain tip from persisted state, for bootstrap.
    pub async fn latest_from_storage(&self) -> Result<Latest, StorageError> {
        Ok(Latest { hash: self.storage.last_hash().await?, height: self.height().await? })
    }

    /// Seeds an empty compact-mode store from a pre-computed checkpoint.
    pub async fn seed_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        self.storage.set_last_hash(checkpoint.last_block_hash).await?;
        self.storage.put_chunk_hashes(&checkpoint.chunk_hashes).await?;
        debug!(
            target: "chunk_store",
            chunks = checkpoint.chunk_hashes.len(),
            last_hash = %checkpoint.last_block_hash,
            "Seeded storage from checkpoint"
        );
        Ok(())
    }

    /// Persists a verified batch of consecutive headers extending the current
    /// tip and returns the new tip.
    ///
    /// In compact mode the commit iterates over every 2016-header boundary
    /// the batch crosses: the buffered headers plus just enough of the input
    /// form a full group, whose hash is appended as one confirmed chunk while
    /// the raw buffer is emptied. A group is never partially confirmed.
    pub async fn commit_headers(&self, headers: &[RawHeader]) -> Result<Latest, StorageError> {
        let Some(last) = headers.last() else {
            return self.latest_from_storage().await;
        };

        let start_height = self.height().await?;
        let tip =
            Latest { hash: header_hash(last), height: start_height + headers.len() as i64 };

        if !self.storage.is_compact() {
            self.storage.put_headers(headers).await?;
            self.storage.set_last_hash(tip.hash).await?;
            return Ok(tip);
        }

        let mut remaining = headers;
        loop {
            let buffered = self.storage.headers_count().await?;
            if buffered + remaining.len() < CHUNK_SIZE {
                if !remaining.is_empty() {
                    self.storage.put_headers(remaining).await?;
                }
                break;
            }

            // Assemble the full group from the buffer plus the batch prefix.
            let take = CHUNK_SIZE - buffered;
            let mut group = Vec::with_capacity(CHUNK_SIZE);
            for index in 0..buffered {
                group.push(self.storage.header(index).await?);
            }
            group.extend_from_slice(&remaining[..take]);

            let chunk_hash = ChunkHash::of_group(&group);
            let group_tip = header_hash(&group[CHUNK_SIZE - 1]);
            self.storage.put_chunk_hashes(&[chunk_hash]).await?;
            self.storage.truncate_headers(0).await?;
            self.storage.set_last_hash(group_tip).await?;
            debug!(target: "chunk_store", %chunk_hash, tip = %group_tip, "Confirmed chunk");

            remaining = &remaining[take..];
        }

        self.storage.set_last_hash(tip.hash).await?;
        Ok(tip)
    }

    /// Reads a raw header from the backend's buffer.
    ///
    /// In full mode `height` addresses the complete header list; in compact
    /// mode the caller must have established that `height` falls inside the
    /// current incomplete chunk, whose buffer is addressed modulo 2016.
    pub async fn stored_header_at(&self, height: i64) -> Result<RawHeader, StorageError> {
        let index = if self.storage.is_compact() {
            height.rem_euclid(CHUNK_SIZE as i64)
        } else {
            height
        };
        self.storage.header(index as usize).await
    }

    /// Full-mode reorg step: drops the tip header and re-derives the new tip
    /// from the stored header below it.
    pub async fn pop_tip(&self, current: &Latest) -> Result<Latest, StorageError> {
        if current.height <= 0 {
            self.storage.truncate_headers(0).await?;
            self.storage.set_last_hash(BlockHash::ZERO).await?;
            return Ok(Latest::GENESIS);
        }

        let new_height = current.height - 1;
        let raw = self.storage.header(new_height as usize).await?;
        let tip = Latest { hash: header_hash(&raw), height: new_height };

        self.storage.truncate_headers((new_height + 1) as usize).await?;
        self.storage.set_last_hash(tip.hash).await?;
        Ok(tip)
    }

    /// Compact-mode reorg step: keeps the first `chunks` confirmed chunk
    /// hashes, drops the raw buffer and persists the new tip hash.
    pub async fn rewind_to_chunk(
        &self,
        chunks: usize,
        last_hash: BlockHash,
    ) -> Result<(), StorageError> {
        self.storage.truncate_headers(0).await?;
        self.storage.truncate_chunk_hashes(chunks).await?;
        self.storage.set_last_hash(last_hash).await?;
        debug!(target: "chunk_store", chunks, %last_hash, "Rewound to confirmed chunk boundary");
        Ok(())
    }

    /// The number of stored confirmed-chunk hashes.
    pub async fn chunk_hashes_count(&self) -> Result<usize, StorageError> {
        self.storage.chunk_hashes_count().await
    }

    /// Reads the confirmed-chunk hash at `index`.
    pub async fn chunk_hash(&self, index: usize) -> Result<ChunkHash, StorageError> {
        self.storage.chunk_hash(index).await
    }

    /// The number of buffered raw headers.
    pub async fn headers_count(&self) -> Result<usize, StorageError> {
        self.storage.headers_count().await
    }
}
