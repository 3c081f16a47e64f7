//! The storage collaborator boundary.

use crate::StorageError;
use async_trait::async_trait;
use spv_primitives::{BlockHash, ChunkHash, RawHeader};

/// The persistence boundary for header-chain state.
///
/// A backend is constructed in a fixed retention mode, reported by
/// [`Storage::is_compact`]:
///
/// - **full**: every raw header from genesis is kept; the chunk-hash
///   operations fail with [`StorageError::CompactModeForbidden`].
/// - **compact**: only confirmed-chunk hashes are kept, plus the raw headers
///   of the current incomplete chunk. [`Storage::put_headers`] fails with
///   [`StorageError::CompactModeLimitation`] when the buffered count would
///   exceed 2015 headers.
///
/// Implementations must be usable from concurrent tasks; every operation may
/// suspend and may fail.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Whether this backend runs in compact mode. Fixed at construction.
    fn is_compact(&self) -> bool;

    /// Resolves once the backend is open and usable.
    async fn ready(&self) -> Result<(), StorageError>;

    /// Returns the persisted hash of the last known header, or the zero hash
    /// when empty.
    async fn last_hash(&self) -> Result<BlockHash, StorageError>;

    /// Persists the hash of the last known header.
    async fn set_last_hash(&self, hash: BlockHash) -> Result<(), StorageError>;

    /// The number of stored raw headers.
    async fn headers_count(&self) -> Result<usize, StorageError>;

    /// Reads the raw header at `index`.
    async fn header(&self, index: usize) -> Result<RawHeader, StorageError>;

    /// Appends raw headers to the store.
    async fn put_headers(&self, headers: &[RawHeader]) -> Result<(), StorageError>;

    /// Drops stored raw headers beyond the first `limit`.
    async fn truncate_headers(&self, limit: usize) -> Result<(), StorageError>;

    /// The number of stored confirmed-chunk hashes. Compact mode only.
    async fn chunk_hashes_count(&self) -> Result<usize, StorageError>;

    /// Reads the confirmed-chunk hash at `index`. Compact mode only.
    async fn chunk_hash(&self, index: usize) -> Result<ChunkHash, StorageError>;

    /// Appends confirmed-chunk hashes. Compact mode only.
    async fn put_chunk_hashes(&self, hashes: &[ChunkHash]) -> Result<(), StorageError>;

    /// Drops stored chunk hashes beyond the first `limit`. Compact mode only.
    async fn truncate_chunk_hashes(&self, limit: usize) -> Result<(), StorageError>;

    /// Wipes all persisted state.
    async fn clear(&self) -> Result<(), StorageError>;
}
