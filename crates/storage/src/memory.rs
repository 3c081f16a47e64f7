//! In-memory reference backend.

use crate::{Storage, StorageError};
use async_trait::async_trait;
use spv_primitives::{BlockHash, ChunkHash, MAX_BUFFERED_HEADERS, RawHeader};

#[derive(Debug)]
struct Inner {
    last_hash: BlockHash,
    headers: Vec<RawHeader>,
    chunk_hashes: Vec<ChunkHash>,
}

impl Inner {
    const fn empty() -> Self {
        Self { last_hash: BlockHash::ZERO, headers: Vec::new(), chunk_hashes: Vec::new() }
    }
}

/// A [`Storage`] backend holding everything in process memory.
///
/// Used as the reference implementation in tests and as a starting point for
/// embedders; it honors the full compact/full mode contract of the trait.
#[derive(Debug)]
pub struct MemoryStorage {
    compact: bool,
    inner: spin::Mutex<Inner>,
}

impl MemoryStorage {
    /// Creates an empty store in the given retention mode.
    pub const fn new(compact: bool) -> Self {
        Self { compact, inner: spin::Mutex::new(Inner::empty()) }
    }

    fn compact_only(&self) -> Result<(), StorageError> {
        if self.compact { Ok(()) } else { Err(StorageError::CompactModeForbidden) }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn is_compact(&self) -> bool {
        self.compact
    }

    async fn ready(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn last_hash(&self) -> Result<BlockHash, StorageError> {
        Ok(self.inner.lock().last_hash)
    }

    async fn set_last_hash(&self, hash: BlockHash) -> Result<(), StorageError> {
        self.inner.lock().last_hash = hash;
        Ok(())
    }

    async fn headers_count(&self) -> Result<usize, StorageError> {
        Ok(self.inner.lock().headers.len())
    }

    async fn header(&self, index: usize) -> Result<RawHeader, StorageError> {
        let inner = self.inner.lock();
        inner
            .headers
            .get(index)
            .copied()
            .ok_or(StorageError::HeaderIndex { index, count: inner.headers.len() })
    }

    async fn put_headers(&self, headers: &[RawHeader]) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        if self.compact && inner.headers.len() + headers.len() > MAX_BUFFERED_HEADERS {
            return Err(StorageError::CompactModeLimitation(format!(
                "can store at most {MAX_BUFFERED_HEADERS} headers"
            )));
        }
        inner.headers.extend_from_slice(headers);
        Ok(())
    }

    async fn truncate_headers(&self, limit: usize) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        inner.headers.truncate(limit);
        Ok(())
    }

    async fn chunk_hashes_count(&self) -> Result<usize, StorageError> {
        self.compact_only()?;
        Ok(self.inner.lock().chunk_hashes.len())
    }

    async fn chunk_hash(&self, index: usize) -> Result<ChunkHash, StorageError> {
        self.compact_only()?;
        let inner = self.inner.lock();
        inner
            .chunk_hashes
            .get(index)
            .copied()
            .ok_or(StorageError::ChunkHashIndex { index, count: inner.chunk_hashes.len() })
    }

    async fn put_chunk_hashes(&self, hashes: &[ChunkHash]) -> Result<(), StorageError> {
        self.compact_only()?;
        self.inner.lock().chunk_hashes.extend_from_slice(hashes);
        Ok(())
    }

    async fn truncate_chunk_hashes(&self, limit: usize) -> Result<(), StorageError> {
        self.compact_only()?;
        self.inner.lock().chunk_hashes.truncate(limit);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        *self.inner.lock() = Inner::empty();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunk_hash_operations_require_compact_mode() {
        let storage = MemoryStorage::new(false);
        assert_eq!(storage.chunk_hashes_count().await, Err(StorageError::CompactModeForbidden));
        assert_eq!(
            storage.put_chunk_hashes(&[ChunkHash::from_raw([1u8; 32])]).await,
            Err(StorageError::CompactModeForbidden)
        );
        assert_eq!(storage.truncate_chunk_hashes(0).await, Err(StorageError::CompactModeForbidden));
    }

    #[tokio::test]
    async fn compact_mode_rejects_a_full_chunk_of_headers() {
        let storage = MemoryStorage::new(true);
        storage.put_headers(&vec![[0u8; 80]; MAX_BUFFERED_HEADERS]).await.unwrap();

        let err = storage.put_headers(&[[0u8; 80]]).await.unwrap_err();
        assert!(matches!(err, StorageError::CompactModeLimitation(_)));

        // A full-mode store takes the same batch without complaint.
        let storage = MemoryStorage::new(false);
        storage.put_headers(&vec![[0u8; 80]; MAX_BUFFERED_HEADERS + 1]).await.unwrap();
    }

    #[tokio::test]
    async fn out_of_range_reads_fail_with_index_errors() {
        let storage = MemoryStorage::new(true);
        storage.put_headers(&[[7u8; 80]]).await.unwrap();

        assert_eq!(storage.header(0).await.unwrap(), [7u8; 80]);
        assert_eq!(storage.header(1).await, Err(StorageError::HeaderIndex { index: 1, count: 1 }));
        assert_eq!(
            storage.chunk_hash(0).await,
            Err(StorageError::ChunkHashIndex { index: 0, count: 0 })
        );
    }

    #[tokio::test]
    async fn clear_wipes_everything() {
        let storage = MemoryStorage::new(true);
        storage.set_last_hash(BlockHash::from_raw([9u8; 32])).await.unwrap();
        storage.put_headers(&[[1u8; 80]]).await.unwrap();
        storage.put_chunk_hashes(&[ChunkHash::from_raw([2u8; 32])]).await.unwrap();

        storage.clear().await.unwrap();
        assert_eq!(storage.last_hash().await.unwrap(), BlockHash::ZERO);
        assert_eq!(storage.headers_count().await.unwrap(), 0);
        assert_eq!(storage.chunk_hashes_count().await.unwrap(), 0);
    }
}
