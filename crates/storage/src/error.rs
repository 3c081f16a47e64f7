//! Storage error taxonomy.

use spv_primitives::CodecError;
use thiserror::Error;

/// An error from a [`Storage`](crate::Storage) backend or the
/// [`ChunkStore`](crate::ChunkStore) bookkeeping on top of it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A chunk-hash operation was invoked on a full-mode store.
    #[error("operation is only allowed on a compact-mode store")]
    CompactModeForbidden,

    /// A compact-mode store was asked to buffer more raw headers than one
    /// incomplete chunk can hold.
    #[error("compact mode limitation: {0}")]
    CompactModeLimitation(String),

    /// A raw-header read outside the stored range.
    #[error("no header at index {index} (count: {count})")]
    HeaderIndex {
        /// The requested index.
        index: usize,
        /// The number of stored headers.
        count: usize,
    },

    /// A chunk-hash read outside the stored range.
    #[error("no chunk hash at index {index} (count: {count})")]
    ChunkHashIndex {
        /// The requested index.
        index: usize,
        /// The number of stored chunk hashes.
        count: usize,
    },

    /// Stored bytes failed to decode.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A backend-specific failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}
