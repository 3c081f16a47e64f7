//! Chain and network error taxonomy.

use spv_primitives::{CodecError, Txid};
use spv_storage::StorageError;
use std::sync::Arc;
use thiserror::Error;

/// A failure reported by the remote data provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// The requested height or hash is unknown to the provider.
    #[error("header not found ({0})")]
    HeaderNotFound(String),

    /// The requested transaction is unknown to the provider.
    #[error("transaction not found ({0})")]
    TxNotFound(Txid),

    /// The provider rejected a transaction broadcast.
    #[error("can't send transaction: {0}")]
    TxSendError(String),

    /// A subscription request failed.
    #[error("subscribe error: {0}")]
    Subscribe(String),

    /// A transport-level failure: connection loss, timeout, malformed
    /// response.
    #[error("transport error: {0}")]
    Transport(String),
}

/// An error from the synchronization engine or its verified query APIs.
///
/// The `Verify*` variants signal a local inconsistency or a misbehaving
/// remote provider; they are never retried automatically.
#[derive(Error, Debug)]
pub enum ChainError {
    /// A propagated provider failure.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// A propagated storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Raw header material failed to decode.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A header resolved through two independent paths disagreed, or a
    /// height was requested that the local chain has not imported.
    #[error("header {subject}: {reason}")]
    VerifyHeader {
        /// The queried height or hash.
        subject: String,
        /// Why verification failed.
        reason: String,
    },

    /// A fetched header batch failed proof-of-work or linkage checks.
    #[error("blockchain verification failed at height {height}: {reason}")]
    VerifyBlockchain {
        /// The height of the first failing header.
        height: i64,
        /// Why verification failed.
        reason: String,
    },

    /// A fetched chunk's recomputed hash disagreed with the stored
    /// checkpoint hash.
    #[error("chunk #{index}: {reason}")]
    VerifyChunk {
        /// The chunk index.
        index: i64,
        /// Why verification failed.
        reason: String,
    },

    /// A merkle proof or address-history cross-check failed.
    #[error("txid {txid}: {reason}")]
    VerifyTx {
        /// The transaction in question.
        txid: Txid,
        /// Why verification failed.
        reason: String,
    },

    /// The engine and its storage backend were constructed with different
    /// compact-mode settings.
    #[error("storage and blockchain have different compact mode")]
    StorageModeMismatch,

    /// A failure observed through a shared single-flight fetch.
    #[error("{0}")]
    Shared(Arc<ChainError>),
}

impl ChainError {
    /// Whether this error is, possibly through shared-fetch indirection, the
    /// provider's not-found answer for a header query.
    pub fn is_header_not_found(&self) -> bool {
        match self {
            Self::Network(NetworkError::HeaderNotFound(_)) => true,
            Self::Shared(inner) => inner.is_header_not_found(),
            _ => false,
        }
    }
}
