//! The remote data-provider boundary.
//!
//! Everything the engine knows about the outside world arrives through the
//! [`Network`] trait. The provider is untrusted: every answer is treated as a
//! claim to be re-verified. Transport concerns (HTTP, WebSockets, retry,
//! failover, request concurrency) live behind implementations of this trait.

use crate::NetworkError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spv_primitives::{BlockHash, BlockHeader, Latest, RawHeader, Txid, header_hash};
use tokio::sync::broadcast;

/// A header lookup key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderQuery {
    /// By chain height.
    Height(i64),
    /// By block hash.
    Hash(BlockHash),
    /// The provider's current best header.
    Latest,
}

impl std::fmt::Display for HeaderQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Height(height) => write!(f, "height {height}"),
            Self::Hash(hash) => write!(f, "hash {hash}"),
            Self::Latest => f.write_str("latest"),
        }
    }
}

/// A provider's answer to a header query: the decoded fields plus the chain
/// position it claims for them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkHeader {
    /// The claimed height.
    pub height: i64,
    /// The block hash.
    pub hash: BlockHash,
    /// The block version.
    pub version: u32,
    /// The hash of the preceding block.
    #[serde(rename = "hashPrevBlock")]
    pub prev_blockhash: BlockHash,
    /// The merkle root of the block's transactions.
    #[serde(rename = "hashMerkleRoot")]
    pub merkle_root: BlockHash,
    /// The block timestamp.
    pub time: u32,
    /// The compact proof-of-work target.
    pub bits: u32,
    /// The proof-of-work nonce.
    pub nonce: u32,
}

impl NetworkHeader {
    /// Builds the answer for a raw header at a known height, recomputing the
    /// hash from the bytes.
    pub fn from_raw(height: i64, raw: &RawHeader) -> Self {
        let header = BlockHeader::from_raw(raw);
        Self {
            height,
            hash: header_hash(raw),
            version: header.version,
            prev_blockhash: header.prev_blockhash,
            merkle_root: header.merkle_root,
            time: header.time,
            bits: header.bits,
            nonce: header.nonce,
        }
    }

    /// The chain position this header claims.
    pub const fn latest(&self) -> Latest {
        Latest { hash: self.hash, height: self.height }
    }
}

/// A provider's merkle-inclusion claim for a confirmed transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMerkle {
    /// The hash of the block claimed to include the transaction.
    pub hash: BlockHash,
    /// The claimed block height.
    pub height: i64,
    /// The transaction's index within the block.
    pub index: u64,
    /// The sibling-hash branch up to the merkle root.
    pub merkle: Vec<Txid>,
}

/// Options for an address-history query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AddressesQueryOpts {
    /// Lower height bound, inclusive.
    pub from: Option<i64>,
    /// Upper height bound, inclusive.
    pub to: Option<i64>,
    /// Restrict results to unspent outputs.
    pub unspent: bool,
}

/// One entry of an address-history answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressTx {
    /// The transaction id.
    pub txid: Txid,
    /// The claimed confirmation height; `None` for unconfirmed.
    pub height: Option<i64>,
}

/// A provider's answer to an address-history query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressesQuery {
    /// The matching transactions.
    pub data: Vec<AddressTx>,
    /// The provider's chain tip at answer time.
    pub latest: Latest,
}

/// A push-notification subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subscription {
    /// Notify on every new best block.
    NewBlock,
    /// Notify on transactions touching an address.
    NewTx {
        /// The watched address.
        address: String,
    },
}

/// The connection lifecycle of a provider transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyState {
    /// The transport is being established.
    Connecting,
    /// The transport is usable.
    Open,
    /// The transport is shutting down.
    Closing,
    /// The transport is closed.
    Closed,
}

/// Events pushed by a provider transport.
#[derive(Clone, Debug)]
pub enum NetworkEvent {
    /// The transport (re)connected.
    Connected,
    /// The transport disconnected.
    Disconnected,
    /// The transport moved between ready states.
    ReadyState {
        /// The previous state.
        from: ReadyState,
        /// The new state.
        to: ReadyState,
    },
    /// The provider announced a new best block.
    NewBlock(Latest),
    /// The provider announced a transaction on a watched address.
    NewTx {
        /// The announced transaction.
        txid: Txid,
        /// The watched address it touches.
        address: String,
    },
}

/// The remote data provider.
///
/// Any call may suspend and may fail; timeouts and retries are the
/// implementation's responsibility and surface as ordinary errors.
#[async_trait]
pub trait Network: Send + Sync {
    /// Resolves a single header claim.
    async fn header(&self, query: HeaderQuery) -> Result<NetworkHeader, NetworkError>;

    /// Fetches up to 2016 consecutive raw headers as concatenated hex,
    /// starting strictly after `from_exclusive` (`None` starts at genesis)
    /// and optionally stopping at `to_inclusive`.
    async fn headers(
        &self,
        from_exclusive: Option<i64>,
        to_inclusive: Option<i64>,
    ) -> Result<String, NetworkError>;

    /// Fetches a raw transaction as hex.
    async fn tx(&self, txid: &Txid) -> Result<String, NetworkError>;

    /// Fetches the merkle-inclusion claim for a transaction; `None` when the
    /// provider considers it unconfirmed.
    async fn tx_merkle(&self, txid: &Txid) -> Result<Option<TxMerkle>, NetworkError>;

    /// Broadcasts a raw transaction.
    async fn send_tx(&self, raw_hex: &str) -> Result<(), NetworkError>;

    /// Queries the history of a set of addresses.
    async fn addresses_query(
        &self,
        addresses: &[String],
        opts: &AddressesQueryOpts,
    ) -> Result<AddressesQuery, NetworkError>;

    /// Registers a push-notification subscription.
    async fn subscribe(&self, subscription: Subscription) -> Result<(), NetworkError>;

    /// Whether the transport currently considers itself connected.
    fn is_connected(&self) -> bool;

    /// A fresh receiver for transport events.
    fn events(&self) -> broadcast::Receiver<NetworkEvent>;
}
