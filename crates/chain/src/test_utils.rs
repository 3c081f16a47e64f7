//! Shared scaffolding for engine tests: a scripted provider, chain
//! generators and a linkage-only verifier for chains whose proof-of-work
//! cannot be minted in tests.

use crate::{
    AddressesQuery, AddressesQueryOpts, ChainError, HeaderQuery, HeaderVerifier, Network,
    NetworkError, NetworkEvent, NetworkHeader, RetargetSource, Subscription, TxMerkle,
};
use alloy_primitives::hex;
use async_trait::async_trait;
use spv_primitives::{
    BlockHash, BlockHeader, CHUNK_SIZE, Latest, RawHeader, Txid, header_hash, raw_prev_hash,
};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};
use tokio::sync::broadcast;

/// Extends `chain` with linked dummy headers until it holds `total` entries.
/// `salt` varies the content so forks diverge.
pub(crate) fn extend_chain(mut chain: Vec<RawHeader>, total: usize, salt: u32) -> Vec<RawHeader> {
    while chain.len() < total {
        let index = chain.len() as u32;
        let mut merkle = [0u8; 32];
        merkle[..4].copy_from_slice(&index.to_le_bytes());
        merkle[4..8].copy_from_slice(&salt.to_le_bytes());

        let header = BlockHeader {
            version: 2,
            prev_blockhash: chain.last().map_or(BlockHash::ZERO, header_hash),
            merkle_root: BlockHash::from_raw(merkle),
            time: 1_300_000_000 + index * 600,
            bits: 0x1d00ffff,
            nonce: index,
        };
        chain.push(header.encode());
    }
    chain
}

/// A fresh linked chain of `len` dummy headers from genesis.
pub(crate) fn make_chain(len: usize) -> Vec<RawHeader> {
    extend_chain(Vec::new(), len, 0)
}

/// A chain sharing the first `keep` headers with `base`, then diverging and
/// growing to `total` headers.
pub(crate) fn fork_chain(base: &[RawHeader], keep: usize, total: usize) -> Vec<RawHeader> {
    extend_chain(base[..keep].to_vec(), total, 0xdead_beef)
}

/// A [`HeaderVerifier`] checking only chain linkage. Engine tests run on
/// generated chains whose hashes cannot meet real targets.
#[derive(Debug)]
pub(crate) struct LinkageVerifier;

#[async_trait]
impl HeaderVerifier for LinkageVerifier {
    async fn verify(
        &self,
        _source: &dyn RetargetSource,
        start_height: i64,
        headers: &[RawHeader],
        previous: Option<RawHeader>,
    ) -> Result<(), ChainError> {
        let mut prev = previous.as_ref().map(header_hash);
        for (offset, raw) in headers.iter().enumerate() {
            if let Some(expected) = prev {
                if raw_prev_hash(raw) != expected {
                    return Err(ChainError::VerifyBlockchain {
                        height: start_height + offset as i64,
                        reason: "broken linkage".to_string(),
                    });
                }
            }
            prev = Some(header_hash(raw));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Inner {
    chain: Vec<RawHeader>,
    txs: HashMap<Txid, String>,
    merkles: HashMap<Txid, Option<TxMerkle>>,
    addresses: Option<AddressesQuery>,
    hash_lie: Option<NetworkHeader>,
    sent: Vec<String>,
}

/// A scripted in-memory provider. Serves a settable header chain, records
/// call counts, and can be instructed to lie on hash lookups.
#[derive(Debug)]
pub(crate) struct FakeNetwork {
    inner: spin::Mutex<Inner>,
    events_tx: broadcast::Sender<NetworkEvent>,
    headers_calls: AtomicUsize,
    tx_calls: AtomicUsize,
    headers_log: spin::Mutex<Vec<Option<i64>>>,
}

impl FakeNetwork {
    pub(crate) fn with_chain(chain: Vec<RawHeader>) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Self {
            inner: spin::Mutex::new(Inner { chain, ..Inner::default() }),
            events_tx,
            headers_calls: AtomicUsize::new(0),
            tx_calls: AtomicUsize::new(0),
            headers_log: spin::Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_chain(&self, chain: Vec<RawHeader>) {
        self.inner.lock().chain = chain;
    }

    pub(crate) fn chain(&self) -> Vec<RawHeader> {
        self.inner.lock().chain.clone()
    }

    pub(crate) fn tip(&self) -> Latest {
        let inner = self.inner.lock();
        let height = inner.chain.len() as i64 - 1;
        let hash = inner.chain.last().map_or(BlockHash::ZERO, header_hash);
        Latest { hash, height }
    }

    pub(crate) fn put_tx(&self, txid: Txid, raw_hex: String) {
        self.inner.lock().txs.insert(txid, raw_hex);
    }

    pub(crate) fn put_merkle(&self, txid: Txid, claim: Option<TxMerkle>) {
        self.inner.lock().merkles.insert(txid, claim);
    }

    pub(crate) fn set_addresses(&self, answer: AddressesQuery) {
        self.inner.lock().addresses = Some(answer);
    }

    pub(crate) fn set_hash_lie(&self, header: NetworkHeader) {
        self.inner.lock().hash_lie = Some(header);
    }

    pub(crate) fn emit(&self, event: NetworkEvent) {
        let _ = self.events_tx.send(event);
    }

    pub(crate) fn tx_calls(&self) -> usize {
        self.tx_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn headers_calls(&self) -> usize {
        self.headers_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn headers_log(&self) -> Vec<Option<i64>> {
        self.headers_log.lock().clone()
    }

    pub(crate) fn sent_txs(&self) -> Vec<String> {
        self.inner.lock().sent.clone()
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn header(&self, query: HeaderQuery) -> Result<NetworkHeader, NetworkError> {
        let inner = self.inner.lock();
        match query {
            HeaderQuery::Latest => {
                let height = inner.chain.len() as i64 - 1;
                inner
                    .chain
                    .last()
                    .map(|raw| NetworkHeader::from_raw(height, raw))
                    .ok_or_else(|| NetworkError::HeaderNotFound("latest".to_string()))
            }
            HeaderQuery::Height(height) => inner
                .chain
                .get(usize::try_from(height).unwrap_or(usize::MAX))
                .map(|raw| NetworkHeader::from_raw(height, raw))
                .ok_or_else(|| NetworkError::HeaderNotFound(format!("height {height}"))),
            HeaderQuery::Hash(hash) => {
                if let Some(lie) = inner.hash_lie {
                    return Ok(lie);
                }
                inner
                    .chain
                    .iter()
                    .enumerate()
                    .find(|(_, raw)| header_hash(raw) == hash)
                    .map(|(height, raw)| NetworkHeader::from_raw(height as i64, raw))
                    .ok_or_else(|| NetworkError::HeaderNotFound(format!("hash {hash}")))
            }
        }
    }

    async fn headers(
        &self,
        from_exclusive: Option<i64>,
        to_inclusive: Option<i64>,
    ) -> Result<String, NetworkError> {
        self.headers_calls.fetch_add(1, Ordering::SeqCst);
        self.headers_log.lock().push(from_exclusive);

        let inner = self.inner.lock();
        let start = from_exclusive.map_or(0i64, |from| from + 1);
        if start < 0 || start as usize >= inner.chain.len() {
            return Err(NetworkError::HeaderNotFound(format!("after {from_exclusive:?}")));
        }

        let mut end = (start as usize + CHUNK_SIZE).min(inner.chain.len());
        if let Some(to) = to_inclusive {
            end = end.min((to + 1).max(0) as usize);
        }

        let bytes: Vec<u8> =
            inner.chain[start as usize..end].iter().flat_map(|raw| raw.to_vec()).collect();
        Ok(hex::encode(bytes))
    }

    async fn tx(&self, txid: &Txid) -> Result<String, NetworkError> {
        self.tx_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.lock().txs.get(txid).cloned().ok_or(NetworkError::TxNotFound(*txid))
    }

    async fn tx_merkle(&self, txid: &Txid) -> Result<Option<TxMerkle>, NetworkError> {
        self.inner.lock().merkles.get(txid).cloned().ok_or(NetworkError::TxNotFound(*txid))
    }

    async fn send_tx(&self, raw_hex: &str) -> Result<(), NetworkError> {
        self.inner.lock().sent.push(raw_hex.to_string());
        Ok(())
    }

    async fn addresses_query(
        &self,
        _addresses: &[String],
        _opts: &AddressesQueryOpts,
    ) -> Result<AddressesQuery, NetworkError> {
        let answer = self.inner.lock().addresses.clone();
        Ok(answer.unwrap_or(AddressesQuery { data: Vec::new(), latest: self.tip() }))
    }

    async fn subscribe(&self, _subscription: Subscription) -> Result<(), NetworkError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn events(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events_tx.subscribe()
    }
}
