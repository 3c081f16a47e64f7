//! The verified engine variant: bootstrap, sync cycles, reorg recovery and
//! verified query APIs.

use crate::{
    AddressesQuery, AddressesQueryOpts, BlockchainSource, ChainError, ChainEvent, ChainVerifier,
    HeaderQuery, HeaderVerifier, Network, NetworkError, NetworkEvent, NetworkHeader, RequestCache,
    RetargetSource, Subscription,
    source::{EVENT_CHANNEL_CAPACITY, SyncGate},
};
use async_trait::async_trait;
use spv_primitives::{
    CHUNK_SIZE, Checkpoint, ChunkHash, Latest, RawHeader, Txid, header_hash,
    merkle_root_from_branch, raw_prev_hash, split_concat_hex,
};
use spv_storage::{ChunkStore, Storage};
use std::sync::Arc;
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// [`CHUNK_SIZE`] as a height delta.
const CHUNK: i64 = CHUNK_SIZE as i64;

/// Below this tip gap a sync cycle fetches individual headers after the
/// local tip; at or above it, whole chunks.
const HEADER_SYNC_GAP: i64 = 50;

/// Construction parameters for [`Verified`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Retain only confirmed-chunk hashes plus the current partial chunk.
    pub compact: bool,
    /// Apply the testnet minimum-difficulty relaxation.
    pub testnet: bool,
    /// Pre-computed chunk hashes seeding an empty compact-mode store.
    pub checkpoint: Option<Checkpoint>,
    /// Capacity of the raw-transaction cache.
    pub tx_cache_size: usize,
    /// Capacity of the chunk cache.
    pub chunk_cache_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compact: false,
            testnet: false,
            checkpoint: None,
            tx_cache_size: 100,
            chunk_cache_size: 4,
        }
    }
}

/// A [`BlockchainSource`] that re-verifies every provider claim.
///
/// Headers are accepted only after linkage and proof-of-work checks against
/// the locally-persisted chain; header, confirmation and address-history
/// queries are cross-checked against it before anything is returned. The
/// provider can censor or stall, but it cannot make this engine report a
/// header or confirmation the verified chain does not back.
#[derive(Debug)]
pub struct Verified<N, S, V = ChainVerifier> {
    network: Arc<N>,
    store: ChunkStore<S>,
    verifier: V,
    compact: bool,
    checkpoint: Option<Checkpoint>,
    latest: spin::RwLock<Latest>,
    gate: spin::Mutex<SyncGate>,
    chunk_cache: RequestCache<i64, Arc<Vec<RawHeader>>>,
    tx_cache: RequestCache<Txid, String>,
    events_tx: broadcast::Sender<ChainEvent>,
}

impl<N: Network + 'static, S: Storage + 'static> Verified<N, S> {
    /// Creates the engine with the production chain rules.
    ///
    /// Fails with [`ChainError::StorageModeMismatch`] when the configured
    /// retention mode disagrees with the backend's.
    pub fn new(network: Arc<N>, storage: S, config: Config) -> Result<Self, ChainError> {
        let verifier = ChainVerifier::new(config.testnet);
        Self::with_verifier(network, storage, config, verifier)
    }
}

impl<N, S, V> Verified<N, S, V>
where
    N: Network + 'static,
    S: Storage + 'static,
    V: HeaderVerifier + 'static,
{
    /// Creates the engine with a caller-supplied [`HeaderVerifier`].
    pub fn with_verifier(
        network: Arc<N>,
        storage: S,
        config: Config,
        verifier: V,
    ) -> Result<Self, ChainError> {
        let store = ChunkStore::new(storage);
        if config.compact != store.is_compact() {
            return Err(ChainError::StorageModeMismatch);
        }

        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            network,
            store,
            verifier,
            compact: config.compact,
            checkpoint: config.checkpoint,
            latest: spin::RwLock::new(Latest::GENESIS),
            gate: spin::Mutex::new(SyncGate::default()),
            chunk_cache: RequestCache::new(config.chunk_cache_size),
            tx_cache: RequestCache::new(config.tx_cache_size),
            events_tx,
        })
    }

    /// A snapshot of the locally-verified tip.
    pub fn latest(&self) -> Latest {
        *self.latest.read()
    }

    /// A fresh receiver for [`ChainEvent`]s.
    pub fn events(&self) -> broadcast::Receiver<ChainEvent> {
        self.events_tx.subscribe()
    }

    /// Awaits storage readiness and adopts the persisted tip.
    ///
    /// An empty compact-mode store with a configured checkpoint is seeded
    /// from it first, skipping the initial header download. The checkpoint
    /// is trusted as out-of-band data here; its chunks are still re-verified
    /// against the stored hashes whenever their headers are fetched.
    pub async fn bootstrap(&self) -> Result<(), ChainError> {
        self.store.ready().await?;

        if self.compact && let Some(checkpoint) = &self.checkpoint {
            let empty = self.store.chunk_hashes_count().await? == 0
                && self.store.headers_count().await? == 0;
            if empty {
                self.store.seed_checkpoint(checkpoint).await?;
            }
        }

        let latest = self.store.latest_from_storage().await?;
        *self.latest.write() = latest;
        info!(target: "verified", height = latest.height, hash = %latest.hash, "Bootstrapped");

        if latest.height != -1 {
            let _ = self.events_tx.send(ChainEvent::NewBlock(latest));
        }
        Ok(())
    }

    /// Runs one synchronization cycle against the provider's best chain.
    ///
    /// Single-flight: a call arriving while a cycle runs coalesces into one
    /// follow-up run. Failures surface as [`ChainEvent::Error`] and leave
    /// the verified tip where the last commit put it.
    pub async fn sync(&self) {
        if !self.gate.lock().acquire() {
            return;
        }

        loop {
            let _ = self.events_tx.send(ChainEvent::SyncStarted);
            let saved = self.latest().hash;

            if let Err(err) = self.run_sync().await {
                warn!(target: "verified", %err, "Sync cycle failed");
                let _ = self.events_tx.send(ChainEvent::Error(Arc::new(err)));
            }

            let latest = self.latest();
            if latest.hash != saved {
                let _ = self.events_tx.send(ChainEvent::NewBlock(latest));
            }
            let _ = self.events_tx.send(ChainEvent::SyncStopped);

            if !self.gate.lock().release() {
                break;
            }
        }
    }

    async fn run_sync(&self) -> Result<(), ChainError> {
        let network_tip = self.network.header(HeaderQuery::Latest).await?.latest();
        let mut local = self.latest();
        if local.hash == network_tip.hash {
            return Ok(());
        }

        debug!(
            target: "verified",
            local = local.height,
            network = network_tip.height,
            "Syncing"
        );
        self.invalidate_chunks_after(&local, &network_tip);

        if local.height >= network_tip.height {
            local = self.handle_reorg(local).await?;
            self.invalidate_chunks_after(&local, &network_tip);
            // The rewind may have landed exactly on the provider's tip.
            if local.hash == network_tip.hash {
                return Ok(());
            }
        }

        if network_tip.height - local.height < HEADER_SYNC_GAP {
            self.sync_headers(local, &network_tip).await
        } else {
            self.sync_chunks(local, &network_tip).await
        }
    }

    /// Drops cached chunks between the local tip's next boundary and the
    /// network's chunk index. A reorg or a fork extension makes those
    /// entries stale while anything below stays valid.
    fn invalidate_chunks_after(&self, local: &Latest, network_tip: &Latest) {
        let from = (local.height + 1).div_euclid(CHUNK);
        for index in from..=network_tip.chunk_index() {
            self.chunk_cache.invalidate(&index);
        }
    }

    /// The small-gap path: one fetch of the headers after the local tip.
    async fn sync_headers(&self, mut local: Latest, network_tip: &Latest) -> Result<(), ChainError> {
        let mut headers = self.fetch_headers_after(local.height, network_tip.height).await?;

        if let Some(first) = headers.first() {
            if raw_prev_hash(first) != local.hash {
                local = self.handle_reorg(local).await?;
                self.invalidate_chunks_after(&local, network_tip);
                if local.hash == network_tip.hash {
                    return Ok(());
                }
                headers = self.fetch_headers_after(local.height, network_tip.height).await?;
            }
        }
        if let Some(first) = headers.first() {
            if raw_prev_hash(first) != local.hash {
                return Err(ChainError::VerifyBlockchain {
                    height: local.height + 1,
                    reason: "fetched headers do not link to the local tip".to_string(),
                });
            }
        }

        self.verify_and_commit(local, &headers).await?;
        Ok(())
    }

    /// The large-gap path: iterate whole chunks up to the network's chunk
    /// index, emitting a `NewBlock` snapshot per commit.
    async fn sync_chunks(&self, mut local: Latest, network_tip: &Latest) -> Result<(), ChainError> {
        let mut index = (local.height + 1).div_euclid(CHUNK);
        let last = network_tip.chunk_index();

        while index <= last {
            let group = self.chunk(index).await?;

            // A mid-chunk tip overlaps the front of its own chunk.
            let skip = usize::try_from(local.height + 1 - index * CHUNK).unwrap_or(0);
            let fresh = group.get(skip..).unwrap_or_default();

            let Some(first) = fresh.first() else {
                self.chunk_cache.invalidate(&index);
                return Err(ChainError::VerifyChunk {
                    index,
                    reason: "provider returned no headers past the local tip".to_string(),
                });
            };

            if raw_prev_hash(first) != local.hash {
                self.chunk_cache.invalidate(&index);
                if local.height == -1 {
                    return Err(ChainError::VerifyBlockchain {
                        height: 0,
                        reason: "first header is not a genesis header".to_string(),
                    });
                }
                local = self.handle_reorg(local).await?;
                self.invalidate_chunks_after(&local, network_tip);
                if local.hash == network_tip.hash {
                    return Ok(());
                }
                index = (local.height + 1).div_euclid(CHUNK);
                continue;
            }

            let committed = self.verify_and_commit(local, fresh).await;
            let new_tip = match committed {
                Ok(tip) => tip,
                Err(err) => {
                    self.chunk_cache.invalidate(&index);
                    return Err(err);
                }
            };
            if group.len() != CHUNK_SIZE {
                // Partial tip chunk; the next cycle must refetch it.
                self.chunk_cache.invalidate(&index);
            }

            debug!(target: "verified", index, height = new_tip.height, "Committed chunk");
            let _ = self.events_tx.send(ChainEvent::NewBlock(new_tip));
            local = new_tip;
            index += 1;
        }
        Ok(())
    }

    /// Fetches the headers strictly after `from` up to `to`, decoded.
    async fn fetch_headers_after(&self, from: i64, to: i64) -> Result<Vec<RawHeader>, ChainError> {
        let from = (from >= 0).then_some(from);
        let concat = self.network.headers(from, Some(to)).await?;
        Ok(split_concat_hex(&concat)?)
    }

    /// Fetches the raw headers of chunk `index` through the single-flight
    /// chunk cache. No hash verification happens here.
    async fn chunk(&self, index: i64) -> Result<Arc<Vec<RawHeader>>, ChainError> {
        let network = self.network.clone();
        self.chunk_cache
            .get(index, move || async move {
                let from = (index > 0).then(|| index * CHUNK - 1);
                let to = (index + 1) * CHUNK - 1;
                let concat = network.headers(from, Some(to)).await?;
                Ok(Arc::new(split_concat_hex(&concat)?))
            })
            .await
            .map_err(ChainError::Shared)
    }

    /// Fetches confirmed chunk `index` and requires its recomputed hash to
    /// match the stored checkpoint hash.
    async fn verified_chunk(&self, index: i64) -> Result<Arc<Vec<RawHeader>>, ChainError> {
        let group = self.chunk(index).await?;
        if group.len() != CHUNK_SIZE {
            self.chunk_cache.invalidate(&index);
            return Err(ChainError::VerifyChunk {
                index,
                reason: format!("expected {CHUNK_SIZE} headers, got {}", group.len()),
            });
        }

        let stored = self.store.chunk_hash(index as usize).await?;
        if ChunkHash::of_group(group.as_slice()) != stored {
            self.chunk_cache.invalidate(&index);
            return Err(ChainError::VerifyChunk {
                index,
                reason: "recomputed hash disagrees with the stored checkpoint".to_string(),
            });
        }
        Ok(group)
    }

    /// Verifies `headers` as the extension of `tip` and persists them.
    async fn verify_and_commit(
        &self,
        tip: Latest,
        headers: &[RawHeader],
    ) -> Result<Latest, ChainError> {
        if headers.is_empty() {
            return Ok(tip);
        }

        let previous = if tip.height >= 0 {
            Some(self.raw_header_at(tip.height).await?)
        } else {
            None
        };
        self.verifier.verify(self, tip.height + 1, headers, previous).await?;

        let new_tip = self.store.commit_headers(headers).await?;
        *self.latest.write() = new_tip;
        Ok(new_tip)
    }

    /// Resolves the raw header at a height the verified chain has imported.
    ///
    /// Full mode reads storage directly. Compact mode reads the partial-chunk
    /// buffer for heights past the confirmed chunks, and otherwise refetches
    /// the confirmed chunk and checks it against the stored hash.
    async fn raw_header_at(&self, height: i64) -> Result<RawHeader, ChainError> {
        let latest = self.latest();
        if height < 0 || height > latest.height {
            return Err(ChainError::VerifyHeader {
                subject: height.to_string(),
                reason: "not present on the verified chain".to_string(),
            });
        }

        if !self.compact {
            return Ok(self.store.stored_header_at(height).await?);
        }

        let confirmed = self.store.chunk_hashes_count().await? as i64;
        if height >= confirmed * CHUNK {
            return Ok(self.store.stored_header_at(height).await?);
        }

        let group = self.verified_chunk(height.div_euclid(CHUNK)).await?;
        Ok(group[height.rem_euclid(CHUNK) as usize])
    }

    /// Rewinds the local chain to the nearest state the provider's current
    /// chain still agrees with and returns the new tip.
    async fn handle_reorg(&self, local: Latest) -> Result<Latest, ChainError> {
        warn!(
            target: "verified",
            height = local.height,
            hash = %local.hash,
            "Reorganization detected"
        );
        let tip = if self.compact {
            self.reorg_compact().await?
        } else {
            self.reorg_full(local).await?
        };
        info!(target: "verified", height = tip.height, hash = %tip.hash, "Reorg resolved");
        Ok(tip)
    }

    /// Full-mode recovery: pop the tip until the provider knows its hash.
    async fn reorg_full(&self, mut local: Latest) -> Result<Latest, ChainError> {
        while local.height >= 0 {
            match self.network.header(HeaderQuery::Hash(local.hash)).await {
                Ok(_) => break,
                Err(NetworkError::HeaderNotFound(_)) => {
                    local = self.store.pop_tip(&local).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
        *self.latest.write() = local;
        Ok(local)
    }

    /// Compact-mode recovery: walk the confirmed-chunk count downward until
    /// a refetched chunk reproduces its stored hash, then rewind to that
    /// boundary. No surviving chunk means a restart from genesis.
    async fn reorg_compact(&self) -> Result<Latest, ChainError> {
        let mut chunks = self.store.chunk_hashes_count().await? as i64;

        while chunks > 0 {
            let index = chunks - 1;
            self.chunk_cache.invalidate(&index);

            let group = self.chunk(index).await?;
            if group.len() == CHUNK_SIZE {
                let stored = self.store.chunk_hash(index as usize).await?;
                if ChunkHash::of_group(group.as_slice()) == stored {
                    let tip = Latest {
                        hash: header_hash(&group[CHUNK_SIZE - 1]),
                        height: chunks * CHUNK - 1,
                    };
                    self.store.rewind_to_chunk(chunks as usize, tip.hash).await?;
                    *self.latest.write() = tip;
                    return Ok(tip);
                }
            }

            self.chunk_cache.invalidate(&index);
            chunks -= 1;
        }

        self.store.clear().await?;
        *self.latest.write() = Latest::GENESIS;
        Ok(Latest::GENESIS)
    }

    /// Resolves a header by height, hash or the current best.
    ///
    /// Hash and best queries consult the provider only for the claimed
    /// height; the returned header is always re-derived from the verified
    /// chain and must hash to the provider's claim.
    pub async fn header(&self, query: HeaderQuery) -> Result<NetworkHeader, ChainError> {
        match query {
            HeaderQuery::Height(height) => self.header_at(height).await,
            HeaderQuery::Hash(_) | HeaderQuery::Latest => {
                let claim = self.network.header(query).await?;
                let local = self.header_at(claim.height).await?;
                if local.hash != claim.hash {
                    return Err(ChainError::VerifyHeader {
                        subject: query.to_string(),
                        reason: format!(
                            "provider claims {} at height {}, verified chain has {}",
                            claim.hash, claim.height, local.hash
                        ),
                    });
                }
                Ok(local)
            }
        }
    }

    async fn header_at(&self, height: i64) -> Result<NetworkHeader, ChainError> {
        if height < 0 {
            return Err(ChainError::VerifyHeader {
                subject: height.to_string(),
                reason: "negative height".to_string(),
            });
        }
        if height > self.latest().height {
            // Ask the provider purely to classify: a height it does not know
            // either propagates as its not-found answer.
            self.network.header(HeaderQuery::Height(height)).await?;
            return Err(ChainError::VerifyHeader {
                subject: height.to_string(),
                reason: "not yet imported into the verified chain".to_string(),
            });
        }

        let raw = self.raw_header_at(height).await?;
        Ok(NetworkHeader::from_raw(height, &raw))
    }

    /// The verified confirmation block of a transaction, or `None` when the
    /// provider reports it unconfirmed.
    ///
    /// The provider's merkle branch must reproduce the root of the claimed
    /// block's verified header.
    pub async fn tx_block_info(&self, txid: &Txid) -> Result<Option<Latest>, ChainError> {
        let Some(claim) = self.network.tx_merkle(txid).await? else {
            return Ok(None);
        };

        let header = self.header(HeaderQuery::Hash(claim.hash)).await?;
        if header.height != claim.height {
            return Err(ChainError::VerifyTx {
                txid: *txid,
                reason: format!(
                    "claimed height {} but the block sits at {}",
                    claim.height, header.height
                ),
            });
        }

        let root = merkle_root_from_branch(txid, claim.index, &claim.merkle);
        if root != header.merkle_root {
            return Err(ChainError::VerifyTx {
                txid: *txid,
                reason: "merkle branch does not reproduce the block's root".to_string(),
            });
        }
        Ok(Some(Latest { hash: header.hash, height: header.height }))
    }

    /// Queries the provider for address history, then independently
    /// re-derives every confirmed entry's height.
    pub async fn addresses_query(
        &self,
        addresses: &[String],
        opts: &AddressesQueryOpts,
    ) -> Result<AddressesQuery, ChainError> {
        let answer = self.network.addresses_query(addresses, opts).await?;

        let checks = answer.data.iter().filter(|entry| entry.height.is_some()).map(
            |entry| async move {
                match self.tx_block_info(&entry.txid).await? {
                    Some(block) if Some(block.height) == entry.height => Ok(()),
                    Some(block) => Err(ChainError::VerifyTx {
                        txid: entry.txid,
                        reason: format!(
                            "reported at height {:?} but confirmed at {}",
                            entry.height, block.height
                        ),
                    }),
                    None => Err(ChainError::VerifyTx {
                        txid: entry.txid,
                        reason: "reported confirmed but no merkle proof exists".to_string(),
                    }),
                }
            },
        );
        futures::future::try_join_all(checks).await?;

        Ok(answer)
    }

    /// Bootstraps, subscribes to the provider's new-block stream and keeps
    /// the verified chain in step until the token is cancelled.
    pub fn start(self: &Arc<Self>, cancellation: CancellationToken) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.bootstrap().await {
                error!(target: "verified", %err, "Bootstrap failed");
                return;
            }
            if let Err(err) = engine.network.subscribe(Subscription::NewBlock).await {
                warn!(target: "verified", %err, "New-block subscription failed");
            }

            let mut events = engine.network.events();
            if engine.network.is_connected() {
                engine.sync().await;
            }

            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => {
                        info!(target: "verified", "Received shutdown signal. Exiting sync loop.");
                        return;
                    }
                    event = events.recv() => match event {
                        Ok(NetworkEvent::Connected) | Ok(NetworkEvent::NewBlock(_)) => {
                            engine.sync().await;
                        }
                        Ok(NetworkEvent::NewTx { txid, address }) => {
                            let _ = engine.events_tx.send(ChainEvent::NewTx { txid, address });
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(target: "verified", skipped, "Network event stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        })
    }
}

#[async_trait]
impl<N, S, V> RetargetSource for Verified<N, S, V>
where
    N: Network + 'static,
    S: Storage + 'static,
    V: HeaderVerifier + 'static,
{
    async fn raw_header_at(&self, height: i64) -> Result<RawHeader, ChainError> {
        Self::raw_header_at(self, height).await
    }
}

#[async_trait]
impl<N, S, V> BlockchainSource for Verified<N, S, V>
where
    N: Network + 'static,
    S: Storage + 'static,
    V: HeaderVerifier + 'static,
{
    fn latest(&self) -> Latest {
        Self::latest(self)
    }

    fn events(&self) -> broadcast::Receiver<ChainEvent> {
        Self::events(self)
    }

    async fn sync(&self) {
        Self::sync(self).await;
    }

    async fn header(&self, query: HeaderQuery) -> Result<NetworkHeader, ChainError> {
        Self::header(self, query).await
    }

    async fn tx(&self, txid: &Txid) -> Result<String, ChainError> {
        let network = self.network.clone();
        let id = *txid;
        self.tx_cache
            .get(id, move || async move { Ok(network.tx(&id).await?) })
            .await
            .map_err(ChainError::Shared)
    }

    async fn tx_block_info(&self, txid: &Txid) -> Result<Option<Latest>, ChainError> {
        Self::tx_block_info(self, txid).await
    }

    async fn send_tx(&self, raw_hex: &str) -> Result<(), ChainError> {
        Ok(self.network.send_tx(raw_hex).await?)
    }

    async fn addresses_query(
        &self,
        addresses: &[String],
        opts: &AddressesQueryOpts,
    ) -> Result<AddressesQuery, ChainError> {
        Self::addresses_query(self, addresses, opts).await
    }

    async fn subscribe_address(&self, address: &str) -> Result<(), ChainError> {
        Ok(self
            .network
            .subscribe(Subscription::NewTx { address: address.to_string() })
            .await?)
    }
}
