//! The trusting engine variant.

use crate::{
    AddressesQuery, AddressesQueryOpts, BlockchainSource, ChainError, ChainEvent, HeaderQuery,
    Network, NetworkEvent, NetworkHeader, RequestCache, Subscription,
    source::{EVENT_CHANNEL_CAPACITY, SyncGate},
};
use async_trait::async_trait;
use spv_primitives::{Latest, Txid};
use std::sync::Arc;
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// A [`BlockchainSource`] that takes the provider at its word.
///
/// No storage, no verification: the tip is whatever the provider last
/// reported, header and confirmation queries are relayed as-is. Useful where
/// the provider is trusted or as a lightweight fallback; [`Verified`]
/// (crate::Verified) is the hardened variant.
#[derive(Debug)]
pub struct Naive<N> {
    network: Arc<N>,
    latest: spin::RwLock<Latest>,
    gate: spin::Mutex<SyncGate>,
    tx_cache: RequestCache<Txid, String>,
    events_tx: broadcast::Sender<ChainEvent>,
}

impl<N: Network + 'static> Naive<N> {
    /// Creates the engine with a transaction cache of `tx_cache_size`
    /// entries.
    pub fn new(network: Arc<N>, tx_cache_size: usize) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            network,
            latest: spin::RwLock::new(Latest::GENESIS),
            gate: spin::Mutex::new(SyncGate::default()),
            tx_cache: RequestCache::new(tx_cache_size),
            events_tx,
        }
    }

    /// A snapshot of the last reported tip.
    pub fn latest(&self) -> Latest {
        *self.latest.read()
    }

    /// A fresh receiver for [`ChainEvent`]s.
    pub fn events(&self) -> broadcast::Receiver<ChainEvent> {
        self.events_tx.subscribe()
    }

    /// Adopts the provider's current best header as the local tip.
    pub async fn sync(&self) {
        if !self.gate.lock().acquire() {
            return;
        }

        loop {
            let _ = self.events_tx.send(ChainEvent::SyncStarted);
            let saved = self.latest().hash;

            match self.network.header(HeaderQuery::Latest).await {
                Ok(header) => *self.latest.write() = header.latest(),
                Err(err) => {
                    warn!(target: "naive", %err, "Sync failed");
                    let _ = self.events_tx.send(ChainEvent::Error(Arc::new(err.into())));
                }
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

    /// Subscribes to the provider's new-block stream and keeps the tip in
    /// step until the token is cancelled.
    pub fn start(self: &Arc<Self>, cancellation: CancellationToken) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.network.subscribe(Subscription::NewBlock).await {
                warn!(target: "naive", %err, "New-block subscription failed");
            }
            let mut events = engine.network.events();
            if engine.network.is_connected() {
                engine.sync().await;
            }

            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => {
                        info!(target: "naive", "Received shutdown signal. Exiting sync loop.");
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
                            warn!(target: "naive", skipped, "Network event stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        })
    }
}

#[async_trait]
impl<N: Network + 'static> BlockchainSource for Naive<N> {
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
        Ok(self.network.header(query).await?)
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
        let merkle = self.network.tx_merkle(txid).await?;
        Ok(merkle.map(|claim| Latest { hash: claim.hash, height: claim.height }))
    }

    async fn send_tx(&self, raw_hex: &str) -> Result<(), ChainError> {
        Ok(self.network.send_tx(raw_hex).await?)
    }

    async fn addresses_query(
        &self,
        addresses: &[String],
        opts: &AddressesQueryOpts,
    ) -> Result<AddressesQuery, ChainError> {
        Ok(self.network.addresses_query(addresses, opts).await?)
    }

    async fn subscribe_address(&self, address: &str) -> Result<(), ChainError> {
        Ok(self
            .network
            .subscribe(Subscription::NewTx { address: address.to_string() })
            .await?)
    }
}
