//! The shared surface of both engine variants.

use crate::{
    AddressesQuery, AddressesQueryOpts, ChainError, HeaderQuery, NetworkHeader,
};
use async_trait::async_trait;
use spv_primitives::{Latest, Txid};
use std::sync::Arc;
use tokio::sync::broadcast;

/// The capacity of the chain event channel. Slow subscribers observe a
/// lagged error rather than blocking the engine.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by a [`BlockchainSource`].
#[derive(Clone, Debug)]
pub enum ChainEvent {
    /// A sync cycle acquired the single-flight gate.
    SyncStarted,
    /// A sync cycle released the single-flight gate.
    SyncStopped,
    /// The locally-accepted tip advanced or moved; carries a snapshot.
    NewBlock(Latest),
    /// The provider announced a transaction on a watched address.
    NewTx {
        /// The announced transaction.
        txid: Txid,
        /// The watched address it touches.
        address: String,
    },
    /// A sync cycle failed; the engine stays live for the next attempt.
    Error(Arc<ChainError>),
}

/// A source of blockchain facts, backed by a remote provider.
///
/// Two implementations exist: [`Naive`](crate::Naive) relays the provider's
/// claims as-is, [`Verified`](crate::Verified) re-verifies every one of them
/// against the locally-synchronized header chain.
#[async_trait]
pub trait BlockchainSource: Send + Sync {
    /// A snapshot of the locally-accepted chain tip.
    fn latest(&self) -> Latest;

    /// A fresh receiver for [`ChainEvent`]s.
    fn events(&self) -> broadcast::Receiver<ChainEvent>;

    /// Runs one synchronization cycle. Single-flight: a call arriving while
    /// a cycle is in flight coalesces into exactly one follow-up run.
    /// Failures surface as [`ChainEvent::Error`], never as a panic.
    async fn sync(&self);

    /// Resolves a header by height, hash or the current best.
    async fn header(&self, query: HeaderQuery) -> Result<NetworkHeader, ChainError>;

    /// Fetches a raw transaction as hex, memoized single-flight.
    async fn tx(&self, txid: &Txid) -> Result<String, ChainError>;

    /// The confirmation block of a transaction, or `None` when unconfirmed.
    async fn tx_block_info(&self, txid: &Txid) -> Result<Option<Latest>, ChainError>;

    /// Broadcasts a raw transaction through the provider.
    async fn send_tx(&self, raw_hex: &str) -> Result<(), ChainError>;

    /// Queries the history of a set of addresses.
    async fn addresses_query(
        &self,
        addresses: &[String],
        opts: &AddressesQueryOpts,
    ) -> Result<AddressesQuery, ChainError>;

    /// Subscribes to new-transaction notifications for an address.
    async fn subscribe_address(&self, address: &str) -> Result<(), ChainError>;
}

/// The single-flight sync guard with rerun coalescing.
///
/// A `sync()` arriving while one runs does not queue: it sets the rerun flag
/// and returns, and the running cycle performs exactly one follow-up pass.
#[derive(Debug, Default)]
pub(crate) struct SyncGate {
    busy: bool,
    rerun: bool,
}

impl SyncGate {
    /// Tries to take the gate. When already busy, requests a rerun instead
    /// and returns `false`.
    pub(crate) fn acquire(&mut self) -> bool {
        if self.busy {
            self.rerun = true;
            false
        } else {
            self.busy = true;
            true
        }
    }

    /// Finishes a cycle. Returns `true` when a rerun was requested, in which
    /// case the gate stays held and the caller runs once more.
    pub(crate) fn release(&mut self) -> bool {
        if self.rerun {
            self.rerun = false;
            true
        } else {
            self.busy = false;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_calls_coalesce_into_one_rerun() {
        let mut gate = SyncGate::default();
        assert!(gate.acquire());

        // Three triggers while busy request a single follow-up run.
        assert!(!gate.acquire());
        assert!(!gate.acquire());
        assert!(!gate.acquire());

        assert!(gate.release(), "one rerun expected");
        assert!(!gate.release(), "reruns must not stack");

        // Fully released: the next caller gets the gate.
        assert!(gate.acquire());
        assert!(!gate.release());
    }
}
