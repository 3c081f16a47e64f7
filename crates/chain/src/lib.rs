//! # spv-chain
//!
//! The verified synchronization engine of the SPV client. It pulls header
//! claims from an untrusted [`Network`] collaborator and re-verifies every
//! one of them before anything is persisted:
//!
//! - [`network`]: the remote data-provider boundary: wire types, the
//!   [`Network`] trait and its event stream.
//! - [`cache`]: [`RequestCache`], bounded single-flight memoization for chunk
//!   and transaction fetches.
//! - [`verify`]: proof-of-work and linkage verification over header batches,
//!   behind the [`HeaderVerifier`] seam.
//! - [`source`]: the [`BlockchainSource`] trait both engine variants expose,
//!   plus the chain event stream.
//! - [`naive`]: [`Naive`], a trusting passthrough variant without storage.
//! - [`verified`]: [`Verified`], the full engine: bootstrap, sync cycles,
//!   reorg recovery and verified query APIs.

#[macro_use]
extern crate tracing;

pub mod error;
pub use error::{ChainError, NetworkError};

pub mod network;
pub use network::{
    AddressTx, AddressesQuery, AddressesQueryOpts, HeaderQuery, Network, NetworkEvent,
    NetworkHeader, ReadyState, Subscription, TxMerkle,
};

pub mod cache;
pub use cache::RequestCache;

pub mod verify;
pub use verify::{ChainVerifier, HeaderVerifier, RetargetSource};

pub mod source;
pub use source::{BlockchainSource, ChainEvent};

pub mod naive;
pub use naive::Naive;

pub mod verified;
pub use verified::{Config, Verified};

#[cfg(test)]
mod test_utils;
