//! # spv-storage
//!
//! Persistence for SPV header chains, split in two layers:
//!
//! - the [`Storage`] trait, the boundary concrete backends implement. A
//!   backend runs in one of two fixed retention modes: *full* keeps every raw
//!   header from genesis, *compact* keeps only confirmed-chunk hashes plus
//!   the raw headers of the current incomplete chunk.
//! - [`ChunkStore`], the bookkeeping wrapper the sync engine talks to. It
//!   owns the height formula, the compact-mode chunk-overflow commit and the
//!   reorg rewind operations.
//!
//! [`MemoryStorage`] is the bundled reference backend; database and browser
//! backends live outside this crate.

#[macro_use]
extern crate tracing;

pub mod error;
pub use error::StorageError;

pub mod traits;
pub use traits::Storage;

pub mod memory;
pub use memory::MemoryStorage;

pub mod chunk_store;
pub use chunk_store::ChunkStore;
