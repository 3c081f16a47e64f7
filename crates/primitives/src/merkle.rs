//! Merkle-branch recomputation for transaction inclusion proofs.

use crate::hash::{BlockHash, Txid, sha256d};

/// Recomputes a block's merkle root from a transaction id, its index within
/// the block, and the sibling-hash branch supplied by a remote provider.
///
/// Each step concatenates the running hash with its sibling, ordered by the
/// corresponding bit of `index`, and double-SHA256 hashes the pair. An empty
/// branch is the single-transaction case, where the root equals the txid.
pub fn merkle_root_from_branch(txid: &Txid, index: u64, branch: &[Txid]) -> BlockHash {
    let mut node = *txid.as_bytes();
    let mut index = index;

    for sibling in branch {
        let mut pair = [0u8; 64];
        if index & 1 == 1 {
            pair[..32].copy_from_slice(sibling.as_bytes());
            pair[32..].copy_from_slice(&node);
        } else {
            pair[..32].copy_from_slice(&node);
            pair[32..].copy_from_slice(sibling.as_bytes());
        }
        node = sha256d(&pair);
        index >>= 1;
    }

    BlockHash::from_raw(node)
}
