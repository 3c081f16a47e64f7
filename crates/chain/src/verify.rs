//! Proof-of-work and linkage verification over header batches.

use crate::ChainError;
use alloy_primitives::U256;
use async_trait::async_trait;
use spv_primitives::{
    BlockHeader, CHUNK_SIZE, MAX_TARGET, RawHeader, header_hash, next_target,
};

/// On testnet, a block arriving more than 20 minutes after its predecessor
/// may use the minimum difficulty.
const TESTNET_POW_GAP_SECS: u32 = 2 * 10 * 60;

/// Resolves raw headers at already-verified local heights, used to anchor
/// retarget computations that reach outside the batch under verification.
#[async_trait]
pub trait RetargetSource: Send + Sync {
    /// The raw header at `height` on the locally-verified chain.
    async fn raw_header_at(&self, height: i64) -> Result<RawHeader, ChainError>;
}

/// Verification of an ordered batch of raw headers against the chain rules.
///
/// A trait seam so engine tests can substitute relaxed rules where real
/// proof-of-work cannot be minted.
#[async_trait]
pub trait HeaderVerifier: Send + Sync {
    /// Verifies `headers`, the batch covering heights `start_height..`,
    /// against linkage and proof-of-work rules. `previous` is the raw header
    /// at `start_height - 1`, absent only when the batch starts at genesis.
    ///
    /// Fails on the first offending header with
    /// [`ChainError::VerifyBlockchain`] naming its height; nothing is
    /// partially accepted.
    async fn verify(
        &self,
        source: &dyn RetargetSource,
        start_height: i64,
        headers: &[RawHeader],
        previous: Option<RawHeader>,
    ) -> Result<(), ChainError>;
}

/// The production [`HeaderVerifier`]: full linkage and proof-of-work checks
/// with the retarget-every-2016-blocks rule.
#[derive(Clone, Copy, Debug)]
pub struct ChainVerifier {
    testnet: bool,
}

impl ChainVerifier {
    /// Creates a verifier for mainnet or testnet rules.
    pub const fn new(testnet: bool) -> Self {
        Self { testnet }
    }

    /// Resolves the raw header at `height`, preferring the batch itself,
    /// then the supplied predecessor, then the verified local chain.
    async fn anchor(
        source: &dyn RetargetSource,
        start_height: i64,
        headers: &[RawHeader],
        previous: Option<&RawHeader>,
        height: i64,
    ) -> Result<RawHeader, ChainError> {
        if height >= start_height && height < start_height + headers.len() as i64 {
            Ok(headers[(height - start_height) as usize])
        } else if height == start_height - 1 {
            previous.copied().ok_or_else(|| ChainError::VerifyBlockchain {
                height,
                reason: "missing predecessor anchor".to_string(),
            })
        } else {
            source.raw_header_at(height).await
        }
    }

    /// The effective target for chunk `chunk`: the maximum target for the
    /// first chunk, otherwise the retarget rule over the first and last
    /// headers of the preceding chunk.
    async fn chunk_target(
        source: &dyn RetargetSource,
        start_height: i64,
        headers: &[RawHeader],
        previous: Option<&RawHeader>,
        chunk: i64,
    ) -> Result<U256, ChainError> {
        if chunk == 0 {
            return Ok(MAX_TARGET);
        }

        let first_height = (chunk - 1) * CHUNK_SIZE as i64;
        let last_height = chunk * CHUNK_SIZE as i64 - 1;
        let first =
            Self::anchor(source, start_height, headers, previous, first_height).await?;
        let last = Self::anchor(source, start_height, headers, previous, last_height).await?;

        let first = BlockHeader::from_raw(&first);
        let last = BlockHeader::from_raw(&last);
        Ok(next_target(first.time, last.time, last.bits))
    }

    /// The target a single header must meet, applying the testnet
    /// min-difficulty relaxation for long inter-block gaps.
    fn effective_target(&self, chunk_target: U256, prev_time: Option<u32>, time: u32) -> U256 {
        match prev_time {
            Some(prev) if self.testnet && time > prev.saturating_add(TESTNET_POW_GAP_SECS) => {
                MAX_TARGET
            }
            _ => chunk_target,
        }
    }
}

#[async_trait]
impl HeaderVerifier for ChainVerifier {
    async fn verify(
        &self,
        source: &dyn RetargetSource,
        start_height: i64,
        headers: &[RawHeader],
        previous: Option<RawHeader>,
    ) -> Result<(), ChainError> {
        let mut prev_hash = previous.as_ref().map(header_hash);
        let mut prev_time = previous.as_ref().map(|raw| BlockHeader::from_raw(raw).time);
        let mut current: Option<(i64, U256)> = None;

        for (offset, raw) in headers.iter().enumerate() {
            let height = start_height + offset as i64;
            let chunk = height.div_euclid(CHUNK_SIZE as i64);

            // Recompute the target at every chunk boundary the batch crosses.
            let chunk_target = match current {
                Some((cached_chunk, target)) if cached_chunk == chunk => target,
                _ => {
                    let target = Self::chunk_target(
                        source,
                        start_height,
                        headers,
                        previous.as_ref(),
                        chunk,
                    )
                    .await?;
                    current = Some((chunk, target));
                    target
                }
            };

            let header = BlockHeader::from_raw(raw);
            if let Some(expected) = prev_hash {
                if header.prev_blockhash != expected {
                    return Err(ChainError::VerifyBlockchain {
                        height,
                        reason: "broken linkage to previous header".to_string(),
                    });
                }
            }

            let target = self.effective_target(chunk_target, prev_time, header.time);
            let hash = header_hash(raw);
            if U256::from_le_bytes(*hash.as_bytes()) > target {
                return Err(ChainError::VerifyBlockchain {
                    height,
                    reason: "hash exceeds proof-of-work target".to_string(),
                });
            }

            prev_hash = Some(hash);
            prev_time = Some(header.time);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spv_primitives::{split_concat_hex, target_from_bits};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const GENESIS_HEX: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";
    const BLOCK_1_HEX: &str = "010000006fe28c0ab6f1b372c1a6a246ae63f74f931e8365e15a089c68d6190000000000982051fd1e4ba744bbbe680e1fee14677ba1a3c3540bf7b1cdb606e857233e0e61bc6649ffff001d01e36299";
    const BLOCK_2_HEX: &str = "010000004860eb18bf1b1620e37e9490fc8a427514416fd75159ab86688e9a8300000000d5fdcc541e25de1c7a5addedf24858b8bb665c9f36ef744ee42c316022c90f9bb0bc6649ffff001d08d2bd61";

    fn mainnet_prefix() -> Vec<RawHeader> {
        split_concat_hex(&format!("{GENESIS_HEX}{BLOCK_1_HEX}{BLOCK_2_HEX}")).unwrap()
    }

    /// Answers retarget lookups from a fixed header list; counts calls.
    struct FixedSource {
        headers: Vec<(i64, RawHeader)>,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn empty() -> Self {
            Self { headers: Vec::new(), calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl RetargetSource for FixedSource {
        async fn raw_header_at(&self, height: i64) -> Result<RawHeader, ChainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.headers
                .iter()
                .find(|(h, _)| *h == height)
                .map(|(_, raw)| *raw)
                .ok_or(ChainError::VerifyBlockchain {
                    height,
                    reason: "no anchor".to_string(),
                })
        }
    }

    fn dummy_header(prev: Option<&RawHeader>, time: u32, bits: u32) -> RawHeader {
        let header = BlockHeader {
            version: 2,
            prev_blockhash: prev.map_or(spv_primitives::BlockHash::ZERO, header_hash),
            merkle_root: spv_primitives::BlockHash::ZERO,
            time,
            bits,
            nonce: 0,
        };
        header.encode()
    }

    #[tokio::test]
    async fn accepts_the_real_mainnet_prefix() {
        let headers = mainnet_prefix();
        let source = FixedSource::empty();

        ChainVerifier::new(false).verify(&source, 0, &headers, None).await.unwrap();
        // Chunk 0 uses the maximum target; no anchors were needed.
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn verifies_against_a_supplied_predecessor() {
        let headers = mainnet_prefix();
        let source = FixedSource::empty();

        ChainVerifier::new(false)
            .verify(&source, 1, &headers[1..], Some(headers[0]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejects_broken_linkage_naming_the_height() {
        let mut headers = mainnet_prefix();
        // Corrupt block 2's back-reference.
        headers[2][4] ^= 0xff;
        let source = FixedSource::empty();

        let err =
            ChainVerifier::new(false).verify(&source, 0, &headers, None).await.unwrap_err();
        assert!(
            matches!(err, ChainError::VerifyBlockchain { height: 2, .. }),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn rejects_unworked_headers() {
        // A header nobody mined: its hash exceeds the maximum target almost
        // surely.
        let junk = dummy_header(None, 1231006505, 0x1d00ffff);
        let source = FixedSource::empty();

        let err =
            ChainVerifier::new(false).verify(&source, 0, &[junk], None).await.unwrap_err();
        assert!(matches!(err, ChainError::VerifyBlockchain { height: 0, .. }));
    }

    #[tokio::test]
    async fn rejects_nothing_on_an_empty_batch() {
        let source = FixedSource::empty();
        ChainVerifier::new(false).verify(&source, 5, &[], None).await.unwrap();
    }

    #[test]
    fn testnet_gap_relaxes_to_the_maximum_target() {
        let hard = target_from_bits(0x1b0404cb);
        let verifier = ChainVerifier::new(true);

        // Within 20 minutes: the chunk target stands.
        assert_eq!(verifier.effective_target(hard, Some(1000), 1000 + 1200), hard);
        // Beyond 20 minutes: minimum difficulty applies.
        assert_eq!(verifier.effective_target(hard, Some(1000), 1000 + 1201), MAX_TARGET);
        // Mainnet never relaxes.
        let mainnet = ChainVerifier::new(false);
        assert_eq!(mainnet.effective_target(hard, Some(1000), 1000 + 9999), hard);
        // Without a predecessor there is no gap to measure.
        assert_eq!(verifier.effective_target(hard, None, u32::MAX), hard);
    }

    #[tokio::test]
    async fn chunk_targets_recompute_at_boundaries() {
        let first_of_prior = dummy_header(None, 10_000, 0x1c7fffff);
        let last_of_prior = dummy_header(None, 10_000 + 1_209_600, 0x1c7fffff);
        let source = FixedSource {
            headers: vec![(0, first_of_prior), (CHUNK_SIZE as i64 - 1, last_of_prior)],
            calls: AtomicUsize::new(0),
        };

        // Chunk 0 is always the maximum target.
        let target = ChainVerifier::chunk_target(&source, 0, &[], None, 0).await.unwrap();
        assert_eq!(target, MAX_TARGET);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        // Chunk 1 derives from the prior chunk's first/last headers, pulled
        // through the retarget source; an exact two-week span keeps the
        // previous target.
        let target = ChainVerifier::chunk_target(&source, 2016, &[], None, 1).await.unwrap();
        assert_eq!(target, target_from_bits(0x1c7fffff));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        // Anchors whose heights fall inside the batch resolve from the batch
        // itself without touching the source.
        let source = FixedSource::empty();
        let mut batch = vec![first_of_prior; CHUNK_SIZE];
        batch[CHUNK_SIZE - 1] = last_of_prior;
        let target =
            ChainVerifier::chunk_target(&source, 0, &batch, None, 1).await.unwrap();
        assert_eq!(target, target_from_bits(0x1c7fffff));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
