//! Proof-of-work target arithmetic.
//!
//! Targets are 256-bit thresholds a block hash, read as a little-endian
//! integer, must not exceed. Headers carry targets in the compact "nBits"
//! form; the difficulty retargets once per 2016-block chunk from the time
//! spanned by the previous chunk.

use alloy_primitives::U256;

/// The maximum (easiest) proof-of-work target: `0xffff * 2^208`, the
/// expansion of the genesis `0x1d00ffff` bits.
pub const MAX_TARGET: U256 = U256::from_limbs([0, 0, 0, 0x0000_0000_ffff_0000]);

/// The targeted timespan of one 2016-block chunk: two weeks.
pub const TARGET_TIMESPAN_SECS: u64 = 14 * 24 * 60 * 60;

/// Expands compact "nBits" into a full 256-bit target.
///
/// A set sign bit yields the zero target. Values whose expansion would
/// overflow 256 bits clamp to [`MAX_TARGET`].
pub fn target_from_bits(bits: u32) -> U256 {
    if bits & 0x0080_0000 != 0 {
        return U256::ZERO;
    }

    let exponent = (bits >> 24) as usize;
    let mantissa = U256::from(bits & 0x007f_ffff);

    if exponent <= 3 {
        mantissa >> (8 * (3 - exponent))
    } else {
        let shift = 8 * (exponent - 3);
        if mantissa.is_zero() {
            U256::ZERO
        } else if shift >= 256 || mantissa.bit_len() + shift > 256 {
            MAX_TARGET
        } else {
            mantissa << shift
        }
    }
}

/// Computes the target for the chunk following a completed one, given the
/// timestamps of the completed chunk's first and last headers and the last
/// header's compact bits.
///
/// The actual timespan is clamped to `[T/4, 4T]` with `T` the two-week
/// target timespan, and the resulting target never exceeds [`MAX_TARGET`].
pub fn next_target(first_time: u32, last_time: u32, last_bits: u32) -> U256 {
    let timespan = (last_time.saturating_sub(first_time) as u64)
        .clamp(TARGET_TIMESPAN_SECS / 4, TARGET_TIMESPAN_SECS * 4);

    let previous = target_from_bits(last_bits);
    let scaled = match previous.checked_mul(U256::from(timespan)) {
        Some(product) => product / U256::from(TARGET_TIMESPAN_SECS),
        None => return MAX_TARGET,
    };

    scaled.min(MAX_TARGET)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn genesis_bits_expand_to_max_target() {
        assert_eq!(target_from_bits(0x1d00ffff), MAX_TARGET);
    }

    #[rstest]
    #[case(0x0100_0012, U256::ZERO)] // one byte, shifted out entirely
    #[case(0x0380_0000, U256::ZERO)] // sign bit set
    #[case(0x0400_0000, U256::ZERO)] // zero mantissa
    #[case(0x0301_2345, U256::from(0x12345u64))]
    #[case(0x0401_2345, U256::from(0x12345u64) << 8)]
    fn compact_bits_expansion(#[case] bits: u32, #[case] expected: U256) {
        assert_eq!(target_from_bits(bits), expected);
    }

    #[test]
    fn oversized_exponent_clamps_to_max_target() {
        assert_eq!(target_from_bits(0xff00_0001), MAX_TARGET);
    }

    #[test]
    fn exact_timespan_keeps_target() {
        let target = target_from_bits(0x1b0404cb);
        assert_eq!(next_target(0, TARGET_TIMESPAN_SECS as u32, 0x1b0404cb), target);
    }

    #[test]
    fn timespan_is_clamped() {
        let bits = 0x1b0404cb;
        let base = target_from_bits(bits);

        // Instant chunk: difficulty can rise at most 4x.
        assert_eq!(next_target(100, 100, bits), base / U256::from(4u64));
        // Stalled chunk: difficulty can drop at most 4x.
        assert_eq!(next_target(0, u32::MAX, bits), base * U256::from(4u64));
    }

    #[test]
    fn next_target_never_exceeds_max() {
        assert_eq!(next_target(0, u32::MAX, 0x1d00ffff), MAX_TARGET);
    }
}
