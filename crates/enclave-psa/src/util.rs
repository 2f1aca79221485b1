use core::hint::black_box;

/// Compares `a` and `b` in constant time.
///
/// Returns zero iff every byte of `a` equals the corresponding
/// byte of `b`. Both buffers are always read in full: the
/// number of iterations depends only on their length, never on
/// their contents or where they differ. Buffers of different
/// lengths always compare unequal.
#[inline(never)]
pub fn ct_memcmp(a: &[u8], b: &[u8]) -> u32 {
    ct_diff(a, b, || {})
}

/// The implementation of [`ct_memcmp`]. `step` runs once per
/// byte pair.
fn ct_diff(a: &[u8], b: &[u8], mut step: impl FnMut()) -> u32 {
    let mut diff = u32::from(a.len() != b.len());
    for (x, y) in a.iter().zip(b) {
        step();
        // `black_box` keeps the compiler from noticing that
        // `diff` only grows and bailing out early.
        diff = black_box(diff | u32::from(x ^ y));
    }
    (diff & 0xffff) | (diff >> 16)
}

/// Converts a bit length to a byte length, rounding up.
pub const fn bits_to_bytes(bits: usize) -> usize {
    bits.div_ceil(8)
}

/// Returns the size of an elliptic curve key pair in the
/// enclave's layout: the private scalar followed by both public
/// coordinates.
pub const fn ecc_keypair_size(bits: usize) -> usize {
    let n = bits_to_bytes(bits);
    n.saturating_mul(3)
}

/// Returns the size of an uncompressed elliptic curve public
/// key: the point format marker followed by both coordinates.
pub const fn ecc_public_key_export_size(bits: usize) -> usize {
    bits_to_bytes(bits).saturating_mul(2).saturating_add(1)
}

/// The marker byte that starts an uncompressed curve point.
pub const UNCOMPRESSED_POINT: u8 = 0x04;

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_ct_memcmp() {
        assert_eq!(ct_memcmp(b"", b""), 0);
        assert_eq!(ct_memcmp(b"hello", b"hello"), 0);
        assert_ne!(ct_memcmp(b"hello", b"hellO"), 0);
        assert_ne!(ct_memcmp(b"hello", b"hell"), 0);
        // A difference in the high bit must not fold to zero.
        assert_ne!(ct_memcmp(&[0x80], &[0x00]), 0);
    }

    #[test]
    fn test_sizes() {
        assert_eq!(bits_to_bytes(0), 0);
        assert_eq!(bits_to_bytes(255), 32);
        assert_eq!(bits_to_bytes(521), 66);
        assert_eq!(ecc_keypair_size(256), 96);
        assert_eq!(ecc_keypair_size(521), 198);
        assert_eq!(ecc_public_key_export_size(256), 65);
        assert_eq!(ecc_public_key_export_size(384), 97);
    }

    proptest! {
        #[test]
        fn test_ct_memcmp_single_difference(
            buf in proptest::collection::vec(any::<u8>(), 1..256),
            pos in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let k = pos.index(buf.len());
            let mut other = buf.clone();
            other[k] ^= flip;

            let mut equal_steps = 0usize;
            let same = ct_diff(&buf, &buf, || equal_steps += 1);
            let mut unequal_steps = 0usize;
            let diff = ct_diff(&buf, &other, || unequal_steps += 1);

            prop_assert_eq!(same, 0);
            prop_assert_ne!(diff, 0);
            // The work done does not depend on `k`.
            prop_assert_eq!(equal_steps, buf.len());
            prop_assert_eq!(unequal_steps, buf.len());
        }
    }
}
