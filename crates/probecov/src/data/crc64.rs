//! CRC-64 class identifiers.
//!
//! Reflected polynomial `0xD800000000000000`, zero initial value, no final
//! xor. The id is computed over the unmodified class bytes and joins
//! instrumented classes with their recorded probes.

const POLY64REV: u64 = 0xD800_0000_0000_0000;

const LOOKUP: [u64; 256] = build_table();

const fn build_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut i = 0;
    while i < 256 {
        let mut value = i as u64;
        let mut bit = 0;
        while bit < 8 {
            value = if value & 1 == 1 {
                (value >> 1) ^ POLY64REV
            } else {
                value >> 1
            };
            bit += 1;
        }
        table[i] = value;
        i += 1;
    }
    table
}

/// Identifier of a class from its bytes
#[must_use]
pub fn class_id(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |sum, byte| {
        (sum >> 8) ^ LOOKUP[((sum ^ u64::from(*byte)) & 0xFF) as usize]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_input() {
        assert_eq!(class_id(&[]), 0);
    }

    #[test]
    fn test_single_byte() {
        assert_eq!(class_id(&[0x01]), 0x01B0_0000_0000_0000);
    }

    #[test]
    fn test_sensitive_to_order() {
        assert_ne!(class_id(&[1, 2, 3]), class_id(&[3, 2, 1]));
    }

    mod proptest_tests {
        use super::*;

        proptest! {
            #[test]
            fn prop_deterministic(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
                prop_assert_eq!(class_id(&bytes), class_id(&bytes.clone()));
            }

            #[test]
            fn prop_single_flip_changes_id(
                bytes in proptest::collection::vec(any::<u8>(), 1..256),
                position in any::<prop::sample::Index>(),
                mask in 1u8..=255,
            ) {
                let mut flipped = bytes.clone();
                let i = position.index(flipped.len());
                flipped[i] ^= mask;
                prop_assert_ne!(class_id(&bytes), class_id(&flipped));
            }
        }
    }
}
