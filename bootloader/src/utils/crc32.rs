//! CRC-32 (IEEE 802.3, reflected polynomial 0xEDB88320)
//!
//! Used to validate GPT header self-checksums. Matches the zlib-style
//! `crc32(seed, buf, len)` convention so a checksum can be built up over
//! multiple slices.

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = build_table();

/// Continue a CRC-32 over `buf`, starting from `seed` (0 for a fresh sum).
pub fn crc32(seed: u32, buf: &[u8]) -> u32 {
    let mut c = seed ^ 0xFFFF_FFFF;
    for &byte in buf {
        c = CRC_TABLE[((c ^ byte as u32) & 0xFF) as usize] ^ (c >> 8);
    }
    c ^ 0xFFFF_FFFF
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(crc32(0, b""), 0);
        assert_eq!(crc32(0, b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(0, b"The quick brown fox jumps over the lazy dog"), 0x414F_A339);
    }

    #[test]
    fn test_seed_continuation() {
        let whole = crc32(0, b"123456789");
        let split = crc32(crc32(0, b"1234"), b"56789");
        assert_eq!(whole, split);
    }

    #[test]
    fn test_single_bit_sensitivity() {
        let base = crc32(0, b"123456789");
        let mut flipped = *b"123456789";
        flipped[4] ^= 0x01;
        assert_ne!(base, crc32(0, &flipped));
    }
}
