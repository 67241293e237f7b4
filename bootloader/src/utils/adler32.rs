//! Adler-32 rolling checksum
//!
//! Names the kernel cache file: the checksum of "rootDevice,kernelPath" is
//! appended in hex to the default cache path. The historical cache builder
//! stored the sum byte-swapped, so callers that need the on-disk form
//! apply `swap_bytes()` to the return value.

const BASE: u32 = 65521;

// Largest n such that 255n(n+1)/2 + (n+1)(BASE-1) fits in 32 bits.
const NMAX: usize = 5000;

pub fn adler32(buf: &[u8]) -> u32 {
    let mut s1: u32 = 1;
    let mut s2: u32 = 0;

    for chunk in buf.chunks(NMAX) {
        for &byte in chunk {
            s1 = s1.wrapping_add(byte as u32);
            s2 = s2.wrapping_add(s1);
        }
        s1 %= BASE;
        s2 %= BASE;
    }

    (s2 << 16) | s1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(adler32(b""), 1);
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
    }

    #[test]
    fn test_long_input_reduction() {
        // More than one NMAX chunk; checks the deferred modulo math.
        let buf = [0xFFu8; 12000];
        let mut s1: u64 = 1;
        let mut s2: u64 = 0;
        for &b in buf.iter() {
            s1 = (s1 + b as u64) % BASE as u64;
            s2 = (s2 + s1) % BASE as u64;
        }
        assert_eq!(adler32(&buf), ((s2 as u32) << 16) | s1 as u32);
    }
}
