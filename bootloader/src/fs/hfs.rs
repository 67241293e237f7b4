//! HFS+ volume header inspection
//!
//! The volume header sits 1024 bytes into the partition and is big-endian
//! throughout. Wrapped HFS+ ("BD" signature) and HFSX volumes are accepted
//! alongside plain HFS+. The volume label lives in the catalog, so only the
//! header fields are captured here; label lookup goes through the mounted
//! filesystem.

/// Offset of the volume header from the partition start.
const HEADER_OFFSET: usize = 1024;

/// Seconds between the HFS epoch (1904) and the Unix epoch.
const MAC_EPOCH_DELTA: u32 = 2_082_844_800;

/// Recognize an HFS, HFS+ or HFSX volume header.
pub fn probe(buf: &[u8]) -> bool {
    if buf.len() < HEADER_OFFSET + 2 {
        return false;
    }
    let sig = u16::from_be_bytes([buf[HEADER_OFFSET], buf[HEADER_OFFSET + 1]]);
    matches!(sig, 0x4244 | 0x482B | 0x4858) // 'BD', 'H+', 'HX'
}

/// Volume modification time as Unix seconds, zero if before 1970.
pub fn mod_time(buf: &[u8]) -> u32 {
    let off = HEADER_OFFSET + 20;
    if buf.len() < off + 4 {
        return 0;
    }
    let mac = u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
    mac.saturating_sub(MAC_EPOCH_DELTA)
}

/// 64-bit volume identifier from the finder-info area, kept in on-disk
/// byte order. Absent on a never-mounted volume (all zero).
pub fn volume_id(buf: &[u8]) -> Option<[u8; 8]> {
    // Finder info is eight 32-bit words at header offset 80; the volume
    // identifier occupies the last two.
    let off = HEADER_OFFSET + 80 + 24;
    if buf.len() < off + 8 {
        return None;
    }
    let mut id = [0u8; 8];
    id.copy_from_slice(&buf[off..off + 8]);
    if id == [0u8; 8] { None } else { Some(id) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::probe::PROBE_BUF_SIZE;

    fn hfs_buf(sig: [u8; 2]) -> [u8; PROBE_BUF_SIZE] {
        let mut buf = [0u8; PROBE_BUF_SIZE];
        buf[HEADER_OFFSET..HEADER_OFFSET + 2].copy_from_slice(&sig);
        buf
    }

    #[test]
    fn test_signature_variants() {
        assert!(probe(&hfs_buf(*b"H+")));
        assert!(probe(&hfs_buf(*b"HX")));
        assert!(probe(&hfs_buf(*b"BD")));
        assert!(!probe(&hfs_buf(*b"ZZ")));
    }

    #[test]
    fn test_mod_time_epoch_conversion() {
        let mut buf = hfs_buf(*b"H+");
        // 2004-01-01 00:00:00 UTC in Mac time.
        let mac: u32 = MAC_EPOCH_DELTA + 1_072_915_200;
        buf[HEADER_OFFSET + 20..HEADER_OFFSET + 24].copy_from_slice(&mac.to_be_bytes());
        assert_eq!(mod_time(&buf), 1_072_915_200);

        // Pre-Unix-epoch timestamps clamp to zero.
        buf[HEADER_OFFSET + 20..HEADER_OFFSET + 24].copy_from_slice(&100u32.to_be_bytes());
        assert_eq!(mod_time(&buf), 0);
    }

    #[test]
    fn test_volume_id_capture() {
        let mut buf = hfs_buf(*b"H+");
        assert_eq!(volume_id(&buf), None, "zero id means never mounted");
        let off = HEADER_OFFSET + 80 + 24;
        buf[off..off + 8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(volume_id(&buf), Some([1, 2, 3, 4, 5, 6, 7, 8]));
    }
}
