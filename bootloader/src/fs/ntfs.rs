//! NTFS boot sector inspection

/// Recognize an NTFS OEM signature.
pub fn probe(buf: &[u8]) -> bool {
    buf.len() >= 11 && &buf[3..11] == b"NTFS    "
}

/// Volume serial number from the boot sector, absent when zero.
pub fn serial(buf: &[u8]) -> Option<u64> {
    if !probe(buf) || buf.len() < 0x48 + 8 {
        return None;
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[0x48..0x50]);
    let serial = u64::from_le_bytes(raw);
    if serial == 0 { None } else { Some(serial) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oem_signature() {
        let mut buf = [0u8; 512];
        buf[3..11].copy_from_slice(b"NTFS    ");
        assert!(probe(&buf));
        buf[10] = b'X';
        assert!(!probe(&buf));
    }

    #[test]
    fn test_serial_number() {
        let mut buf = [0u8; 512];
        buf[3..11].copy_from_slice(b"NTFS    ");
        assert_eq!(serial(&buf), None);
        buf[0x48..0x50].copy_from_slice(&0x1122334455667788u64.to_le_bytes());
        assert_eq!(serial(&buf), Some(0x1122334455667788));
    }
}
