//! ext2/ext3 superblock inspection

use arrayvec::ArrayString;

/// Offset of the superblock from the partition start.
const SB_OFFSET: usize = 1024;

const MAGIC_OFFSET: usize = SB_OFFSET + 56;
const UUID_OFFSET: usize = SB_OFFSET + 104;
const LABEL_OFFSET: usize = SB_OFFSET + 120;
const REV_OFFSET: usize = SB_OFFSET + 76;

/// Recognize an ext2-family superblock.
pub fn probe(buf: &[u8]) -> bool {
    if buf.len() < MAGIC_OFFSET + 2 {
        return false;
    }
    u16::from_le_bytes([buf[MAGIC_OFFSET], buf[MAGIC_OFFSET + 1]]) == 0xEF53
}

/// Volume label from the superblock. Labels only exist from revision 1 on.
pub fn label(buf: &[u8]) -> Option<ArrayString<16>> {
    if !probe(buf) || buf.len() < LABEL_OFFSET + 16 {
        return None;
    }
    let rev = u32::from_le_bytes([
        buf[REV_OFFSET],
        buf[REV_OFFSET + 1],
        buf[REV_OFFSET + 2],
        buf[REV_OFFSET + 3],
    ]);
    if rev < 1 {
        return None;
    }
    let raw = &buf[LABEL_OFFSET..LABEL_OFFSET + 16];
    let len = raw.iter().position(|&b| b == 0).unwrap_or(16);
    if len == 0 {
        return None;
    }
    let mut out = ArrayString::new();
    for &b in &raw[..len] {
        out.push(if b.is_ascii() && !b.is_ascii_control() { b as char } else { '?' });
    }
    Some(out)
}

/// On-disk filesystem UUID, absent when zeroed.
pub fn uuid(buf: &[u8]) -> Option<[u8; 16]> {
    if !probe(buf) || buf.len() < UUID_OFFSET + 16 {
        return None;
    }
    let mut id = [0u8; 16];
    id.copy_from_slice(&buf[UUID_OFFSET..UUID_OFFSET + 16]);
    if id == [0u8; 16] { None } else { Some(id) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::probe::PROBE_BUF_SIZE;

    fn ext2_buf(rev: u32) -> [u8; PROBE_BUF_SIZE] {
        let mut buf = [0u8; PROBE_BUF_SIZE];
        buf[MAGIC_OFFSET..MAGIC_OFFSET + 2].copy_from_slice(&0xEF53u16.to_le_bytes());
        buf[REV_OFFSET..REV_OFFSET + 4].copy_from_slice(&rev.to_le_bytes());
        buf
    }

    #[test]
    fn test_probe_magic() {
        assert!(probe(&ext2_buf(1)));
        assert!(!probe(&[0u8; PROBE_BUF_SIZE]));
    }

    #[test]
    fn test_label_requires_dynamic_rev() {
        let mut buf = ext2_buf(0);
        buf[LABEL_OFFSET..LABEL_OFFSET + 4].copy_from_slice(b"home");
        assert_eq!(label(&buf), None, "revision 0 has no label field");

        let mut buf = ext2_buf(1);
        buf[LABEL_OFFSET..LABEL_OFFSET + 4].copy_from_slice(b"home");
        assert_eq!(label(&buf).unwrap().as_str(), "home");
    }

    #[test]
    fn test_uuid_zero_is_absent() {
        let mut buf = ext2_buf(1);
        assert_eq!(uuid(&buf), None);
        buf[UUID_OFFSET] = 0xAB;
        assert_eq!(uuid(&buf).unwrap()[0], 0xAB);
    }
}
