//! FAT boot-parameter-block inspection
//!
//! The BPB carries no magic of its own, so recognition is a sanity check
//! of the geometry fields followed by the filesystem-type string. The type
//! string alone is advisory and never trusted without the geometry check.

use arrayvec::ArrayString;

use crate::fs::FilesystemKind;

/// Recognize a FAT volume and classify its width.
pub fn probe(buf: &[u8]) -> Option<FilesystemKind> {
    if buf.len() < 512 {
        return None;
    }

    let bps = u16::from_le_bytes([buf[11], buf[12]]);
    if bps < 512 || bps > 2048 || !bps.is_power_of_two() {
        return None;
    }
    let spc = buf[13];
    if spc == 0 || !spc.is_power_of_two() {
        return None;
    }

    let root_dir_ents = u16::from_le_bytes([buf[17], buf[18]]);
    if root_dir_ents == 0 {
        // FAT32 leaves the FAT12/16 root directory fields zero.
        if &buf[82..90] == b"FAT32   " {
            return Some(FilesystemKind::Fat32);
        }
        return None;
    }

    // FAT12/16 extended boot record.
    if buf[38] != 0x29 {
        return None;
    }
    match &buf[54..62] {
        b"FAT16   " => Some(FilesystemKind::Fat16),
        b"FAT12   " => Some(FilesystemKind::Fat12),
        _ => None,
    }
}

/// BPB volume label, absent when unset or the "NO NAME" placeholder.
pub fn label(buf: &[u8], kind: FilesystemKind) -> Option<ArrayString<11>> {
    let (sig_off, label_off) = match kind {
        FilesystemKind::Fat32 => (66, 71),
        FilesystemKind::Fat16 | FilesystemKind::Fat12 => (38, 43),
        _ => return None,
    };
    if buf.len() < label_off + 11 || buf[sig_off] != 0x29 {
        return None;
    }
    let raw = &buf[label_off..label_off + 11];
    if raw == b"NO NAME    " {
        return None;
    }
    let trimmed = raw
        .iter()
        .rposition(|&b| b != b' ' && b != 0)
        .map(|end| &raw[..=end])?;
    let mut out = ArrayString::new();
    for &b in trimmed {
        out.push(if b.is_ascii() && !b.is_ascii_control() { b as char } else { '?' });
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bpb(bps: u16, spc: u8) -> [u8; 512] {
        let mut buf = [0u8; 512];
        buf[11..13].copy_from_slice(&bps.to_le_bytes());
        buf[13] = spc;
        buf
    }

    fn fat32_bpb() -> [u8; 512] {
        let mut buf = bpb(512, 8);
        buf[82..90].copy_from_slice(b"FAT32   ");
        buf
    }

    fn fat16_bpb() -> [u8; 512] {
        let mut buf = bpb(512, 4);
        buf[17..19].copy_from_slice(&512u16.to_le_bytes());
        buf[38] = 0x29;
        buf[54..62].copy_from_slice(b"FAT16   ");
        buf
    }

    #[test]
    fn test_geometry_sanity_gates_the_type_string() {
        assert_eq!(probe(&fat32_bpb()), Some(FilesystemKind::Fat32));

        let mut bad_bps = fat32_bpb();
        bad_bps[11..13].copy_from_slice(&513u16.to_le_bytes());
        assert_eq!(probe(&bad_bps), None);

        let mut bad_spc = fat32_bpb();
        bad_spc[13] = 3;
        assert_eq!(probe(&bad_spc), None);
    }

    #[test]
    fn test_width_classification() {
        assert_eq!(probe(&fat16_bpb()), Some(FilesystemKind::Fat16));

        let mut fat12 = fat16_bpb();
        fat12[54..62].copy_from_slice(b"FAT12   ");
        assert_eq!(probe(&fat12), Some(FilesystemKind::Fat12));

        let mut no_sig = fat16_bpb();
        no_sig[38] = 0;
        assert_eq!(probe(&no_sig), None);
    }

    #[test]
    fn test_label_extraction() {
        let mut buf = fat16_bpb();
        buf[43..54].copy_from_slice(b"USB STICK  ");
        assert_eq!(label(&buf, FilesystemKind::Fat16).unwrap().as_str(), "USB STICK");

        buf[43..54].copy_from_slice(b"NO NAME    ");
        assert_eq!(label(&buf, FilesystemKind::Fat16), None);

        let mut f32 = fat32_bpb();
        f32[66] = 0x29;
        f32[71..82].copy_from_slice(b"EFI        ");
        assert_eq!(label(&f32, FilesystemKind::Fat32).unwrap().as_str(), "EFI");
    }
}
