//! Ordered filesystem probe
//!
//! Formats are tested in a fixed order and the first match wins. The order
//! matters: an HFS+ wrapper volume also carries a BPB-like region, and a
//! freshly formatted FAT volume can leave stale superblock bytes further
//! in, so the more specific signatures go first.

use crate::fs::{ext2, fat, hfs, ntfs, FilesystemKind};

/// Bytes a scanner must supply for a full probe.
pub const PROBE_BUF_SIZE: usize = 2048;

/// Identify the filesystem at a partition start. `buf` holds the first
/// [`PROBE_BUF_SIZE`] bytes of the partition.
pub fn probe(buf: &[u8]) -> Option<FilesystemKind> {
    if buf.len() < PROBE_BUF_SIZE {
        return None;
    }
    if hfs::probe(buf) {
        return Some(FilesystemKind::HfsPlus);
    }
    if ext2::probe(buf) {
        return Some(FilesystemKind::Ext2);
    }
    if ntfs::probe(buf) {
        return Some(FilesystemKind::Ntfs);
    }
    fat::probe(buf)
}
