//! Filesystem recognition and metadata capture
//!
//! The probe inspects the first 2 KiB of a partition and never touches the
//! device itself; scanners hand it a buffer they already read. Per-format
//! helpers pull labels and identifiers out of the same buffer so a scan
//! costs one read per partition.

pub mod ext2;
pub mod fat;
pub mod hfs;
pub mod ntfs;
pub mod probe;

use alloc::vec::Vec;
use arrayvec::ArrayString;

use crate::error::Result;
use crate::volume::VolumeId;

pub use probe::{probe, PROBE_BUF_SIZE};

/// Filesystem recognized at a partition start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemKind {
    HfsPlus,
    Ext2,
    Ntfs,
    Fat32,
    Fat16,
    Fat12,
}

impl FilesystemKind {
    /// The FDISK system id conventionally matching this filesystem, used
    /// to back-fill the partition type where the map does not carry one.
    pub fn fdisk_type(self) -> u8 {
        match self {
            FilesystemKind::HfsPlus => 0xAF,
            FilesystemKind::Ext2 => 0x83,
            FilesystemKind::Ntfs => 0x07,
            FilesystemKind::Fat32 => 0x0B,
            FilesystemKind::Fat16 => 0x06,
            FilesystemKind::Fat12 => 0x01,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FilesystemKind::HfsPlus => "HFS+",
            FilesystemKind::Ext2 => "ext2",
            FilesystemKind::Ntfs => "NTFS",
            FilesystemKind::Fat32 => "FAT32",
            FilesystemKind::Fat16 => "FAT16",
            FilesystemKind::Fat12 => "FAT12",
        }
    }
}

/// Metadata returned by [`FsReader::file_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Flat,
    Directory,
    Other,
}

#[derive(Debug, Clone, Copy)]
pub struct FileInfo {
    pub kind: FileKind,
    /// Modification time, seconds since the filesystem's epoch.
    pub mtime: u32,
    pub size: u64,
}

/// File access on mounted volumes.
///
/// The loader keeps a current root volume; paths passed with `volume: None`
/// resolve against it. Mount state and directory traversal live behind this
/// trait so discovery and policy code stay free of filesystem internals.
pub trait FsReader {
    /// Set the volume against which rootless paths resolve.
    fn set_root(&mut self, volume: VolumeId);

    fn file_info(&mut self, volume: Option<VolumeId>, path: &str) -> Result<FileInfo>;

    /// Read up to `buf.len()` bytes of a file, returning the bytes read.
    fn read_file(&mut self, volume: Option<VolumeId>, path: &str, buf: &mut [u8]) -> Result<usize>;

    /// Read a whole file into memory.
    fn load_file(&mut self, volume: Option<VolumeId>, path: &str) -> Result<Vec<u8>>;

    /// Mounted-volume label, for formats whose label lives beyond the
    /// probe window.
    fn volume_label(&mut self, volume: VolumeId) -> Option<ArrayString<32>>;
}
