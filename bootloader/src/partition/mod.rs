//! Partition-table scanners
//!
//! Three schemes are understood: FDISK (MBR with extended chains), GPT and
//! the Apple Partition Map. [`scan_device`] picks the scheme from sector
//! zero: a boot signature with exactly one protective entry selects GPT, a
//! boot signature alone selects FDISK, and an APM block-zero signature
//! selects APM. A damaged GPT falls back to FDISK since the protective MBR
//! is itself a valid map.

pub mod apm;
pub mod fdisk;
pub mod gpt;

use crate::disk::{has_boot_signature, ScanOutcome, SectorSource};
use crate::error::Result;
use crate::fs::{self, probe::PROBE_BUF_SIZE, FilesystemKind};
use crate::volume::{Volume, VolumeArena};
use arrayvec::ArrayString;

/// Everything one 2 KiB read at a partition start can tell us.
pub(crate) struct FsCapture {
    pub kind: Option<FilesystemKind>,
    pub boot_sig: bool,
    pub fat32_efi: bool,
    pub label: ArrayString<32>,
    pub mod_time: u32,
    pub fs_id: Option<[u8; 8]>,
}

impl FsCapture {
    fn empty() -> Self {
        FsCapture {
            kind: None,
            boot_sig: false,
            fat32_efi: false,
            label: ArrayString::new(),
            mod_time: 0,
            fs_id: None,
        }
    }
}

/// Probe the partition start and capture label, timestamps and the boot
/// signature in one read. An unreadable start yields an empty capture, not
/// an error; the partition is still listed.
pub(crate) fn capture_fs(src: &mut dyn SectorSource, device: u32, offset: u64) -> FsCapture {
    let mut buf = [0u8; PROBE_BUF_SIZE];
    if src.read_bytes(device, offset, 0, &mut buf).is_err() {
        return FsCapture::empty();
    }

    let kind = fs::probe(&buf);
    let mut cap = FsCapture {
        kind,
        boot_sig: has_boot_signature(&buf[..512]),
        fat32_efi: crate::disk::is_fat32_efi_boot_sector(&buf[..512]),
        label: ArrayString::new(),
        mod_time: 0,
        fs_id: None,
    };
    match kind {
        Some(FilesystemKind::HfsPlus) => {
            cap.mod_time = fs::hfs::mod_time(&buf);
            cap.fs_id = fs::hfs::volume_id(&buf);
        }
        Some(FilesystemKind::Ext2) => {
            if let Some(label) = fs::ext2::label(&buf) {
                cap.label.push_str(&label);
            }
        }
        Some(k @ (FilesystemKind::Fat32 | FilesystemKind::Fat16 | FilesystemKind::Fat12)) => {
            if let Some(label) = fs::fat::label(&buf, k) {
                cap.label.push_str(&label);
            }
        }
        _ => {}
    }
    cap
}

/// Apply a capture to a volume record.
pub(crate) fn apply_capture(vol: &mut Volume, cap: &FsCapture) {
    vol.fs = cap.kind;
    vol.label = cap.label;
    vol.mod_time = cap.mod_time;
    vol.fs_id = cap.fs_id;
}

/// Scan one device with the scheme its sector zero announces.
pub fn scan_device(
    src: &mut dyn SectorSource,
    arena: &mut VolumeArena,
    device: u32,
) -> Result<ScanOutcome> {
    let mut sector0 = [0u8; 512];
    src.read_bytes(device, 0, 0, &mut sector0)?;

    if has_boot_signature(&sector0) {
        if gpt::has_single_protective_entry(&sector0) {
            if let Some(outcome) = gpt::scan(src, arena, device)? {
                return Ok(outcome);
            }
            log::debug!("device {:#x}: protective MBR without valid GPT", device);
        }
        return fdisk::scan(src, arena, device, &sector0);
    }
    apm::scan(src, arena, device)
}
