//! FDISK (MBR) scanner
//!
//! Primaries take partition numbers 1 through 4 by slot. Extended chains
//! are followed through nested tables; every logical partition is numbered
//! `4 + depth` where depth counts nested tables, so the sequence continues
//! 5, 6, 7 regardless of how deeply the chain nests. Relative sector
//! fields inside the chain are fixed up against the first extended base
//! before anything downstream sees them.

use crate::disk::{read_boot_sector, ScanOutcome, SectorSource};
use crate::error::Result;
use crate::partition::{apply_capture, capture_fs};
use crate::volume::{PartScheme, Volume, VolumeArena, VolumeFlags, VolumeMap};

/// Primary partition slots in the MBR.
pub const FDISK_NPART: u32 = 4;

/// Offset of the partition table within the boot sector.
const TABLE_OFFSET: usize = 446;

/// Active (bootable) flag in the boot id byte.
const ACTIVE: u8 = 0x80;

/// System id of an HFS partition.
const ID_HFS: u8 = 0xAF;

/// System id of a dedicated booter partition.
const ID_BOOTER: u8 = 0xAB;

const ID_NTFS: u8 = 0x07;
const ID_LINUX: u8 = 0x83;

const FAT_IDS: [u8; 6] = [0x01, 0x04, 0x06, 0x0B, 0x0C, 0x0E];
const EXTENDED_IDS: [u8; 3] = [0x05, 0x0F, 0x85];

/// One parsed partition table entry.
#[derive(Debug, Clone, Copy)]
pub struct FdiskEntry {
    pub boot_id: u8,
    pub system_id: u8,
    /// Start sector; absolute once the iterator has applied the extended
    /// base fixup.
    pub rel_sect: u32,
    pub num_sect: u32,
}

impl FdiskEntry {
    pub fn is_extended(&self) -> bool {
        EXTENDED_IDS.contains(&self.system_id)
    }

    pub fn is_active(&self) -> bool {
        self.boot_id & ACTIVE != 0
    }
}

fn parse_table(sector: &[u8; 512]) -> [FdiskEntry; 4] {
    let mut table = [FdiskEntry { boot_id: 0, system_id: 0, rel_sect: 0, num_sect: 0 }; 4];
    for (i, entry) in table.iter_mut().enumerate() {
        let off = TABLE_OFFSET + i * 16;
        entry.boot_id = sector[off];
        entry.system_id = sector[off + 4];
        entry.rel_sect = u32::from_le_bytes([
            sector[off + 8],
            sector[off + 9],
            sector[off + 10],
            sector[off + 11],
        ]);
        entry.num_sect = u32::from_le_bytes([
            sector[off + 12],
            sector[off + 13],
            sector[off + 14],
            sector[off + 15],
        ]);
    }
    table
}

/// Walks primaries and extended chains, yielding `(part_no, entry)` with
/// absolute sector offsets.
pub struct FdiskIter {
    table: [FdiskEntry; 4],
    next_slot: u32,
    /// Base of the first extended partition; nested chain links are
    /// relative to it.
    first_base: u32,
    /// Base of the current nested table; logical partitions are relative
    /// to it.
    ext_base: u32,
    ext_depth: u32,
    ext_part: Option<FdiskEntry>,
}

impl FdiskIter {
    pub fn new(sector0: &[u8; 512]) -> Self {
        FdiskIter {
            table: parse_table(sector0),
            next_slot: 0,
            first_base: 0,
            ext_base: 0,
            ext_depth: 0,
            ext_part: None,
        }
    }

    pub fn next(
        &mut self,
        src: &mut dyn SectorSource,
        device: u32,
    ) -> Option<(u32, FdiskEntry)> {
        loop {
            let part = if self.next_slot < FDISK_NPART {
                Some(self.table[self.next_slot as usize])
            } else if let Some(ext) = self.ext_part.take() {
                let blkno = ext.rel_sect + self.first_base;
                if self.ext_depth == 0 {
                    self.first_base = blkno;
                }
                self.ext_base = blkno;
                match read_boot_sector(src, device, blkno as u64) {
                    Ok(sector) => {
                        self.table = parse_table(&sector);
                        self.next_slot = 0;
                        self.ext_depth += 1;
                        continue;
                    }
                    // Broken link ends the chain.
                    Err(_) => None,
                }
            } else {
                None
            };

            let mut part = part?;
            self.next_slot += 1;

            if part.is_extended() {
                self.ext_part = Some(part);
                continue;
            }
            if part.system_id == 0 {
                continue;
            }

            part.rel_sect += self.ext_base;
            let part_no = if self.ext_depth > 0 {
                self.ext_depth + FDISK_NPART
            } else {
                self.next_slot
            };
            return Some((part_no, part));
        }
    }
}

/// Scan an FDISK-partitioned device.
pub fn scan(
    src: &mut dyn SectorSource,
    arena: &mut VolumeArena,
    device: u32,
    sector0: &[u8; 512],
) -> Result<ScanOutcome> {
    let mut map = VolumeMap::new(device);
    let mut designated = None;
    let mut iter = FdiskIter::new(sector0);

    while let Some((part_no, part)) = iter.next(src, device) {
        let offset = part.rel_sect as u64;
        let cap = capture_fs(src, device, offset);

        let mut vol = Volume::new(device, part_no, offset, PartScheme::Fdisk);
        vol.part_type = part.system_id;
        vol.part_size = part.num_sect as u64;
        apply_capture(&mut vol, &cap);

        match part.system_id {
            ID_HFS => {
                vol.flags |= VolumeFlags::NATIVE_BOOT;
                if cap.boot_sig {
                    vol.flags |= VolumeFlags::BOOTABLE;
                }
                if part.is_active() {
                    vol.flags |= VolumeFlags::PRIMARY;
                }
            }
            ID_BOOTER => {
                // Only an active booter partition matters; it becomes the
                // firmware-designated boot volume.
                if !part.is_active() {
                    continue;
                }
                vol.flags |= VolumeFlags::NATIVE_BOOT | VolumeFlags::BOOTER;
                if cap.boot_sig {
                    vol.flags |= VolumeFlags::BOOTABLE;
                }
            }
            id if FAT_IDS.contains(&id) || id == ID_NTFS || id == ID_LINUX => {
                if cap.boot_sig {
                    vol.flags |= VolumeFlags::FOREIGN_BOOT;
                }
            }
            _ => {
                // Unknown type: listed for chain-loading, described by its
                // raw type byte.
                if cap.boot_sig {
                    vol.flags |= VolumeFlags::FOREIGN_BOOT;
                }
                vol.fs = None;
            }
        }

        let is_booter = part.system_id == ID_BOOTER;
        let id = arena.insert(vol);
        map.link(id);
        if is_booter {
            designated = Some(id);
        }
    }

    Ok(ScanOutcome { map, designated })
}
