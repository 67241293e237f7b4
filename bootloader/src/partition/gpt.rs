//! GUID Partition Table scanner
//!
//! The protective MBR must carry exactly one 0xEE entry before the header
//! at LBA 1 is even considered; anything else is treated as a plain FDISK
//! map. The header is validated by signature, size bounds and its CRC32
//! self-checksum (computed with the checksum field zeroed). Entries are
//! classified independently of each other: the type GUID picks the role
//! and the filesystem probe of the partition start refines it.

use crate::disk::{ScanOutcome, SectorSource};
use crate::error::Result;
use crate::fs::FilesystemKind;
use crate::partition::{apply_capture, capture_fs};
use crate::utils::crc32::crc32;
use crate::volume::{PartScheme, Volume, VolumeArena, VolumeFlags, VolumeMap};

/// Protective partition system id in the MBR.
const PROTECTIVE_ID: u8 = 0xEE;

const HEADER_SIG: &[u8; 8] = b"EFI PART";

/// Header size bounds: the defined fields up to one sector.
const HEADER_MIN: u32 = 92;
const HEADER_MAX: u32 = 512;

/// Size of one defined partition entry.
const ENTRY_SIZE_MIN: u32 = 128;

/// A type GUID in on-disk (mixed-endian) byte order.
type Guid = [u8; 16];

const fn guid(d1: u32, d2: u16, d3: u16, d4: [u8; 8]) -> Guid {
    let a = d1.to_le_bytes();
    let b = d2.to_le_bytes();
    let c = d3.to_le_bytes();
    [
        a[0], a[1], a[2], a[3], b[0], b[1], c[0], c[1], d4[0], d4[1], d4[2], d4[3], d4[4],
        d4[5], d4[6], d4[7],
    ]
}

/// 48465300-0000-11AA-AA11-00306543ECAC
const HFS_GUID: Guid = guid(0x48465300, 0x0000, 0x11AA, [0xAA, 0x11, 0x00, 0x30, 0x65, 0x43, 0xEC, 0xAC]);
/// 426F6F74-0000-11AA-AA11-00306543ECAC
const BOOT_GUID: Guid = guid(0x426F6F74, 0x0000, 0x11AA, [0xAA, 0x11, 0x00, 0x30, 0x65, 0x43, 0xEC, 0xAC]);
/// C12A7328-F81F-11D2-BA4B-00A0C93EC93B
const EFISYS_GUID: Guid = guid(0xC12A7328, 0xF81F, 0x11D2, [0xBA, 0x4B, 0x00, 0xA0, 0xC9, 0x3E, 0xC9, 0x3B]);
/// EBD0A0A2-B9E5-4433-87C0-68B6B72699C7
const BASICDATA_GUID: Guid = guid(0xEBD0A0A2, 0xB9E5, 0x4433, [0x87, 0xC0, 0x68, 0xB6, 0xB7, 0x26, 0x99, 0xC7]);
/// E3C9E316-0B5C-4DB8-817D-F92DF00215AE
const BASICDATA2_GUID: Guid = guid(0xE3C9E316, 0x0B5C, 0x4DB8, [0x81, 0x7D, 0xF9, 0x2D, 0xF0, 0x02, 0x15, 0xAE]);

/// True when the MBR carries exactly one protective entry. Zero or more
/// than one means this is not a GPT disk.
pub fn has_single_protective_entry(sector0: &[u8; 512]) -> bool {
    let mut found = 0;
    for i in 0..4 {
        if sector0[446 + i * 16 + 4] == PROTECTIVE_ID {
            found += 1;
        }
    }
    found == 1
}

struct RawHeader {
    entries_lba: u64,
    entries_count: u32,
    entry_size: u32,
}

/// Validate the header at LBA 1.
fn read_header(src: &mut dyn SectorSource, device: u32) -> Result<Option<RawHeader>> {
    let mut sector = [0u8; 512];
    src.read_bytes(device, 1, 0, &mut sector)?;

    if &sector[0..8] != HEADER_SIG {
        return Ok(None);
    }
    let hdr_size = u32::from_le_bytes([sector[12], sector[13], sector[14], sector[15]]);
    if hdr_size < HEADER_MIN || hdr_size > HEADER_MAX {
        return Ok(None);
    }
    let stored_crc = u32::from_le_bytes([sector[16], sector[17], sector[18], sector[19]]);

    let mut scratch = sector;
    scratch[16..20].fill(0);
    if crc32(0, &scratch[..hdr_size as usize]) != stored_crc {
        log::debug!("device {:#x}: GPT header checksum mismatch", device);
        return Ok(None);
    }

    let entries_lba = u64::from_le_bytes(sector[72..80].try_into().unwrap_or([0; 8]));
    let entries_count = u32::from_le_bytes([sector[80], sector[81], sector[82], sector[83]]);
    let entry_size = u32::from_le_bytes([sector[84], sector[85], sector[86], sector[87]]);
    if entry_size < ENTRY_SIZE_MIN || entries_count == 0 {
        return Ok(None);
    }
    Ok(Some(RawHeader { entries_lba, entries_count, entry_size }))
}

/// Scan a GPT device. `Ok(None)` means the header did not validate and
/// the caller should fall back to FDISK.
pub fn scan(
    src: &mut dyn SectorSource,
    arena: &mut VolumeArena,
    device: u32,
) -> Result<Option<ScanOutcome>> {
    let Some(hdr) = read_header(src, device)? else {
        return Ok(None);
    };

    // Whole entry array, rounded up to a sector multiple.
    let bytes = (hdr.entries_count as usize * hdr.entry_size as usize + 511) & !511;
    let mut array = alloc::vec![0u8; bytes];
    src.read_bytes(device, hdr.entries_lba, 0, &mut array)?;
    log::debug!("device {:#x}: GPT with {} entries", device, hdr.entries_count);

    let mut map = VolumeMap::new(device);
    let mut designated = None;

    for index in 0..hdr.entries_count {
        let off = index as usize * hdr.entry_size as usize;
        let entry = &array[off..off + hdr.entry_size as usize];
        let mut type_guid: Guid = [0; 16];
        type_guid.copy_from_slice(&entry[0..16]);
        if type_guid == [0; 16] {
            continue;
        }
        let lba_start = u64::from_le_bytes(entry[32..40].try_into().unwrap_or([0; 8]));
        let lba_end = u64::from_le_bytes(entry[40..48].try_into().unwrap_or([0; 8]));
        let part_no = index + 1;

        let cap = capture_fs(src, device, lba_start);
        let mut vol = Volume::new(device, part_no, lba_start, PartScheme::Gpt);
        vol.part_size = lba_end.saturating_sub(lba_start) + 1;
        apply_capture(&mut vol, &cap);
        // Downstream type dispatch wants the FDISK-equivalent code.
        vol.part_type = cap.kind.map(FilesystemKind::fdisk_type).unwrap_or(0);

        let accepted = match type_guid {
            g if g == HFS_GUID || g == BOOT_GUID => {
                vol.flags |= VolumeFlags::NATIVE_BOOT;
                if g == BOOT_GUID {
                    vol.flags |= VolumeFlags::BOOTER;
                }
                if cap.boot_sig {
                    vol.flags |= VolumeFlags::BOOTABLE;
                }
                true
            }
            g if g == BASICDATA_GUID || g == BASICDATA2_GUID => {
                if cap.boot_sig {
                    vol.flags |= VolumeFlags::FOREIGN_BOOT;
                }
                true
            }
            g if g == EFISYS_GUID => match cap.kind {
                // Only trusted with the matching boot code in place.
                Some(FilesystemKind::HfsPlus) if cap.boot_sig => {
                    vol.flags |= VolumeFlags::NATIVE_BOOT | VolumeFlags::BOOTABLE | VolumeFlags::EFI_SYSTEM;
                    true
                }
                Some(FilesystemKind::Fat32) if cap.fat32_efi => {
                    vol.flags |= VolumeFlags::NATIVE_BOOT | VolumeFlags::BOOTABLE | VolumeFlags::EFI_SYSTEM;
                    true
                }
                _ => false,
            },
            _ => false,
        };
        if !accepted {
            continue;
        }

        let mark_designated = vol.flags.contains(VolumeFlags::EFI_SYSTEM);
        let id = arena.insert(vol);
        map.link(id);
        if mark_designated {
            designated = Some(id);
        }
    }

    Ok(Some(ScanOutcome { map, designated }))
}
