//! Apple Partition Map scanner
//!
//! All multi-byte fields are big-endian. Block zero may declare an in-band
//! block size larger than 512; every sector number in the map is then
//! scaled by `block_size / 512`. The entry count comes from the first
//! entry's own map-entries field. Only Apple_HFS entries become volumes.

use arrayvec::ArrayString;

use crate::disk::{ScanOutcome, SectorSource};
use crate::error::Result;
use crate::partition::{apply_capture, capture_fs};
use crate::volume::{PartScheme, Volume, VolumeArena, VolumeFlags, VolumeMap};

/// Big-endian 'ER' signature of block zero.
const BLOCK0_SIG: u16 = 0x4552;

/// Big-endian 'PM' signature of a partition map entry.
const DPME_SIG: u16 = 0x504D;

/// First sector of the partition map entries, in 512-byte units before
/// block-size scaling.
const MAP_SECTOR: u64 = 2;

fn be16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn be32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn copy_cstr(out: &mut ArrayString<32>, raw: &[u8]) {
    let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    for &b in &raw[..len.min(32)] {
        let c = if b.is_ascii() && !b.is_ascii_control() { b as char } else { '?' };
        if out.try_push(c).is_err() {
            break;
        }
    }
}

/// Scan an APM device.
pub fn scan(
    src: &mut dyn SectorSource,
    arena: &mut VolumeArena,
    device: u32,
) -> Result<ScanOutcome> {
    let mut block0 = [0u8; 512];
    src.read_bytes(device, 0, 0, &mut block0)?;

    // A declared block size scales every sector number in the map.
    let factor = if be16(&block0, 0) == BLOCK0_SIG {
        let blk_size = be16(&block0, 2) as u64;
        (blk_size / 512).max(1)
    } else {
        1
    };

    let mut map = VolumeMap::new(device);
    let mut entry = [0u8; 512];
    let mut npart = u32::MAX;
    let mut index = 0u32;

    while index < npart {
        if src
            .read_bytes(device, (MAP_SECTOR + index as u64) * factor, 0, &mut entry)
            .is_err()
            || be16(&entry, 0) != DPME_SIG
        {
            break;
        }
        if index == 0 {
            npart = be32(&entry, 4);
        }

        let mut type_name = ArrayString::new();
        copy_cstr(&mut type_name, &entry[48..80]);
        if type_name.as_str() == "Apple_HFS" {
            let offset = be32(&entry, 8) as u64 * factor;
            let cap = capture_fs(src, device, offset);

            let mut vol = Volume::new(device, index, offset, PartScheme::Apm);
            vol.part_size = be32(&entry, 12) as u64 * factor;
            apply_capture(&mut vol, &cap);
            copy_cstr(&mut vol.name, &entry[16..48]);
            vol.type_name = type_name;
            vol.flags |=
                VolumeFlags::NATIVE_BOOT | VolumeFlags::BOOTABLE | VolumeFlags::SYSTEM_VOLUME;

            let id = arena.insert(vol);
            map.link(id);
        }
        index += 1;
    }

    Ok(ScanOutcome { map, designated: None })
}
