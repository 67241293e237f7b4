//! Disk Subsystem - cached sector access and boot volume discovery
//!
//! [`DiskReader`] is the byte-granular read path used by the scanners and
//! the filesystem layer: it splits requests into 512-byte sectors, serves
//! firmware devices through the read-ahead cache and routes ramdisk device
//! numbers to the registered reader. [`DiskSubsystem`] owns the session
//! state: the cache, the volume arena and the per-device volume maps.

pub mod cache;
pub mod ramdisk;

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::bios::{DiskServices, SECTOR_SIZE};
use crate::error::{BootError, Result};
use crate::partition;
use crate::volume::{
    build_filtered_chain, ChainFilter, FilteredChain, VolumeArena, VolumeId, VolumeMap,
};

pub use cache::SectorCache;
pub use ramdisk::{MemRamdisk, RamdiskReader, RAMDISK_DEV};

/// Byte-granular read access used by scanners and filesystem code.
pub trait SectorSource {
    /// Read `buf.len()` bytes starting `byteoff` bytes into sector `blkno`.
    fn read_bytes(&mut self, device: u32, blkno: u64, byteoff: usize, buf: &mut [u8]) -> Result;
}

/// The standard read path: cache-backed firmware reads plus the ramdisk.
pub struct DiskReader<'a> {
    pub svc: &'a mut dyn DiskServices,
    pub cache: &'a mut SectorCache,
    pub ramdisk: Option<&'a mut (dyn RamdiskReader + 'a)>,
}

impl SectorSource for DiskReader<'_> {
    fn read_bytes(&mut self, device: u32, blkno: u64, byteoff: usize, buf: &mut [u8]) -> Result {
        if device >= RAMDISK_DEV {
            let rd = self.ramdisk.as_deref_mut().ok_or(BootError::RamdiskUnavailable)?;
            return rd.read_bytes(blkno * SECTOR_SIZE as u64 + byteoff as u64, buf);
        }

        let mut secno = blkno + (byteoff / SECTOR_SIZE) as u64;
        let mut skip = byteoff % SECTOR_SIZE;
        let mut written = 0;
        while written < buf.len() {
            let sector = self.cache.read_sector(self.svc, device, secno)?;
            let take = (SECTOR_SIZE - skip).min(buf.len() - written);
            buf[written..written + take].copy_from_slice(&sector[skip..skip + take]);
            written += take;
            skip = 0;
            secno += 1;
        }
        Ok(())
    }
}

/// Offset of the 0xAA55 signature in a boot sector.
const SIG_OFFSET: usize = 510;

/// True when the sector carries the classic boot signature.
pub fn has_boot_signature(sector: &[u8]) -> bool {
    sector.len() >= SIG_OFFSET + 2 && sector[SIG_OFFSET] == 0x55 && sector[SIG_OFFSET + 1] == 0xAA
}

/// True for the FAT32 boot sector our EFI-system helper writes: boot
/// signature plus the "BOOT" magic in the code area.
pub fn is_fat32_efi_boot_sector(sector: &[u8]) -> bool {
    has_boot_signature(sector) && sector.len() >= 101 && &sector[90..101] == b"BOOT       "
}

/// Read a sector and require the boot signature.
pub fn read_boot_sector(
    src: &mut dyn SectorSource,
    device: u32,
    secno: u64,
) -> Result<[u8; SECTOR_SIZE]> {
    let mut sector = [0u8; SECTOR_SIZE];
    src.read_bytes(device, secno, 0, &mut sector)?;
    if !has_boot_signature(&sector) {
        return Err(BootError::SignatureMismatch);
    }
    Ok(sector)
}

/// Result of scanning one device.
pub struct ScanOutcome {
    pub map: VolumeMap,
    /// Volume the firmware (or partition map) designates as the boot
    /// volume, when the scheme expresses one.
    pub designated: Option<VolumeId>,
}

/// Session-wide discovery state.
pub struct DiskSubsystem {
    pub cache: SectorCache,
    arena: VolumeArena,
    maps: Vec<VolumeMap>,
    ramdisk: Option<Box<dyn RamdiskReader>>,
    designated: Option<VolumeId>,
}

impl DiskSubsystem {
    pub fn new() -> Self {
        DiskSubsystem {
            cache: SectorCache::new(),
            arena: VolumeArena::new(),
            maps: Vec::new(),
            ramdisk: None,
            designated: None,
        }
    }

    pub fn arena(&self) -> &VolumeArena {
        &self.arena
    }

    pub fn volume(&self, id: VolumeId) -> &crate::volume::Volume {
        self.arena.get(id)
    }

    pub fn volume_mut(&mut self, id: VolumeId) -> &mut crate::volume::Volume {
        self.arena.get_mut(id)
    }

    pub fn maps(&self) -> &[VolumeMap] {
        &self.maps
    }

    /// Volume the scanners marked as the designated boot volume.
    pub fn designated_volume(&self) -> Option<VolumeId> {
        self.designated
    }

    pub fn register_ramdisk(&mut self, reader: Box<dyn RamdiskReader>) {
        self.ramdisk = Some(reader);
    }

    pub fn unregister_ramdisk(&mut self) -> bool {
        self.ramdisk.take().is_some()
    }

    pub fn has_ramdisk(&self) -> bool {
        self.ramdisk.is_some()
    }

    /// Borrow the read path. Field-level split so scanners can use the
    /// reader while the arena is mutated.
    pub fn reader<'a>(&'a mut self, svc: &'a mut dyn DiskServices) -> DiskReader<'a> {
        DiskReader {
            svc,
            cache: &mut self.cache,
            ramdisk: self.ramdisk.as_deref_mut().map(|r| r as &mut dyn RamdiskReader),
        }
    }

    pub fn find_map(&self, device: u32) -> Option<&VolumeMap> {
        self.maps.iter().find(|m| m.device == device)
    }

    /// Discover the volumes of one device. An existing map for the device
    /// is kept; call [`reset_boot_volumes`] first to force a rescan.
    /// Devices with no recognizable partition map produce no map at all.
    pub fn scan_boot_volumes(&mut self, svc: &mut dyn DiskServices, device: u32) -> Result<usize> {
        if let Some(map) = self.find_map(device) {
            return Ok(map.len());
        }

        let mut reader = DiskReader {
            svc,
            cache: &mut self.cache,
            ramdisk: self.ramdisk.as_deref_mut().map(|r| r as &mut dyn RamdiskReader),
        };
        let outcome = partition::scan_device(&mut reader, &mut self.arena, device)?;

        let count = outcome.map.len();
        if count == 0 {
            // Empty maps are dropped, never linked.
            return Ok(0);
        }
        log::debug!("device {:#x}: {} volume(s)", device, count);
        if outcome.designated.is_some() {
            self.designated = outcome.designated;
        }
        self.maps.push(outcome.map);
        Ok(count)
    }

    /// Forget one device's map and release its volumes.
    pub fn reset_boot_volumes(&mut self, device: u32) {
        if let Some(pos) = self.maps.iter().position(|m| m.device == device) {
            let map = self.maps.remove(pos);
            for id in map.into_ids() {
                if self.designated == Some(id) {
                    self.designated = None;
                }
                self.arena.remove(id);
            }
        }
        self.cache.reset();
    }

    /// Scan every firmware hard disk plus `boot_device`. Stops at the
    /// first device whose geometry query fails.
    pub fn scan_disks(&mut self, svc: &mut dyn DiskServices, boot_device: u32) -> Result<usize> {
        let mut total = 0;
        let mut device = crate::bios::BIOS_DEV_HD;
        while svc.geometry(device).is_ok() {
            total += self.scan_boot_volumes(svc, device)?;
            device += 1;
        }
        if self.find_map(boot_device).is_none() {
            total += self.scan_boot_volumes(svc, boot_device)?;
        }
        Ok(total)
    }

    /// Build the visibility-filtered view over every map.
    pub fn filtered_chain(&self, filter: &ChainFilter<'_>) -> FilteredChain {
        build_filtered_chain(&self.maps, &self.arena, filter)
    }

    /// True when the device was booted as no-emulation optical media.
    pub fn is_cdrom(&self, svc: &mut dyn DiskServices, device: u32) -> bool {
        svc.geometry(device).map(|g| g.no_emulation).unwrap_or(false)
    }
}

impl Default for DiskSubsystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl DiskSubsystem {
    /// Install a pre-built map, bypassing the scanners. Volumes are linked
    /// the way the scanners do it, newest first.
    pub(crate) fn install_map(&mut self, device: u32, vols: Vec<crate::volume::Volume>) -> Vec<VolumeId> {
        let mut map = VolumeMap::new(device);
        let ids: Vec<VolumeId> = vols.into_iter().map(|v| self.arena.insert(v)).collect();
        for &id in &ids {
            map.link(id);
        }
        self.maps.push(map);
        ids
    }

    pub(crate) fn set_designated(&mut self, id: Option<VolumeId>) {
        self.designated = id;
    }
}
