//! Read-ahead sector cache
//!
//! Every firmware disk read fills a multi-sector window; sequential access
//! patterns (directory walks, file reads) then hit the cache instead of
//! the firmware. The cache tracks one window for one device at a time and
//! must be invalidated before any other use of the low transfer buffer.

use alloc::vec;
use alloc::vec::Vec;

use crate::bios::disk::error_name;
use crate::bios::{DiskServices, DriveGeometry, SECTOR_SIZE};
use crate::error::{BootError, Result};

/// Sectors fetched per firmware read. A multiple of four so a window is
/// always whole 2 KiB blocks on no-emulation optical media.
pub const CACHE_SECTORS: usize = 64;

/// Attempts per firmware read before giving up.
const MAX_TRIES: u32 = 5;

/// Corrected-ECC status; data is good, only the correction is reported.
const ECC_CORRECTED: u8 = 0x11;

/// Issue a firmware read with the cache's retry policy.
fn read_with_retry(firmware_reads: &mut u64, mut attempt: impl FnMut() -> Result) -> Result {
    let mut tries = 0;
    loop {
        *firmware_reads += 1;
        match attempt() {
            Ok(()) | Err(BootError::DiskRead(ECC_CORRECTED)) => return Ok(()),
            Err(e) => {
                tries += 1;
                if tries >= MAX_TRIES {
                    return Err(e);
                }
                if let BootError::DiskRead(status) = e {
                    log::debug!(
                        "disk read retry {}: {} ({:#04x})",
                        tries,
                        error_name(status),
                        status
                    );
                }
            }
        }
    }
}

pub struct SectorCache {
    buf: Vec<u8>,
    device: u32,
    /// First cached 512-byte sector.
    first: u64,
    /// Cached sectors, zero while invalid.
    count: u32,
    valid: bool,
    geom: Option<(u32, DriveGeometry)>,
    /// Firmware reads issued, for diagnostics.
    pub firmware_reads: u64,
    /// Sectors fetched from firmware; drives the activity indicator.
    pub activity: u64,
}

impl SectorCache {
    pub fn new() -> Self {
        SectorCache {
            buf: vec![0u8; CACHE_SECTORS * SECTOR_SIZE],
            device: u32::MAX,
            first: 0,
            count: 0,
            valid: false,
            geom: None,
            firmware_reads: 0,
            activity: 0,
        }
    }

    /// Drop the cached window. Required before anything else touches the
    /// firmware transfer buffer.
    pub fn invalidate(&mut self) {
        self.valid = false;
        self.count = 0;
    }

    /// Forget everything including cached geometry, for media changes.
    pub fn reset(&mut self) {
        self.invalidate();
        self.geom = None;
        self.device = u32::MAX;
    }

    fn geometry(&mut self, svc: &mut dyn DiskServices, device: u32) -> Result<DriveGeometry> {
        if let Some((dev, geom)) = self.geom {
            if dev == device {
                return Ok(geom);
            }
        }
        let geom = svc.geometry(device)?;
        self.geom = Some((device, geom));
        Ok(geom)
    }

    fn hit(&self, device: u32, secno: u64) -> bool {
        self.valid
            && self.device == device
            && secno >= self.first
            && secno < self.first + self.count as u64
    }

    fn fill_lba(&mut self, svc: &mut dyn DiskServices, device: u32, secno: u64, divisor: u64) -> Result {
        // Align down so the window starts on a device block.
        let first = secno - (secno % divisor);
        let nsecs = CACHE_SECTORS as u64;
        self.valid = false;
        let buf = &mut self.buf[..];
        read_with_retry(&mut self.firmware_reads, || {
            svc.read_lba(device, first / divisor, (nsecs / divisor) as u32, buf)
        })?;
        self.device = device;
        self.first = first;
        self.count = nsecs as u32;
        self.valid = true;
        self.activity += nsecs;
        Ok(())
    }

    fn fill_chs(&mut self, svc: &mut dyn DiskServices, device: u32, secno: u64, geom: DriveGeometry) -> Result {
        let spt = geom.sectors_per_track as u64;
        let heads = geom.heads as u64;
        let cyl = (secno / (spt * heads)) as u32;
        let head = ((secno / spt) % heads) as u32;
        let sec = secno % spt;
        // Never read past the end of the track.
        let nsecs = (CACHE_SECTORS as u64).min(spt - sec);
        self.valid = false;
        let buf = &mut self.buf[..];
        read_with_retry(&mut self.firmware_reads, || {
            svc.read_chs(device, cyl, head, sec as u32, nsecs as u32, buf)
        })?;
        self.device = device;
        self.first = secno;
        self.count = nsecs as u32;
        self.valid = true;
        self.activity += nsecs;
        Ok(())
    }

    /// Read one 512-byte sector through the cache.
    pub fn read_sector(
        &mut self,
        svc: &mut dyn DiskServices,
        device: u32,
        secno: u64,
    ) -> Result<&[u8]> {
        if !self.hit(device, secno) {
            let geom = self.geometry(svc, device)?;
            if geom.ebios || geom.no_emulation {
                let divisor = (geom.block_size() / SECTOR_SIZE) as u64;
                self.fill_lba(svc, device, secno, divisor)?;
            } else {
                self.fill_chs(svc, device, secno, geom)?;
            }
        }
        let off = (secno - self.first) as usize * SECTOR_SIZE;
        Ok(&self.buf[off..off + SECTOR_SIZE])
    }
}

impl Default for SectorCache {
    fn default() -> Self {
        Self::new()
    }
}
