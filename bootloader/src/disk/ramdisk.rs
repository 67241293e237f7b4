//! BIOS-transparent ramdisk
//!
//! Device numbers from [`RAMDISK_DEV`] up are not firmware devices; reads
//! are routed to a registered reader and bypass the sector cache. The
//! in-memory implementation backs images loaded with the `rd` interactive
//! command.

use alloc::vec::Vec;

use crate::error::{BootError, Result};

/// First ramdisk device number.
pub const RAMDISK_DEV: u32 = 0x100;

/// Byte access to a registered ramdisk image.
pub trait RamdiskReader {
    fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result;

    fn size(&self) -> u64;
}

/// Ramdisk over a memory buffer.
pub struct MemRamdisk {
    data: Vec<u8>,
}

impl MemRamdisk {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl RamdiskReader for MemRamdisk {
    fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result {
        let start = offset as usize;
        let end = start.checked_add(buf.len()).ok_or(BootError::RamdiskUnavailable)?;
        if end > self.data.len() {
            return Err(BootError::RamdiskUnavailable);
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}
