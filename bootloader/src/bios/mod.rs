/// BIOS Firmware Services
///
/// Everything above this layer talks to the firmware through the traits
/// defined here; the INT-call implementations live in the submodules. Tests
/// and alternate firmware front ends substitute their own implementations.

pub mod console;
pub mod disk;
pub mod keyboard;
pub mod realmode;
pub mod ticks;

use bitflags::bitflags;

use crate::error::Result;

pub use console::BiosConsole;
pub use disk::BiosDiskServices;
pub use keyboard::BiosKeyboard;
pub use realmode::{RealModeContext, RealModeExecutor};
pub use ticks::BiosTicks;

/// First hard-disk device number; lower numbers are floppies.
pub const BIOS_DEV_HD: u32 = 0x80;

/// Bytes per sector as addressed by the sector cache and the scanners.
pub const SECTOR_SIZE: usize = 512;

/// Block size of no-emulation optical media.
pub const CDROM_BLOCK_SIZE: usize = 2048;

/// Drive shape reported by the firmware.
#[derive(Debug, Clone, Copy)]
pub struct DriveGeometry {
    pub sectors_per_track: u32,
    pub heads: u32,
    pub cylinders: u32,
    /// Packet-interface (LBA) reads supported.
    pub ebios: bool,
    /// Optical drive running without floppy/hard-disk emulation.
    pub no_emulation: bool,
}

impl DriveGeometry {
    /// Native block size of the medium.
    pub fn block_size(&self) -> usize {
        if self.no_emulation { CDROM_BLOCK_SIZE } else { SECTOR_SIZE }
    }
}

/// Raw sector access to one firmware device.
///
/// Counts are in the device's native blocks; errors carry the firmware
/// status byte. Implementations do not retry, the cache layer owns that
/// policy.
pub trait DiskServices {
    fn geometry(&mut self, device: u32) -> Result<DriveGeometry>;

    /// Cylinder/head/sector read for pre-packet-interface devices. The
    /// caller keeps the run inside one track; `sector` is zero-based and
    /// the implementation applies the firmware's 1-based numbering.
    fn read_chs(
        &mut self,
        device: u32,
        cylinder: u32,
        head: u32,
        sector: u32,
        count: u32,
        buf: &mut [u8],
    ) -> Result;

    /// Packet-interface read at an absolute block number.
    fn read_lba(&mut self, device: u32, block: u64, count: u32, buf: &mut [u8]) -> Result;

    /// Packet-interface write, used by the ramdisk loader only.
    fn write_lba(&mut self, device: u32, block: u64, count: u32, buf: &[u8]) -> Result;
}

bitflags! {
    /// Modifier state from the keyboard services.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShiftFlags: u8 {
        const RIGHT_SHIFT = 1 << 0;
        const LEFT_SHIFT = 1 << 1;
        const CONTROL = 1 << 2;
        const ALT = 1 << 3;
        const SCROLL_LOCK = 1 << 4;
        const NUM_LOCK = 1 << 5;
        const CAPS_LOCK = 1 << 6;
        const INSERT = 1 << 7;
    }
}

impl ShiftFlags {
    /// Any modifier that requests a non-default boot when held at startup.
    pub fn modifier_held(&self) -> bool {
        self.intersects(
            ShiftFlags::RIGHT_SHIFT | ShiftFlags::LEFT_SHIFT | ShiftFlags::CONTROL | ShiftFlags::ALT,
        )
    }
}

/// Keystroke input. Keys are `scan_code << 8 | ascii` as the firmware
/// reports them.
pub trait KeyboardServices {
    /// True when a keystroke is buffered; does not consume it.
    fn key_available(&mut self) -> bool;

    /// Block until a keystroke arrives and consume it.
    fn read_key(&mut self) -> u16;

    fn shift_flags(&mut self) -> ShiftFlags;

    /// Drain any buffered keystrokes.
    fn flush(&mut self) {
        while self.key_available() {
            let _ = self.read_key();
        }
    }
}

/// Timer ticks at roughly 18.2 Hz since midnight.
pub trait TickSource {
    fn ticks(&mut self) -> u64;
}

/// Ticks per second of the firmware timer, rounded.
pub const TICKS_PER_SEC: u64 = 18;

/// Text output sink shared by the logger and the menu renderer.
pub trait ConsoleOut {
    fn write_str(&self, s: &str);

    fn write_char(&self, c: char) {
        let mut buf = [0u8; 4];
        self.write_str(c.encode_utf8(&mut buf));
    }
}
