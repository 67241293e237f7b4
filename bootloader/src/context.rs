//! Per-attempt boot state
//!
//! All mutable state threaded through the option menu, the argument
//! resolver and the hand-off path lives in one [`BootContext`] owned by
//! the outer loop. The only module-scope singletons in the crate are the
//! disk subsystem's map list and sector cache.

use arrayvec::ArrayString;
use bitflags::bitflags;

use crate::config::BOOT_LINE_LEN;
use crate::volume::VolumeId;

bitflags! {
    /// Boot interaction mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BootMode: u8 {
        /// Skip all interaction and boot the default volume.
        const QUIET = 1 << 0;
        /// A modifier key was held; boot with the safe-mode flag.
        const SAFE = 1 << 1;
    }
}

/// What the outer loop does with one resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStatus {
    /// Kernel arguments resolved; proceed to load and hand off.
    Proceed,
    /// Selected volume hosts a foreign OS; its boot sector is staged and
    /// control chains to it.
    ChainLoad,
    /// Discovery must be redone (escape, rescan, or load failure).
    RedoDiscovery,
}

/// State carried across one iteration of the outer boot loop.
#[derive(Debug)]
pub struct BootContext {
    /// Firmware device the loader was read from.
    pub bios_dev: u32,
    /// Currently selected volume, cleared on escape/rescan.
    pub boot_volume: Option<VolumeId>,
    pub mode: BootMode,
    pub verbose: bool,
    /// True once a non-default kernel name was chosen; disables the
    /// kernel cache.
    pub override_kernel: bool,
    /// Set when a menu shortcut already forced a boot action; suppresses
    /// the config-driven recompute of mode flags during resolution.
    pub should_boot: bool,
    /// Kernel path to load.
    pub boot_file: ArrayString<BOOT_LINE_LEN>,
    /// Root device string passed as `rd=`.
    pub root_device: ArrayString<BOOT_LINE_LEN>,
    /// Configured mkext cache name; non-empty disables the kernel cache.
    pub mkext_name: ArrayString<BOOT_LINE_LEN>,
    /// Device to chain-load when resolution returns
    /// [`BootStatus::ChainLoad`].
    pub chain_boot_dev: u32,
    /// The loader itself came off no-emulation optical media.
    pub booted_from_cdrom: bool,
    pub cdrom_rescan_enabled: bool,
    pub scan_single_drive: bool,
}

impl BootContext {
    pub fn new(bios_dev: u32) -> Self {
        BootContext {
            bios_dev,
            boot_volume: None,
            mode: BootMode::empty(),
            verbose: false,
            override_kernel: false,
            should_boot: false,
            boot_file: ArrayString::new(),
            root_device: ArrayString::new(),
            mkext_name: ArrayString::new(),
            chain_boot_dev: 0,
            booted_from_cdrom: false,
            cdrom_rescan_enabled: false,
            scan_single_drive: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_context_defaults() {
        let ctx = BootContext::new(0x80);
        assert_eq!(ctx.bios_dev, 0x80);
        assert!(ctx.boot_volume.is_none());
        assert!(ctx.mode.is_empty());
        assert!(!ctx.override_kernel);
    }
}
