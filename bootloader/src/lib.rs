//! Moray second-stage BIOS bootloader
//!
//! Loaded by a one-sector first stage, this library discovers bootable
//! volumes across the machine's BIOS disks, runs the startup option
//! menu, resolves a kernel command line from layered configuration and
//! hands control to a Darwin/XNU kernel (or chains to a foreign OS boot
//! sector).
//!
//! Layering, bottom up:
//! - [`bios`] wraps the real-mode firmware services behind traits.
//! - [`disk`] adds the sector cache and ramdisk routing on top of them.
//! - [`partition`] and [`fs`] recognize maps and filesystems.
//! - [`volume`] holds discovered volumes and the filtered boot chain.
//! - [`config`], [`boot_menu`], [`options`] and [`kernel_if`] implement
//!   boot policy, all hosted-testable.
//!
//! Everything above [`bios`] is freestanding logic; hosted tests drive
//! it through the same traits the firmware build does.

#![cfg_attr(target_os = "none", no_std)]
#![allow(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod bios;
pub mod boot_menu;
pub mod config;
pub mod context;
pub mod disk;
pub mod error;
pub mod fs;
pub mod heap;
pub mod kernel_if;
pub mod logging;
pub mod options;
pub mod partition;
pub mod utils;
pub mod volume;

pub use context::{BootContext, BootMode, BootStatus};
pub use error::{BootError, Result};

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("{}", info);
    loop {
        core::hint::spin_loop();
    }
}
