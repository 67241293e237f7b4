//! Bootloader error handling
//!
//! This module defines the error types used throughout the bootloader
//! for consistent error reporting and handling.

use core::fmt;

/// Bootloader error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// Disk read failed after retries; payload is the BIOS status byte
    DiskRead(u8),

    /// Drive geometry query failed
    GeometryUnavailable,

    /// Ramdisk read requested but no reader is registered
    RamdiskUnavailable,

    /// Partition table or filesystem structure not recognized
    SignatureMismatch,

    /// Path does not resolve on the mounted volume
    FileNotFound,

    /// Named configuration source absent or unparsable
    ConfigLoadFailed(&'static str),

    /// Resolution attempted without a selected volume
    NoBootVolume,

    /// Kernel image not found at any candidate path
    KernelNotFound,

    /// Kernel image not a recognized format
    DecodeFailed(&'static str),

    /// Boot driver loading failed
    DriverLoadFailed,

    /// Fixed-capacity string or path buffer would overflow
    BufferOverflow(&'static str),

    /// Firmware service used before initialization
    NotInitialized,

    /// Internal state invariant violated
    InvalidState(&'static str),
}

impl BootError {
    /// Convert to an error code suitable for diagnostics
    pub fn as_error_code(&self) -> u32 {
        match self {
            BootError::DiskRead(status) => 0x1000 + (*status as u32),
            BootError::GeometryUnavailable => 0x1100,
            BootError::RamdiskUnavailable => 0x1101,
            BootError::SignatureMismatch => 0x2000,
            BootError::FileNotFound => 0x2001,
            BootError::ConfigLoadFailed(_) => 0x3000,
            BootError::NoBootVolume => 0x4000,
            BootError::KernelNotFound => 0x5000,
            BootError::DecodeFailed(_) => 0x5001,
            BootError::DriverLoadFailed => 0x5002,
            BootError::BufferOverflow(_) => 0x6000,
            BootError::NotInitialized => 0xE000,
            BootError::InvalidState(_) => 0xE001,
        }
    }

    /// Get a human-readable description of the error
    pub fn description(&self) -> &'static str {
        match self {
            BootError::DiskRead(_) => "Disk read failed",
            BootError::GeometryUnavailable => "Drive geometry unavailable",
            BootError::RamdiskUnavailable => "No ramdisk reader registered",
            BootError::SignatureMismatch => "No recognizable structure",
            BootError::FileNotFound => "File not found",
            BootError::ConfigLoadFailed(name) => name,
            BootError::NoBootVolume => "No boot volume selected",
            BootError::KernelNotFound => "Kernel not found",
            BootError::DecodeFailed(msg) => msg,
            BootError::DriverLoadFailed => "Failed to load boot drivers",
            BootError::BufferOverflow(what) => what,
            BootError::NotInitialized => "Firmware services not initialized",
            BootError::InvalidState(msg) => msg,
        }
    }

    /// Check if this error is recoverable by retrying discovery
    pub fn is_recoverable(&self) -> bool {
        match self {
            BootError::DiskRead(_)
            | BootError::SignatureMismatch
            | BootError::FileNotFound
            | BootError::ConfigLoadFailed(_)
            | BootError::NoBootVolume
            | BootError::KernelNotFound
            | BootError::DecodeFailed(_)
            | BootError::BufferOverflow(_) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BootError: {} (code: {:#x})", self.description(), self.as_error_code())
    }
}

/// Result type used throughout the bootloader
pub type Result<T = ()> = core::result::Result<T, BootError>;
