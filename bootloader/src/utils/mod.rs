//! Utility Library - Checksums and identifier formatting

pub mod adler32;
pub mod crc32;
pub mod md5;
pub mod uuid;
