//! Volume UUID derivation and rendering
//!
//! HFS+ volumes carry a 64-bit volume identifier rather than a full UUID;
//! mounted systems report a version-3 UUID derived from it under a fixed
//! filesystem namespace. The boot-uuid kernel argument must match that
//! derivation byte for byte.

use arrayvec::ArrayString;

use super::md5::md5;

/// Fixed namespace for filesystem volume UUIDs.
pub const FS_UUID_NAMESPACE: [u8; 16] = [
    0xB3, 0xE2, 0x0F, 0x39, 0xF2, 0x92, 0x11, 0xD6,
    0x97, 0xA4, 0x00, 0x30, 0x65, 0x43, 0xEC, 0xAC,
];

/// Length of the canonical textual form.
pub const UUID_STR_LEN: usize = 36;

/// Derive the version-3 UUID for a 64-bit volume identifier.
pub fn uuid_from_volume_id(vol_id: [u8; 8]) -> [u8; 16] {
    let mut input = [0u8; 24];
    input[..16].copy_from_slice(&FS_UUID_NAMESPACE);
    input[16..].copy_from_slice(&vol_id);

    let mut digest = md5(&input);
    digest[6] = (digest[6] & 0x0F) | 0x30;
    digest[8] = (digest[8] & 0x3F) | 0x80;
    digest
}

/// Render big-endian UUID bytes as `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`.
pub fn format_uuid(bytes: &[u8; 16]) -> ArrayString<UUID_STR_LEN> {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";

    let mut out = ArrayString::new();
    for (i, b) in bytes.iter().enumerate() {
        if i == 4 || i == 6 || i == 8 || i == 10 {
            out.push('-');
        }
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0F) as usize] as char);
    }
    out
}
