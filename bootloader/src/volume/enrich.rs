//! Post-scan volume enrichment
//!
//! After discovery, volumes that mount are inspected for a rendered disk
//! label and for an installed operating system. Both lookups are
//! best-effort: a volume that refuses to mount simply keeps its scan-time
//! metadata.

use crate::fs::FsReader;
use crate::volume::{Volume, VolumeFlags, VolumeId, VOL_STRLEN};

/// Text sidecar of the rendered disk label, written by the installer.
pub const DISK_LABEL_PATH: &str = "/System/Library/CoreServices/.disk_label.contentDetails";

/// Presence of either marks an installed system root.
pub const SYSTEM_VERSION_PATHS: &[&str] = &[
    "/System/Library/CoreServices/SystemVersion.plist",
    "/System/Library/CoreServices/ServerVersion.plist",
];

/// Refresh one volume's display metadata from its own filesystem.
///
/// Booter volumes carry a label file naming the system they stage; its
/// content replaces the scan-time label when it is plausible text (1 to
/// 31 bytes). System volumes are recognized by their version plist and
/// gain [`VolumeFlags::SYSTEM_VOLUME`].
pub fn enrich_volume(fs: &mut dyn FsReader, id: VolumeId, vol: &mut Volume) {
    if vol.flags.contains(VolumeFlags::BOOTER) {
        if let Some(label) = read_content_details(fs, id) {
            vol.alt_label = label;
        }
    }

    if vol.flags.contains(VolumeFlags::NATIVE_BOOT) && has_system_version(fs, id) {
        vol.flags |= VolumeFlags::SYSTEM_VOLUME;
    }
}

fn read_content_details(
    fs: &mut dyn FsReader,
    id: VolumeId,
) -> Option<arrayvec::ArrayString<VOL_STRLEN>> {
    let info = fs.file_info(Some(id), DISK_LABEL_PATH).ok()?;
    if info.size == 0 || info.size > 31 {
        return None;
    }
    let mut buf = [0u8; 31];
    let len = fs.read_file(Some(id), DISK_LABEL_PATH, &mut buf).ok()?;
    let text = core::str::from_utf8(&buf[..len]).ok()?;
    let text = text.trim_end_matches(['\r', '\n']);
    if text.is_empty() {
        return None;
    }
    let mut label = arrayvec::ArrayString::new();
    label.push_str(text);
    Some(label)
}

fn has_system_version(fs: &mut dyn FsReader, id: VolumeId) -> bool {
    SYSTEM_VERSION_PATHS
        .iter()
        .any(|path| fs.file_info(Some(id), path).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BootError, Result};
    use crate::fs::{FileInfo, FileKind, FsReader};
    use crate::volume::{PartScheme, Volume, VolumeArena};
    use alloc::string::String;
    use alloc::vec::Vec;

    struct FakeFs {
        files: Vec<(String, Vec<u8>)>,
    }

    impl FakeFs {
        fn new(files: &[(&str, &[u8])]) -> Self {
            FakeFs {
                files: files
                    .iter()
                    .map(|(p, d)| (String::from(*p), d.to_vec()))
                    .collect(),
            }
        }

        fn lookup(&self, path: &str) -> Option<&[u8]> {
            self.files
                .iter()
                .find(|(p, _)| p == path)
                .map(|(_, d)| d.as_slice())
        }
    }

    impl FsReader for FakeFs {
        fn set_root(&mut self, _volume: VolumeId) {}

        fn file_info(&mut self, _volume: Option<VolumeId>, path: &str) -> Result<FileInfo> {
            let data = self.lookup(path).ok_or(BootError::KernelNotFound)?;
            Ok(FileInfo {
                kind: FileKind::Flat,
                mtime: 0,
                size: data.len() as u64,
            })
        }

        fn read_file(
            &mut self,
            _volume: Option<VolumeId>,
            path: &str,
            buf: &mut [u8],
        ) -> Result<usize> {
            let data = self.lookup(path).ok_or(BootError::KernelNotFound)?;
            let len = data.len().min(buf.len());
            buf[..len].copy_from_slice(&data[..len]);
            Ok(len)
        }

        fn load_file(&mut self, _volume: Option<VolumeId>, path: &str) -> Result<Vec<u8>> {
            self.lookup(path)
                .map(<[u8]>::to_vec)
                .ok_or(BootError::KernelNotFound)
        }

        fn volume_label(&mut self, _volume: VolumeId) -> Option<arrayvec::ArrayString<32>> {
            None
        }
    }

    fn booter_volume() -> Volume {
        let mut vol = Volume::new(0x80, 3, 409640, PartScheme::Gpt);
        vol.flags = VolumeFlags::NATIVE_BOOT | VolumeFlags::BOOTER;
        vol
    }

    #[test]
    fn test_booter_label_from_content_details() {
        let mut fs = FakeFs::new(&[(DISK_LABEL_PATH, b"Recovery HD\n")]);
        let mut arena = VolumeArena::new();
        let id = arena.insert(booter_volume());
        let mut vol = arena.get(id).clone();
        enrich_volume(&mut fs, id, &mut vol);
        assert_eq!(vol.alt_label.as_str(), "Recovery HD");
    }

    #[test]
    fn test_oversized_label_file_ignored() {
        let big = [b'x'; 64];
        let mut fs = FakeFs::new(&[(DISK_LABEL_PATH, &big)]);
        let mut arena = VolumeArena::new();
        let id = arena.insert(booter_volume());
        let mut vol = arena.get(id).clone();
        enrich_volume(&mut fs, id, &mut vol);
        assert!(vol.alt_label.is_empty());
    }

    #[test]
    fn test_system_version_marks_system_volume() {
        let mut fs = FakeFs::new(&[(
            "/System/Library/CoreServices/SystemVersion.plist",
            b"<plist/>".as_slice(),
        )]);
        let mut arena = VolumeArena::new();
        let mut vol = Volume::new(0x80, 2, 409640, PartScheme::Gpt);
        vol.flags = VolumeFlags::NATIVE_BOOT;
        let id = arena.insert(vol);
        let mut vol = arena.get(id).clone();
        enrich_volume(&mut fs, id, &mut vol);
        assert!(vol.flags.contains(VolumeFlags::SYSTEM_VOLUME));

        let mut empty = FakeFs::new(&[]);
        let mut plain = Volume::new(0x80, 4, 819280, PartScheme::Gpt);
        plain.flags = VolumeFlags::NATIVE_BOOT;
        let pid = arena.insert(plain);
        let mut plain = arena.get(pid).clone();
        enrich_volume(&mut empty, pid, &mut plain);
        assert!(!plain.flags.contains(VolumeFlags::SYSTEM_VOLUME));
    }
}
