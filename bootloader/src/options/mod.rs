//! Boot Argument Resolution
//!
//! Turns the selected volume plus the typed argument line into the kernel
//! path and command line handed to the loader. Precedence is fixed: the
//! typed line wins over the override config, which wins over the primary
//! config. Foreign volumes short-circuit to a chain-load decision before
//! any argument work happens.

use arrayvec::ArrayString;

use crate::bios::{DiskServices, SECTOR_SIZE};
use crate::config::{
    keys as cfg, load_helper_config, load_override_config, value_for_boot_key, BootConfig,
    BOOT_LINE_LEN, DEFAULT_KERNEL,
};
use crate::context::{BootContext, BootMode, BootStatus};
use crate::disk::{read_boot_sector, DiskSubsystem};
use crate::error::{BootError, Result};
use crate::fs::FsReader;
use crate::utils::uuid::{format_uuid, uuid_from_volume_id};
use crate::volume::VolumeFlags;

/// Kernel flag appended when a modifier key requested safe mode.
pub const SAFE_MODE_FLAG: &str = "-x";

/// Legacy spelling of the safe-mode flag, still honored in configs.
pub const OLD_SAFE_MODE_FLAG: &str = "-f";

/// Typed flag that discards the config's `Kernel Flags`.
pub const IGNORE_CONFIG_FLAGS: &str = "-F";

/// Where one resolution attempt leads.
#[derive(Debug)]
pub struct BootDecision {
    pub status: BootStatus,
    /// Merged kernel command line; empty for a chain-load.
    pub command_line: ArrayString<BOOT_LINE_LEN>,
    /// Foreign boot sector staged for the chain-load vector.
    pub chain_sector: Option<[u8; SECTOR_SIZE]>,
}

/// Pull a kernel path off the front of the typed line.
///
/// The name must start with a letter or `/`; a `=` before the separator
/// means the token was an `option=value` pair, not a kernel name. Returns
/// the name and the remaining text.
pub fn extract_kernel_name(line: &str) -> (Option<&str>, &str) {
    let bytes = line.as_bytes();
    let first = match bytes.first() {
        Some(&b) => b,
        None => return (None, line),
    };
    if !(first | 0x20).is_ascii_lowercase() && first != b'/' {
        return (None, line);
    }
    let end = bytes
        .iter()
        .position(|&b| b == b'=' || b == b' ' || b == b'\t')
        .unwrap_or(bytes.len());
    if bytes.get(end) == Some(&b'=') {
        return (None, line);
    }
    (Some(&line[..end]), &line[end..])
}

/// Bounded argument accumulator. Overflow warns and drops the argument,
/// never fails the resolution.
struct ArgBuilder {
    line: ArrayString<BOOT_LINE_LEN>,
}

impl ArgBuilder {
    fn new() -> Self {
        ArgBuilder { line: ArrayString::new() }
    }

    /// Append `name=value ` (or just `value ` without a name).
    fn copy_argument(&mut self, name: Option<&str>, value: &str) {
        let needed = name.map_or(0, |n| n.len() + 1) + value.len() + 1;
        if self.line.remaining_capacity() < needed {
            log::warn!("boot arguments too long, truncating");
            return;
        }
        if let Some(name) = name {
            self.line.push_str(name);
            self.line.push('=');
        }
        self.line.push_str(value);
        self.line.push(' ');
    }

    /// Append raw text, truncating at capacity with a warning.
    fn append_text(&mut self, text: &str) {
        if self.line.try_push_str(text).is_err() {
            log::warn!("boot arguments too long, truncating");
            let take = self.line.remaining_capacity();
            let mut end = take;
            while end > 0 && !text.is_char_boundary(end) {
                end -= 1;
            }
            let _ = self.line.try_push_str(&text[..end]);
        }
    }
}

/// Three-source lookup for one argument key.
///
/// A hit in the typed line or the config kernel flags is merely noted;
/// those texts reach the command line verbatim later. A hit in the config
/// alone is copied into the accumulator now. Returns the value found.
fn process_boot_argument<'a>(
    name: &str,
    user: &'a str,
    config_flags: &'a str,
    config: &'a BootConfig,
    out: &mut ArgBuilder,
) -> Option<&'a str> {
    if let Some(val) = value_for_boot_key(user, name) {
        return Some(val);
    }
    if let Some(val) = value_for_boot_key(config_flags, name) {
        return Some(val);
    }
    if let Some(val) = config.get(name) {
        out.copy_argument(Some(name), val);
        return Some(val);
    }
    None
}

/// Resolve one boot attempt.
///
/// `raw_args` is the text the user typed at the prompt, kernel name
/// included. On success the kernel path sits in `ctx.boot_file` and the
/// returned decision carries the merged command line.
pub fn process_boot_options(
    ctx: &mut BootContext,
    config: &mut BootConfig,
    disks: &mut DiskSubsystem,
    svc: &mut dyn DiskServices,
    fs: &mut dyn FsReader,
    raw_args: &str,
) -> Result<BootDecision> {
    let vol_id = ctx.boot_volume.ok_or(BootError::NoBootVolume)?;
    let vol = disks.volume(vol_id).clone();

    if !vol.flags.contains(VolumeFlags::NATIVE_BOOT) {
        // Foreign OS: stage its boot sector and chain to it.
        let mut reader = disks.reader(svc);
        let sector = read_boot_sector(&mut reader, vol.device, vol.part_offset)?;
        ctx.chain_boot_dev = vol.device;
        log::info!("chain-loading {}", vol.device_string());
        return Ok(BootDecision {
            status: BootStatus::ChainLoad,
            command_line: ArrayString::new(),
            chain_sector: Some(sector),
        });
    }

    fs.set_root(vol_id);

    // Best-effort; a volume without its own config keeps the primary one.
    if load_override_config(fs, config).is_err() {
        log::debug!("no override config on {}", vol.device_string());
    }

    let cp = raw_args.trim_start_matches([' ', '\t']);

    // Kernel path: typed name, then configured name, then the default.
    // Anything but the default disables kernel-cache use later.
    ctx.override_kernel = false;
    ctx.boot_file.clear();
    let (typed_kernel, cp) = extract_kernel_name(cp);
    if let Some(kernel) = typed_kernel {
        let _ = ctx.boot_file.try_push_str(kernel);
        ctx.override_kernel = true;
    } else if let Some(kernel) = config.get(cfg::KERNEL) {
        let _ = ctx.boot_file.try_push_str(kernel);
        if kernel != DEFAULT_KERNEL {
            ctx.override_kernel = true;
        }
    } else {
        let _ = ctx.boot_file.try_push_str(DEFAULT_KERNEL);
    }
    let cp = cp.trim_start_matches([' ', '\t']);

    let config_flags: ArrayString<BOOT_LINE_LEN> =
        if value_for_boot_key(cp, IGNORE_CONFIG_FLAGS).is_some() {
            ArrayString::new()
        } else {
            config
                .get(cfg::KERNEL_FLAGS)
                .and_then(|v| ArrayString::from(v).ok())
                .unwrap_or_default()
        };

    let mut out = ArgBuilder::new();

    let mut uuid_set =
        process_boot_argument(cfg::BOOT_UUID, cp, &config_flags, config, &mut out).is_some();
    if !uuid_set {
        if vol.flags.contains(VolumeFlags::BOOTER) {
            if let Ok(helper) = load_helper_config(fs, vol_id) {
                if let Some(uuid) = helper.get(cfg::ROOT_UUID) {
                    out.copy_argument(Some(cfg::BOOT_UUID), uuid);
                    uuid_set = true;
                }
            }
        }
        if !uuid_set {
            if let Some(fs_id) = vol.fs_id {
                let uuid = format_uuid(&uuid_from_volume_id(fs_id));
                log::info!("setting boot-uuid to {}", uuid.as_str());
                out.copy_argument(Some(cfg::BOOT_UUID), &uuid);
                uuid_set = true;
            }
        }
    }

    ctx.root_device.clear();
    match process_boot_argument(cfg::ROOT_DEVICE, cp, &config_flags, config, &mut out) {
        Some(rd) => {
            let _ = ctx.root_device.try_push_str(rd);
        }
        None => {
            if let Some(dev) = config.get(cfg::BOOT_DEVICE) {
                let mut starred = ArrayString::<BOOT_LINE_LEN>::new();
                let _ = starred.try_push('*');
                let _ = starred.try_push_str(dev);
                out.copy_argument(Some(cfg::ROOT_DEVICE), &starred);
                let _ = ctx.root_device.try_push_str(&starred);
            } else if uuid_set {
                out.copy_argument(Some(cfg::ROOT_DEVICE), "*uuid");
                let _ = ctx.root_device.try_push_str("*uuid");
            }
        }
    }

    if value_for_boot_key(cp, SAFE_MODE_FLAG).is_none()
        && value_for_boot_key(&config_flags, SAFE_MODE_FLAG).is_none()
        && ctx.mode.contains(BootMode::SAFE)
    {
        out.copy_argument(None, SAFE_MODE_FLAG);
    }

    // Merged line: copied arguments, config kernel flags, typed text.
    if !config_flags.is_empty() {
        out.append_text(&config_flags);
        out.append_text(" ");
    }
    out.append_text(cp);

    if !ctx.should_boot {
        ctx.verbose = config
            .primary
            .get(cfg::KERNEL_FLAGS)
            .map(|flags| {
                value_for_boot_key(flags, "-v").is_some()
                    || value_for_boot_key(flags, "-s").is_some()
            })
            .unwrap_or(false);
        let safe = config.primary.get(cfg::KERNEL_FLAGS).is_some_and(|flags| {
            value_for_boot_key(flags, SAFE_MODE_FLAG).is_some()
                || value_for_boot_key(flags, OLD_SAFE_MODE_FLAG).is_some()
        });
        ctx.mode.set(BootMode::SAFE, safe);
        ctx.mkext_name.clear();
        if let Some(mkext) = config.get(cfg::MKEXT_CACHE) {
            let _ = ctx.mkext_name.try_push_str(mkext);
        }
    }

    Ok(BootDecision {
        status: BootStatus::Proceed,
        command_line: out.line,
        chain_sector: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HELPER_CONFIG_PATHS;
    use crate::disk::tests::MemDisk;
    use crate::error::Result as BootResult;
    use crate::fs::{FileInfo, FsReader};
    use crate::volume::{PartScheme, Volume, VolumeId};
    use alloc::string::String;
    use alloc::vec;
    use alloc::vec::Vec;

    #[derive(Default)]
    struct FakeFs {
        root: Option<VolumeId>,
        files: Vec<(Option<VolumeId>, String, Vec<u8>)>,
    }

    impl FakeFs {
        fn with_file(volume: Option<VolumeId>, path: &str, data: &[u8]) -> Self {
            FakeFs {
                root: None,
                files: vec![(volume, String::from(path), data.to_vec())],
            }
        }

        fn lookup(&self, volume: Option<VolumeId>, path: &str) -> Option<&[u8]> {
            self.files
                .iter()
                .find(|(vol, p, _)| *vol == volume && p == path)
                .map(|(_, _, d)| d.as_slice())
        }
    }

    impl FsReader for FakeFs {
        fn set_root(&mut self, volume: VolumeId) {
            self.root = Some(volume);
        }

        fn file_info(&mut self, volume: Option<VolumeId>, path: &str) -> BootResult<FileInfo> {
            let data = self.lookup(volume, path).ok_or(BootError::KernelNotFound)?;
            Ok(FileInfo {
                kind: crate::fs::FileKind::Flat,
                mtime: 0,
                size: data.len() as u64,
            })
        }

        fn read_file(
            &mut self,
            volume: Option<VolumeId>,
            path: &str,
            buf: &mut [u8],
        ) -> BootResult<usize> {
            let data = self.lookup(volume, path).ok_or(BootError::KernelNotFound)?;
            let len = data.len().min(buf.len());
            buf[..len].copy_from_slice(&data[..len]);
            Ok(len)
        }

        fn load_file(&mut self, volume: Option<VolumeId>, path: &str) -> BootResult<Vec<u8>> {
            self.lookup(volume, path)
                .map(<[u8]>::to_vec)
                .ok_or(BootError::KernelNotFound)
        }

        fn volume_label(&mut self, _volume: VolumeId) -> Option<ArrayString<32>> {
            None
        }
    }

    fn native_volume() -> Volume {
        let mut vol = Volume::new(0x80, 2, 64, PartScheme::Gpt);
        vol.flags = VolumeFlags::NATIVE_BOOT | VolumeFlags::SYSTEM_VOLUME;
        vol
    }

    fn setup(vol: Volume) -> (BootContext, BootConfig, DiskSubsystem, MemDisk, VolumeId) {
        let mut disks = DiskSubsystem::new();
        let ids = disks.install_map(0x80, vec![vol]);
        let mut ctx = BootContext::new(0x80);
        ctx.boot_volume = Some(ids[0]);
        let mut config = BootConfig::new();
        config.can_override = true;
        (ctx, config, disks, MemDisk::hd(0x80, 256), ids[0])
    }

    #[test]
    fn test_extract_kernel_name() {
        assert_eq!(extract_kernel_name("mach_kernel -v"), (Some("mach_kernel"), " -v"));
        assert_eq!(extract_kernel_name("/kernels/devkernel"), (Some("/kernels/devkernel"), ""));
        assert_eq!(extract_kernel_name("rd=disk0s2 -v"), (None, "rd=disk0s2 -v"));
        assert_eq!(extract_kernel_name("-v"), (None, "-v"));
        assert_eq!(extract_kernel_name(""), (None, ""));
    }

    #[test]
    fn test_null_volume_fails_immediately() {
        let (mut ctx, mut config, mut disks, mut disk, _id) = setup(native_volume());
        ctx.boot_volume = None;
        let mut fs = FakeFs::default();
        let err = process_boot_options(&mut ctx, &mut config, &mut disks, &mut disk, &mut fs, "")
            .unwrap_err();
        assert_eq!(err, BootError::NoBootVolume);
    }

    #[test]
    fn test_foreign_volume_chain_loads() {
        let mut vol = Volume::new(0x80, 1, 8, PartScheme::Fdisk);
        vol.flags = VolumeFlags::FOREIGN_BOOT;
        vol.part_type = 0x07;
        let (mut ctx, mut config, mut disks, mut disk, _id) = setup(vol);
        // Valid boot sector at the partition start.
        disk.data[8 * SECTOR_SIZE + 510] = 0x55;
        disk.data[8 * SECTOR_SIZE + 511] = 0xAA;
        disk.data[8 * SECTOR_SIZE] = 0xEB;

        let mut fs = FakeFs::default();
        let decision =
            process_boot_options(&mut ctx, &mut config, &mut disks, &mut disk, &mut fs, "-v")
                .unwrap();
        assert_eq!(decision.status, BootStatus::ChainLoad);
        let sector = decision.chain_sector.unwrap();
        assert_eq!(sector[0], 0xEB);
        assert_eq!(ctx.chain_boot_dev, 0x80);
        assert!(decision.command_line.is_empty());
    }

    #[test]
    fn test_kernel_precedence_and_override_flag() {
        let (mut ctx, mut config, mut disks, mut disk, _id) = setup(native_volume());
        config.primary.insert(cfg::KERNEL, "kernel.alt");
        let mut fs = FakeFs::default();

        process_boot_options(
            &mut ctx,
            &mut config,
            &mut disks,
            &mut disk,
            &mut fs,
            "/custom_kernel -v",
        )
        .unwrap();
        assert_eq!(ctx.boot_file.as_str(), "/custom_kernel");
        assert!(ctx.override_kernel, "typed name overrides");

        process_boot_options(&mut ctx, &mut config, &mut disks, &mut disk, &mut fs, "-v")
            .unwrap();
        assert_eq!(ctx.boot_file.as_str(), "kernel.alt");
        assert!(ctx.override_kernel, "non-default configured name overrides");

        config.primary.insert(cfg::KERNEL, DEFAULT_KERNEL);
        process_boot_options(&mut ctx, &mut config, &mut disks, &mut disk, &mut fs, "")
            .unwrap();
        assert_eq!(ctx.boot_file.as_str(), DEFAULT_KERNEL);
        assert!(!ctx.override_kernel);
    }

    #[test]
    fn test_user_args_beat_override_config() {
        let (mut ctx, mut config, mut disks, mut disk, _id) = setup(native_volume());
        config.overrides.insert(cfg::ROOT_DEVICE, "disk1s1");
        let mut fs = FakeFs::default();

        let decision = process_boot_options(
            &mut ctx,
            &mut config,
            &mut disks,
            &mut disk,
            &mut fs,
            "rd=disk0s2",
        )
        .unwrap();
        assert_eq!(ctx.root_device.as_str(), "disk0s2");
        assert!(decision.command_line.as_str().contains("rd=disk0s2"));
        assert!(!decision.command_line.as_str().contains("disk1s1"));
    }

    #[test]
    fn test_uuid_from_filesystem_when_unconfigured() {
        let mut vol = native_volume();
        vol.fs_id = Some([1, 2, 3, 4, 5, 6, 7, 8]);
        let (mut ctx, mut config, mut disks, mut disk, _id) = setup(vol);
        let mut fs = FakeFs::default();

        let decision =
            process_boot_options(&mut ctx, &mut config, &mut disks, &mut disk, &mut fs, "")
                .unwrap();
        let expect = format_uuid(&uuid_from_volume_id([1, 2, 3, 4, 5, 6, 7, 8]));
        let line = decision.command_line;
        assert!(line.as_str().contains(expect.as_str()));
        assert!(line.as_str().contains("rd=*uuid"), "uuid implies rd=*uuid");
    }

    #[test]
    fn test_booter_volume_uuid_from_helper_config() {
        let mut vol = native_volume();
        vol.flags |= VolumeFlags::BOOTER;
        let (mut ctx, mut config, mut disks, mut disk, id) = setup(vol);
        let mut fs = FakeFs::with_file(
            Some(id),
            HELPER_CONFIG_PATHS[0],
            b"Root UUID = 12345678-1234-1234-1234-1234567890AB\n",
        );

        let decision =
            process_boot_options(&mut ctx, &mut config, &mut disks, &mut disk, &mut fs, "")
                .unwrap();
        assert!(decision
            .command_line
            .as_str()
            .contains("boot-uuid=12345678-1234-1234-1234-1234567890AB"));
    }

    #[test]
    fn test_safe_mode_appended_once() {
        let (mut ctx, mut config, mut disks, mut disk, _id) = setup(native_volume());
        ctx.mode |= BootMode::SAFE;
        ctx.should_boot = true;
        let mut fs = FakeFs::default();

        let decision =
            process_boot_options(&mut ctx, &mut config, &mut disks, &mut disk, &mut fs, "")
                .unwrap();
        assert_eq!(decision.command_line.as_str().matches("-x").count(), 1);

        // Already present in the typed line: not duplicated.
        let decision =
            process_boot_options(&mut ctx, &mut config, &mut disks, &mut disk, &mut fs, "-x -v")
                .unwrap();
        assert_eq!(decision.command_line.as_str().matches("-x").count(), 1);
    }

    #[test]
    fn test_config_flags_merged_before_user_text() {
        let (mut ctx, mut config, mut disks, mut disk, _id) = setup(native_volume());
        config.primary.insert(cfg::KERNEL_FLAGS, "debug=0x144");
        let mut fs = FakeFs::default();

        let decision =
            process_boot_options(&mut ctx, &mut config, &mut disks, &mut disk, &mut fs, "-v")
                .unwrap();
        let line = decision.command_line;
        let flags_at = line.as_str().find("debug=0x144").unwrap();
        let user_at = line.as_str().find("-v").unwrap();
        assert!(flags_at < user_at);
    }

    #[test]
    fn test_ignore_flag_discards_config_flags() {
        let (mut ctx, mut config, mut disks, mut disk, _id) = setup(native_volume());
        config.primary.insert(cfg::KERNEL_FLAGS, "debug=0x144");
        let mut fs = FakeFs::default();

        let decision =
            process_boot_options(&mut ctx, &mut config, &mut disks, &mut disk, &mut fs, "-F -v")
                .unwrap();
        assert!(!decision.command_line.as_str().contains("debug=0x144"));
    }

    #[test]
    fn test_verbose_recomputed_from_config_unless_forced() {
        let (mut ctx, mut config, mut disks, mut disk, _id) = setup(native_volume());
        config.primary.insert(cfg::KERNEL_FLAGS, "-v");
        let mut fs = FakeFs::default();

        process_boot_options(&mut ctx, &mut config, &mut disks, &mut disk, &mut fs, "")
            .unwrap();
        assert!(ctx.verbose);

        ctx.verbose = false;
        ctx.should_boot = true;
        process_boot_options(&mut ctx, &mut config, &mut disks, &mut disk, &mut fs, "")
            .unwrap();
        assert!(!ctx.verbose, "menu-forced boot keeps its own flags");
    }
}
