//! Kernel image selection, the prelinked-cache gate and the hand-off
//!
//! Between a resolved boot volume and the jump into the kernel sit three
//! decisions: whether the prelinked kernel cache may be used at all,
//! whether the cache on disk is current against the kernel and its
//! extensions, and where the kernel file actually lives when a helper
//! partition shadows the system volume. The machine-facing half of the
//! hand-off (image decode, driver loading, the final jump) is behind
//! traits so the whole sequence runs hosted in tests.

use alloc::vec::Vec;
use arrayvec::ArrayString;
use core::fmt::Write as _;

use crate::config::{keys, BootConfig, BOOT_LINE_LEN};
use crate::context::BootContext;
use crate::error::{BootError, Result};
use crate::fs::{FileKind, FsReader};
use crate::utils::adler32::adler32;

/// Where the prelinked kernel cache lives when no config key moves it.
pub const DEFAULT_CACHE_PATH: &str =
    "/System/Library/Caches/com.apple.kernelcaches/kernelcache";

/// Directory whose mtime tracks extension installs and removals.
const EXTENSIONS_DIR: &str = "/System/Library/Extensions";

/// Helper-partition directories shadowing the kernel path, probed in
/// this order before the literal path is used.
const HELPER_KERNEL_PREFIXES: &[&str] =
    &["com.apple.boot.P/", "com.apple.boot.R/", "com.apple.boot.S/"];

/// The cache identity digest covers a fixed-size buffer with the
/// "rootDevice,kernelPath" pair written at this offset; the historical
/// builder reserved the leading region for a platform name.
const CACHE_IDENT_OFFSET: usize = 64;
const CACHE_IDENT_SIZE: usize = 64 + 256;

/// Which slice of a fat binary to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelArch {
    X86_64,
    I386,
}

/// A decoded kernel ready to receive control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedKernel {
    /// Physical entry point.
    pub entry: u32,
    /// Lowest physical address the image occupies.
    pub base: u32,
    pub size: usize,
}

/// Decodes a raw kernel file into loaded segments.
pub trait KernelDecoder {
    fn decode(&mut self, image: &[u8], arch: KernelArch) -> Result<LoadedKernel>;
}

/// Loads boot drivers from the root volume. Skipped when the kernel
/// came from the prelinked cache, which embeds them.
pub trait DriverLoader {
    fn load_drivers(&mut self, fs: &mut dyn FsReader, root: &str) -> Result;
}

/// The point of no return, split into steps the tests can observe.
pub trait HandoffHooks {
    /// Carve the kernel's footprint and the boot-args block out of the
    /// memory map before anything else can allocate over them.
    fn reserve_boot_args(&mut self, kernel: &LoadedKernel) -> Result;

    /// Hold until a key arrives; wired to the `Wait` config key.
    fn wait_for_keypress(&mut self);

    /// Pick the hand-off video mode; `text_mode` is set for verbose
    /// boots and when graphics is configured off.
    fn set_video_mode(&mut self, text_mode: bool);

    /// Seal the boot-args block with the final command line and memory map.
    fn finalize(&mut self, ctx: &BootContext) -> Result;

    /// Jump to the kernel entry point. Does not return on hardware; a
    /// return value exists only so hosted tests can observe the call.
    fn transfer(&mut self, entry: u32) -> Result;
}

/// A kernel file in memory, tagged with where it came from.
#[derive(Debug)]
pub struct KernelImage {
    pub data: Vec<u8>,
    pub path: ArrayString<BOOT_LINE_LEN>,
    pub from_cache: bool,
}

/// The cache file path for this boot: the `Kernel Cache` config value
/// verbatim, or the default path suffixed with the identity digest.
pub fn kernel_cache_path(config: &BootConfig, ctx: &BootContext) -> ArrayString<BOOT_LINE_LEN> {
    let mut path = ArrayString::new();
    if let Some(configured) = config.get(keys::KERNEL_CACHE) {
        if !configured.is_empty() {
            let take = configured.len().min(path.capacity());
            path.push_str(&configured[..take]);
            return path;
        }
    }
    path.push_str(DEFAULT_CACHE_PATH);
    let digest = cache_ident_digest(ctx.root_device.as_str(), ctx.boot_file.as_str());
    let _ = write!(path, ".{:08X}", digest);
    path
}

/// Adler-32 of the identity buffer, byte-swapped to the on-disk order
/// the cache builder used.
fn cache_ident_digest(root_device: &str, boot_file: &str) -> u32 {
    let mut buf = [0u8; CACHE_IDENT_SIZE];
    let mut pos = CACHE_IDENT_OFFSET;
    let ident = root_device
        .as_bytes()
        .iter()
        .chain(b",".iter())
        .chain(boot_file.as_bytes().iter());
    for &byte in ident {
        if pos == buf.len() {
            break;
        }
        buf[pos] = byte;
        pos += 1;
    }
    adler32(&buf).swap_bytes()
}

/// Policy half of the cache gate: the cache is off the table entirely
/// when booting safe, when a non-default kernel was chosen, when an
/// mkext cache is configured instead, or when the boot device cannot
/// hold one.
pub fn cache_allowed(ctx: &BootContext, cache_path: &str) -> bool {
    use crate::context::BootMode;
    use crate::disk::RAMDISK_DEV;

    !ctx.mode.contains(BootMode::SAFE)
        && !ctx.override_kernel
        && ctx.bios_dev < RAMDISK_DEV
        && ctx.mkext_name.is_empty()
        && !cache_path.is_empty()
}

/// Staleness half of the cache gate. The cache builder stamps the cache
/// one second past the newest of the kernel and the Extensions
/// directory, so currency is an exact match against that successor, not
/// a newer-than comparison.
pub fn cache_is_current(fs: &mut dyn FsReader, boot_file: &str, cache_path: &str) -> bool {
    let kernel = match fs.file_info(None, boot_file) {
        Ok(info) if info.kind == FileKind::Flat => info,
        _ => return false,
    };
    let cache = match fs.file_info(None, cache_path) {
        Ok(info) if info.kind == FileKind::Flat => info,
        _ => return false,
    };
    if cache.mtime < kernel.mtime {
        return false;
    }

    let mut newest = kernel.mtime;
    if let Ok(info) = fs.file_info(None, EXTENSIONS_DIR) {
        if info.kind == FileKind::Directory && info.mtime > newest {
            newest = info.mtime;
        }
    }
    cache.mtime == newest.wrapping_add(1)
}

/// Resolve the kernel path, preferring a helper-partition copy. Helper
/// directories are probed in priority order; the literal path is the
/// fallback whether or not it exists, so the load reports the right
/// name on failure.
pub fn locate_kernel(fs: &mut dyn FsReader, boot_file: &str) -> ArrayString<BOOT_LINE_LEN> {
    let mut spec: ArrayString<BOOT_LINE_LEN> = ArrayString::new();
    for prefix in HELPER_KERNEL_PREFIXES {
        if prefix.len() + boot_file.len() > spec.capacity() {
            continue;
        }
        spec.clear();
        spec.push_str(prefix);
        spec.push_str(boot_file);
        if let Ok(info) = fs.file_info(None, &spec) {
            if info.kind == FileKind::Flat {
                return spec;
            }
        }
    }
    spec.clear();
    let take = boot_file.len().min(spec.capacity());
    spec.push_str(&boot_file[..take]);
    spec
}

/// Load the kernel file for this boot: the prelinked cache when the
/// gate passes and the file reads, otherwise the kernel itself.
pub fn load_kernel(
    fs: &mut dyn FsReader,
    config: &BootConfig,
    ctx: &BootContext,
) -> Result<KernelImage> {
    let cache_path = kernel_cache_path(config, ctx);
    if cache_allowed(ctx, &cache_path) && cache_is_current(fs, &ctx.boot_file, &cache_path) {
        match fs.load_file(None, &cache_path) {
            Ok(data) => {
                log::info!("using kernel cache {}", cache_path.as_str());
                return Ok(KernelImage { data, path: cache_path, from_cache: true });
            }
            Err(err) => log::warn!("kernel cache unreadable: {}", err),
        }
    }

    let spec = locate_kernel(fs, &ctx.boot_file);
    log::info!("loading kernel {}", spec.as_str());
    let data = fs.load_file(None, &spec).map_err(|_| BootError::KernelNotFound)?;
    Ok(KernelImage { data, path: spec, from_cache: false })
}

/// Decode the image and hand control to the kernel. A failed 64-bit
/// decode is retried once as 32-bit before the error propagates.
///
/// On hardware the final transfer does not return; the `Ok` path exists
/// for hosted callers.
pub fn exec_kernel(
    image: &KernelImage,
    fs: &mut dyn FsReader,
    config: &BootConfig,
    ctx: &BootContext,
    decoder: &mut dyn KernelDecoder,
    drivers: &mut dyn DriverLoader,
    hooks: &mut dyn HandoffHooks,
) -> Result {
    let kernel = match decoder.decode(&image.data, KernelArch::X86_64) {
        Ok(kernel) => kernel,
        Err(_) => decoder.decode(&image.data, KernelArch::I386)?,
    };

    hooks.reserve_boot_args(&kernel)?;

    if !image.from_cache {
        drivers.load_drivers(fs, "/")?;
    }

    if config.get_bool(keys::WAIT) == Some(true) {
        hooks.wait_for_keypress();
    }

    // Text mode for verbose boots, or whenever graphics is configured off.
    let text_mode = ctx.verbose || config.get_bool(keys::BOOT_GRAPHICS) == Some(false);
    hooks.set_video_mode(text_mode);
    hooks.finalize(ctx)?;

    log::info!("starting kernel at {:#x}", kernel.entry);
    hooks.transfer(kernel.entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FileInfo;
    use crate::volume::VolumeId;
    use alloc::collections::BTreeMap;
    use alloc::string::String;
    use alloc::vec;

    struct FakeFs {
        files: BTreeMap<String, (FileInfo, Vec<u8>)>,
    }

    impl FakeFs {
        fn new() -> Self {
            FakeFs { files: BTreeMap::new() }
        }

        fn add(&mut self, path: &str, kind: FileKind, mtime: u32, data: &[u8]) {
            let info = FileInfo { kind, mtime, size: data.len() as u64 };
            self.files.insert(String::from(path), (info, data.to_vec()));
        }
    }

    impl FsReader for FakeFs {
        fn set_root(&mut self, _volume: VolumeId) {}

        fn file_info(&mut self, _volume: Option<VolumeId>, path: &str) -> Result<FileInfo> {
            self.files.get(path).map(|(info, _)| *info).ok_or(BootError::KernelNotFound)
        }

        fn read_file(
            &mut self,
            _volume: Option<VolumeId>,
            path: &str,
            buf: &mut [u8],
        ) -> Result<usize> {
            let (_, data) = self.files.get(path).ok_or(BootError::KernelNotFound)?;
            let take = data.len().min(buf.len());
            buf[..take].copy_from_slice(&data[..take]);
            Ok(take)
        }

        fn load_file(&mut self, _volume: Option<VolumeId>, path: &str) -> Result<Vec<u8>> {
            self.files.get(path).map(|(_, data)| data.clone()).ok_or(BootError::KernelNotFound)
        }

        fn volume_label(&mut self, _volume: VolumeId) -> Option<ArrayString<32>> {
            None
        }
    }

    fn context_for(root: &str, kernel: &str) -> BootContext {
        let mut ctx = BootContext::new(0x80);
        ctx.root_device.push_str(root);
        ctx.boot_file.push_str(kernel);
        ctx
    }

    #[test]
    fn test_cache_path_carries_identity_digest() {
        let config = BootConfig::new();
        let ctx = context_for("hd(0,2)", "mach_kernel");
        let path = kernel_cache_path(&config, &ctx);

        let mut buf = [0u8; CACHE_IDENT_SIZE];
        buf[CACHE_IDENT_OFFSET..CACHE_IDENT_OFFSET + 19]
            .copy_from_slice(b"hd(0,2),mach_kernel");
        let digest = adler32(&buf).swap_bytes();

        let mut expected: ArrayString<BOOT_LINE_LEN> = ArrayString::new();
        expected.push_str(DEFAULT_CACHE_PATH);
        write!(expected, ".{:08X}", digest).unwrap();
        assert_eq!(path.as_str(), expected.as_str());
    }

    #[test]
    fn test_cache_path_config_key_wins() {
        let mut config = BootConfig::new();
        config.primary.insert(keys::KERNEL_CACHE, "/Extra/kernelcache");
        let ctx = context_for("hd(0,2)", "mach_kernel");
        assert_eq!(kernel_cache_path(&config, &ctx).as_str(), "/Extra/kernelcache");
    }

    #[test]
    fn test_cache_gate_policy_terms() {
        use crate::context::BootMode;

        let ctx = context_for("hd(0,2)", "mach_kernel");
        assert!(cache_allowed(&ctx, "/cache"));
        assert!(!cache_allowed(&ctx, ""));

        let mut safe = context_for("hd(0,2)", "mach_kernel");
        safe.mode |= BootMode::SAFE;
        assert!(!cache_allowed(&safe, "/cache"));

        let mut chosen = context_for("hd(0,2)", "mach_kernel");
        chosen.override_kernel = true;
        assert!(!cache_allowed(&chosen, "/cache"));

        let mut mkext = context_for("hd(0,2)", "mach_kernel");
        mkext.mkext_name.push_str("Extensions.mkext");
        assert!(!cache_allowed(&mkext, "/cache"));

        let mut ramdisk = context_for("hd(0,2)", "mach_kernel");
        ramdisk.bios_dev = crate::disk::RAMDISK_DEV;
        assert!(!cache_allowed(&ramdisk, "/cache"));
    }

    #[test]
    fn test_cache_currency_is_exact_successor() {
        let mut fs = FakeFs::new();
        fs.add("mach_kernel", FileKind::Flat, 100, b"k");
        fs.add(EXTENSIONS_DIR, FileKind::Directory, 150, b"");

        for (cachetime, current) in [(149u32, false), (150, false), (151, true), (152, false)] {
            fs.add("/cache", FileKind::Flat, cachetime, b"c");
            assert_eq!(
                cache_is_current(&mut fs, "mach_kernel", "/cache"),
                current,
                "cachetime {}",
                cachetime
            );
        }
    }

    #[test]
    fn test_cache_currency_without_extensions_dir() {
        let mut fs = FakeFs::new();
        fs.add("mach_kernel", FileKind::Flat, 100, b"k");
        fs.add("/cache", FileKind::Flat, 101, b"c");
        assert!(cache_is_current(&mut fs, "mach_kernel", "/cache"));

        // A stale Extensions directory older than the kernel changes nothing.
        fs.add(EXTENSIONS_DIR, FileKind::Directory, 90, b"");
        assert!(cache_is_current(&mut fs, "mach_kernel", "/cache"));
    }

    #[test]
    fn test_cache_must_be_flat_file() {
        let mut fs = FakeFs::new();
        fs.add("mach_kernel", FileKind::Flat, 100, b"k");
        fs.add("/cache", FileKind::Directory, 101, b"");
        assert!(!cache_is_current(&mut fs, "mach_kernel", "/cache"));
    }

    #[test]
    fn test_helper_prefixes_probed_in_order() {
        let mut fs = FakeFs::new();
        fs.add("com.apple.boot.R/mach_kernel", FileKind::Flat, 1, b"r");
        fs.add("com.apple.boot.S/mach_kernel", FileKind::Flat, 1, b"s");
        assert_eq!(
            locate_kernel(&mut fs, "mach_kernel").as_str(),
            "com.apple.boot.R/mach_kernel"
        );

        fs.add("com.apple.boot.P/mach_kernel", FileKind::Flat, 1, b"p");
        assert_eq!(
            locate_kernel(&mut fs, "mach_kernel").as_str(),
            "com.apple.boot.P/mach_kernel"
        );
    }

    #[test]
    fn test_locate_falls_back_to_literal_path() {
        let mut fs = FakeFs::new();
        assert_eq!(locate_kernel(&mut fs, "mach_kernel").as_str(), "mach_kernel");
    }

    #[test]
    fn test_load_prefers_current_cache() {
        let mut fs = FakeFs::new();
        fs.add("mach_kernel", FileKind::Flat, 100, b"kernel");
        let config = BootConfig::new();
        let ctx = context_for("hd(0,2)", "mach_kernel");

        let cache_path = kernel_cache_path(&config, &ctx);
        fs.add(&cache_path, FileKind::Flat, 101, b"cached");

        let image = load_kernel(&mut fs, &config, &ctx).unwrap();
        assert!(image.from_cache);
        assert_eq!(image.data, b"cached");
    }

    #[test]
    fn test_load_falls_back_when_cache_stale() {
        let mut fs = FakeFs::new();
        fs.add("mach_kernel", FileKind::Flat, 100, b"kernel");
        let config = BootConfig::new();
        let ctx = context_for("hd(0,2)", "mach_kernel");

        let cache_path = kernel_cache_path(&config, &ctx);
        fs.add(&cache_path, FileKind::Flat, 500, b"cached");

        let image = load_kernel(&mut fs, &config, &ctx).unwrap();
        assert!(!image.from_cache);
        assert_eq!(image.data, b"kernel");
        assert_eq!(image.path.as_str(), "mach_kernel");
    }

    #[derive(Default)]
    struct ScriptedDecoder {
        attempts: Vec<KernelArch>,
        fail_64: bool,
    }

    impl KernelDecoder for ScriptedDecoder {
        fn decode(&mut self, _image: &[u8], arch: KernelArch) -> Result<LoadedKernel> {
            self.attempts.push(arch);
            if arch == KernelArch::X86_64 && self.fail_64 {
                return Err(BootError::DecodeFailed("no 64-bit slice"));
            }
            Ok(LoadedKernel { entry: 0x20_0000, base: 0x10_0000, size: 0x1000 })
        }
    }

    #[derive(Default)]
    struct RecordingHandoff {
        steps: Vec<&'static str>,
        entry: u32,
        text_mode: bool,
    }

    impl HandoffHooks for RecordingHandoff {
        fn reserve_boot_args(&mut self, _kernel: &LoadedKernel) -> Result {
            self.steps.push("reserve");
            Ok(())
        }

        fn wait_for_keypress(&mut self) {
            self.steps.push("wait");
        }

        fn set_video_mode(&mut self, text_mode: bool) {
            self.steps.push("video");
            self.text_mode = text_mode;
        }

        fn finalize(&mut self, _ctx: &BootContext) -> Result {
            self.steps.push("finalize");
            Ok(())
        }

        fn transfer(&mut self, entry: u32) -> Result {
            self.steps.push("transfer");
            self.entry = entry;
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingDrivers {
        loads: usize,
    }

    impl DriverLoader for CountingDrivers {
        fn load_drivers(&mut self, _fs: &mut dyn FsReader, _root: &str) -> Result {
            self.loads += 1;
            Ok(())
        }
    }

    fn image(from_cache: bool) -> KernelImage {
        KernelImage { data: vec![0u8; 16], path: ArrayString::new(), from_cache }
    }

    #[test]
    fn test_exec_retries_decode_as_32bit() {
        let mut fs = FakeFs::new();
        let config = BootConfig::new();
        let ctx = context_for("hd(0,2)", "mach_kernel");
        let mut decoder = ScriptedDecoder { fail_64: true, ..Default::default() };
        let mut drivers = CountingDrivers::default();
        let mut hooks = RecordingHandoff::default();

        exec_kernel(&image(false), &mut fs, &config, &ctx, &mut decoder, &mut drivers, &mut hooks)
            .unwrap();
        assert_eq!(decoder.attempts, vec![KernelArch::X86_64, KernelArch::I386]);
        assert_eq!(hooks.entry, 0x20_0000);
    }

    #[test]
    fn test_exec_skips_drivers_for_cached_image() {
        let mut fs = FakeFs::new();
        let config = BootConfig::new();
        let ctx = context_for("hd(0,2)", "mach_kernel");
        let mut decoder = ScriptedDecoder::default();
        let mut drivers = CountingDrivers::default();
        let mut hooks = RecordingHandoff::default();

        exec_kernel(&image(true), &mut fs, &config, &ctx, &mut decoder, &mut drivers, &mut hooks)
            .unwrap();
        assert_eq!(drivers.loads, 0);

        exec_kernel(&image(false), &mut fs, &config, &ctx, &mut decoder, &mut drivers, &mut hooks)
            .unwrap();
        assert_eq!(drivers.loads, 1);
    }

    #[test]
    fn test_exec_step_order_and_wait_key() {
        let mut fs = FakeFs::new();
        let mut config = BootConfig::new();
        config.primary.insert(keys::WAIT, "Yes");
        let ctx = context_for("hd(0,2)", "mach_kernel");
        let mut decoder = ScriptedDecoder::default();
        let mut drivers = CountingDrivers::default();
        let mut hooks = RecordingHandoff::default();

        exec_kernel(&image(false), &mut fs, &config, &ctx, &mut decoder, &mut drivers, &mut hooks)
            .unwrap();
        assert_eq!(hooks.steps, vec!["reserve", "wait", "video", "finalize", "transfer"]);
    }

    #[test]
    fn test_exec_video_mode_follows_verbose_and_graphics_keys() {
        let mut fs = FakeFs::new();
        let mut config = BootConfig::new();
        let ctx = context_for("hd(0,2)", "mach_kernel");
        let mut decoder = ScriptedDecoder::default();
        let mut drivers = CountingDrivers::default();

        let mut hooks = RecordingHandoff::default();
        exec_kernel(&image(false), &mut fs, &config, &ctx, &mut decoder, &mut drivers, &mut hooks)
            .unwrap();
        assert!(!hooks.text_mode, "quiet graphical boot by default");

        config.primary.insert(keys::BOOT_GRAPHICS, "No");
        let mut hooks = RecordingHandoff::default();
        exec_kernel(&image(false), &mut fs, &config, &ctx, &mut decoder, &mut drivers, &mut hooks)
            .unwrap();
        assert!(hooks.text_mode);

        let config = BootConfig::new();
        let mut ctx = context_for("hd(0,2)", "mach_kernel");
        ctx.verbose = true;
        let mut hooks = RecordingHandoff::default();
        exec_kernel(&image(false), &mut fs, &config, &ctx, &mut decoder, &mut drivers, &mut hooks)
            .unwrap();
        assert!(hooks.text_mode);
    }
}
