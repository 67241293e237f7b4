//! BIOS entry point and the outer boot loop
//!
//! The stage-one glue jumps here with the boot device number and the
//! real-mode dispatch thunk. Everything machine-facing that the library
//! leaves behind traits is bound in this binary: the text menu
//! renderer, the BIOS diagnostics commands, and the bridge to the
//! filesystem/kernel driver package linked alongside the loader.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
extern crate alloc;

#[cfg(target_os = "none")]
mod bare {
    use alloc::string::String;
    use alloc::vec;
    use core::fmt::Write as _;

    use arrayvec::ArrayString;
    use hashbrown::HashMap;
    use spin::Once;

    use moray_bootloader::bios::console::ConsoleWriter;
    use moray_bootloader::bios::keyboard::keys;
    use moray_bootloader::bios::realmode::{IntDispatch, TRANSFER_BUF_ADDR};
    use moray_bootloader::bios::{
        BiosConsole, BiosDiskServices, BiosKeyboard, BiosTicks, ConsoleOut, KeyboardServices,
        RealModeContext, RealModeExecutor, BIOS_DEV_HD,
    };
    use moray_bootloader::boot_menu::{
        get_boot_options, DiagnosticsSource, MenuAction, MenuDeps, MenuItem, MenuRenderer,
        MenuWindow, MENU_TOP_ROW,
    };
    use moray_bootloader::config::{
        keys as cfg, load_system_config, value_for_boot_key, BootConfig, BOOT_LINE_LEN,
    };
    use moray_bootloader::disk::DiskSubsystem;
    use moray_bootloader::fs::{FileInfo, FileKind, FsReader};
    use moray_bootloader::kernel_if::{
        exec_kernel, load_kernel, DriverLoader, HandoffHooks, KernelArch, KernelDecoder,
        LoadedKernel,
    };
    use moray_bootloader::logging;
    use moray_bootloader::options::process_boot_options;
    use moray_bootloader::volume::enrich::enrich_volume;
    use moray_bootloader::volume::{ChainFilter, VolumeFlags, VolumeId};
    use moray_bootloader::{BootContext, BootError, BootMode, BootStatus, Result};

    static EXECUTOR: Once<RealModeExecutor> = Once::new();

    // Companion driver package, linked beside the loader the same way
    // the dispatch thunk is. Volumes are addressed by firmware device
    // and partition number.
    unsafe extern "C" {
        fn fsdrv_mount(device: u32, partition: u32) -> i32;
        fn fsdrv_file_info(
            device: u32,
            partition: u32,
            path: *const u8,
            path_len: u32,
            kind: *mut u32,
            mtime: *mut u32,
            size: *mut u64,
        ) -> i32;
        fn fsdrv_read_file(
            device: u32,
            partition: u32,
            path: *const u8,
            path_len: u32,
            buf: *mut u8,
            buf_len: u32,
        ) -> i64;
        fn fsdrv_volume_label(device: u32, partition: u32, buf: *mut u8, cap: u32) -> i32;

        fn kerndrv_decode(
            image: *const u8,
            len: u32,
            arch: u32,
            entry: *mut u32,
            base: *mut u32,
            size: *mut u32,
        ) -> i32;
        fn kerndrv_load_drivers(root: *const u8, len: u32) -> i32;

        fn handoff_reserve(base: u32, size: u32) -> i32;
        fn handoff_set_video(verbose: u32);
        fn handoff_finalize(cmdline: *const u8, len: u32) -> i32;
        fn handoff_jump(entry: u32) -> !;
        fn handoff_chain(sector: *const u8, device: u32) -> !;
    }

    fn console_sink(args: core::fmt::Arguments<'_>) {
        if let Some(exec) = EXECUTOR.get() {
            let console = BiosConsole::new(exec);
            let _ = ConsoleWriter(&console).write_fmt(args);
        }
    }

    #[allow(improper_ctypes_definitions)]
    #[unsafe(no_mangle)]
    pub extern "C" fn boot2_main(boot_device: u32, dispatch: IntDispatch) -> ! {
        let exec = EXECUTOR.call_once(|| {
            let mut exec = RealModeExecutor::new();
            exec.init(dispatch);
            exec
        });
        logging::init(console_sink, logging::default_level());
        common_boot(boot_device, exec)
    }

    /// The loop the loader lives in until the hand-off: present options,
    /// resolve them, and either jump to a kernel, chain to a foreign
    /// boot sector, or go back to discovery.
    fn common_boot(boot_device: u32, exec: &'static RealModeExecutor) -> ! {
        let mut svc = BiosDiskServices::new(exec);
        let mut disks = DiskSubsystem::new();
        let mut ctx = BootContext::new(boot_device);
        ctx.booted_from_cdrom = disks.is_cdrom(&mut svc, boot_device);

        if let Err(err) = disks.scan_boot_volumes(&mut svc, boot_device) {
            log::error!("boot device scan failed: {}", err);
        }

        let mut fs = ExternalFs::new();
        fs.sync(&disks);
        enrich_volumes(&mut disks, &mut fs);

        let mut config = BootConfig::new();
        if load_system_config(&mut fs, &mut config).is_err() {
            log::info!("no system configuration found");
        }

        if config.get_bool(cfg::QUIET_BOOT) == Some(true) {
            ctx.mode |= BootMode::QUIET;
        }
        if let Some(flags) = config.get(cfg::KERNEL_FLAGS) {
            ctx.verbose = value_for_boot_key(flags, "-v").is_some()
                || value_for_boot_key(flags, "-s").is_some();
        }

        // Instant Menu behaves as if a key interrupted the countdown.
        let mut first_run = config.get_bool(cfg::INSTANT_MENU) != Some(true);

        let console = BiosConsole::new(exec);
        ctx.cdrom_rescan_enabled = if ctx.booted_from_cdrom {
            if config.get_bool(cfg::RESCAN_PROMPT) == Some(true) {
                prompt_for_rescan(&console, &mut BiosKeyboard::new(exec))
            } else {
                config.get_bool(cfg::RESCAN) == Some(true)
            }
        } else {
            false
        };

        ctx.scan_single_drive = config.get_bool(cfg::SCAN_SINGLE_DRIVE) == Some(true);
        if !ctx.scan_single_drive {
            if let Err(err) = disks.scan_disks(&mut svc, boot_device) {
                log::error!("disk scan failed: {}", err);
            }
            fs.sync(&disks);
            enrich_volumes(&mut disks, &mut fs);
        }

        let banner = config.get_bool(cfg::BOOT_BANNER) != Some(false);

        loop {
            let chain = disks.filtered_chain(&ChainFilter {
                min_device: BIOS_DEV_HD,
                max_device: 0xFF,
                allow: VolumeFlags::SYSTEM_VOLUME | VolumeFlags::FOREIGN_BOOT,
                deny: VolumeFlags::EFI_SYSTEM,
                hide_list: config.get(cfg::HIDE_PARTITION),
            });

            let outcome = {
                let mut keyboard = BiosKeyboard::new(exec);
                let mut ticks = BiosTicks::new(exec);
                let mut render = TextRenderer { console: BiosConsole::new(exec), banner };
                let mut diag = BiosDiagnostics { exec, fs: ExternalFs::new() };
                diag.fs.sync(&disks);
                let mut deps = MenuDeps {
                    keyboard: &mut keyboard,
                    ticks: &mut ticks,
                    render: &mut render,
                    diag: &mut diag,
                };
                get_boot_options(&mut ctx, &config, &disks, &chain, first_run, &mut deps)
            };
            first_run = false;

            match outcome.action {
                MenuAction::RescanOptical => {
                    disks.reset_boot_volumes(ctx.bios_dev);
                    let _ = disks.scan_boot_volumes(&mut svc, ctx.bios_dev);
                    fs.sync(&disks);
                    enrich_volumes(&mut disks, &mut fs);
                    continue;
                }
                // The bootdevice prompt may have moved ctx.bios_dev.
                MenuAction::RescanAll => {
                    disks = DiskSubsystem::new();
                    let _ = disks.scan_boot_volumes(&mut svc, ctx.bios_dev);
                    let _ = disks.scan_disks(&mut svc, ctx.bios_dev);
                    fs.sync(&disks);
                    enrich_volumes(&mut disks, &mut fs);
                    continue;
                }
                MenuAction::None => {}
            }

            ctx.boot_volume = outcome.volume;
            if ctx.boot_volume.is_none() {
                // Escape from the menu; rediscover the boot device when
                // optical rescans are allowed, then re-present.
                if ctx.cdrom_rescan_enabled {
                    disks.reset_boot_volumes(boot_device);
                    let _ = disks.scan_boot_volumes(&mut svc, boot_device);
                    fs.sync(&disks);
                    enrich_volumes(&mut disks, &mut fs);
                }
                continue;
            }

            let decision = match process_boot_options(
                &mut ctx,
                &mut config,
                &mut disks,
                &mut svc,
                &mut fs,
                &outcome.args,
            ) {
                Ok(decision) => decision,
                Err(err) => {
                    log::error!("boot options: {}", err);
                    continue;
                }
            };

            match decision.status {
                BootStatus::ChainLoad => {
                    if let Some(sector) = decision.chain_sector.as_ref() {
                        unsafe { handoff_chain(sector.as_ptr(), ctx.chain_boot_dev) };
                    }
                    log::error!("chain load requested without a boot sector");
                }
                BootStatus::RedoDiscovery => continue,
                BootStatus::Proceed => {
                    let image = match load_kernel(&mut fs, &config, &ctx) {
                        Ok(image) => image,
                        Err(err) => {
                            log::error!("can't load {}: {}", ctx.boot_file.as_str(), err);
                            continue;
                        }
                    };
                    let mut decoder = ExternalDecoder;
                    let mut drivers = ExternalDrivers;
                    let mut hooks = BiosHandoff { exec, command_line: decision.command_line };
                    if let Err(err) = exec_kernel(
                        &image,
                        &mut fs,
                        &config,
                        &ctx,
                        &mut decoder,
                        &mut drivers,
                        &mut hooks,
                    ) {
                        log::error!("kernel start failed: {}", err);
                    }
                }
            }
        }
    }

    /// Post-scan pass over every mapped volume: booter labels and the
    /// system-volume flag both need mounted file access the scanners do
    /// not have.
    fn enrich_volumes(disks: &mut DiskSubsystem, fs: &mut ExternalFs) {
        let ids: alloc::vec::Vec<VolumeId> =
            disks.maps().iter().flat_map(|m| m.ids().iter().copied()).collect();
        for id in ids {
            let mut vol = disks.volume(id).clone();
            enrich_volume(fs, id, &mut vol);
            *disks.volume_mut(id) = vol;
        }
    }

    fn prompt_for_rescan(console: &BiosConsole<'_>, keyboard: &mut BiosKeyboard<'_>) -> bool {
        console.write_str(
            "\r\nEnable media rescan? Press Enter to enable, any other key to skip.\r\n",
        );
        keyboard.flush();
        keyboard.read_key() == keys::RETURN
    }

    /// Bridge to the linked filesystem driver package.
    struct ExternalFs {
        targets: HashMap<VolumeId, (u32, u32)>,
        root: Option<(u32, u32)>,
    }

    impl ExternalFs {
        fn new() -> Self {
            ExternalFs { targets: HashMap::new(), root: None }
        }

        /// Refresh the volume-id translation after any rescan.
        fn sync(&mut self, disks: &DiskSubsystem) {
            self.targets.clear();
            for map in disks.maps() {
                for &id in map.ids() {
                    let vol = disks.volume(id);
                    self.targets.insert(id, (vol.device, vol.part_no));
                }
            }
        }

        fn target(&self, volume: Option<VolumeId>) -> Result<(u32, u32)> {
            match volume {
                Some(id) => self
                    .targets
                    .get(&id)
                    .copied()
                    .ok_or(BootError::InvalidState("volume not in any map")),
                None => self.root.ok_or(BootError::InvalidState("no root volume mounted")),
            }
        }
    }

    impl FsReader for ExternalFs {
        fn set_root(&mut self, volume: VolumeId) {
            if let Some(&target) = self.targets.get(&volume) {
                let rc = unsafe { fsdrv_mount(target.0, target.1) };
                if rc == 0 {
                    self.root = Some(target);
                } else {
                    log::error!("mount of hd({},{}) failed", target.0 - BIOS_DEV_HD, target.1);
                }
            }
        }

        fn file_info(&mut self, volume: Option<VolumeId>, path: &str) -> Result<FileInfo> {
            let (device, partition) = self.target(volume)?;
            let mut kind = 0u32;
            let mut mtime = 0u32;
            let mut size = 0u64;
            let rc = unsafe {
                fsdrv_file_info(
                    device,
                    partition,
                    path.as_ptr(),
                    path.len() as u32,
                    &mut kind,
                    &mut mtime,
                    &mut size,
                )
            };
            if rc != 0 {
                return Err(BootError::FileNotFound);
            }
            let kind = match kind {
                0 => FileKind::Flat,
                1 => FileKind::Directory,
                _ => FileKind::Other,
            };
            Ok(FileInfo { kind, mtime, size })
        }

        fn read_file(
            &mut self,
            volume: Option<VolumeId>,
            path: &str,
            buf: &mut [u8],
        ) -> Result<usize> {
            let (device, partition) = self.target(volume)?;
            let got = unsafe {
                fsdrv_read_file(
                    device,
                    partition,
                    path.as_ptr(),
                    path.len() as u32,
                    buf.as_mut_ptr(),
                    buf.len() as u32,
                )
            };
            if got < 0 {
                return Err(BootError::FileNotFound);
            }
            Ok(got as usize)
        }

        fn load_file(
            &mut self,
            volume: Option<VolumeId>,
            path: &str,
        ) -> Result<alloc::vec::Vec<u8>> {
            let info = self.file_info(volume, path)?;
            let mut buf = vec![0u8; info.size as usize];
            let got = self.read_file(volume, path, &mut buf)?;
            buf.truncate(got);
            Ok(buf)
        }

        fn volume_label(&mut self, volume: VolumeId) -> Option<ArrayString<32>> {
            let &(device, partition) = self.targets.get(&volume)?;
            let mut buf = [0u8; 32];
            let len = unsafe {
                fsdrv_volume_label(device, partition, buf.as_mut_ptr(), buf.len() as u32)
            };
            if len <= 0 {
                return None;
            }
            let text = core::str::from_utf8(&buf[..len as usize]).ok()?;
            ArrayString::from(text).ok()
        }
    }

    struct ExternalDecoder;

    impl KernelDecoder for ExternalDecoder {
        fn decode(&mut self, image: &[u8], arch: KernelArch) -> Result<LoadedKernel> {
            let arch = match arch {
                KernelArch::X86_64 => 0u32,
                KernelArch::I386 => 1,
            };
            let mut entry = 0u32;
            let mut base = 0u32;
            let mut size = 0u32;
            let rc = unsafe {
                kerndrv_decode(
                    image.as_ptr(),
                    image.len() as u32,
                    arch,
                    &mut entry,
                    &mut base,
                    &mut size,
                )
            };
            if rc != 0 {
                return Err(BootError::DecodeFailed("kernel image rejected"));
            }
            Ok(LoadedKernel { entry, base, size: size as usize })
        }
    }

    struct ExternalDrivers;

    impl DriverLoader for ExternalDrivers {
        fn load_drivers(&mut self, _fs: &mut dyn FsReader, root: &str) -> Result {
            let rc = unsafe { kerndrv_load_drivers(root.as_ptr(), root.len() as u32) };
            if rc != 0 {
                return Err(BootError::DriverLoadFailed);
            }
            Ok(())
        }
    }

    struct BiosHandoff {
        exec: &'static RealModeExecutor,
        command_line: ArrayString<BOOT_LINE_LEN>,
    }

    impl HandoffHooks for BiosHandoff {
        fn reserve_boot_args(&mut self, kernel: &LoadedKernel) -> Result {
            let rc = unsafe { handoff_reserve(kernel.base, kernel.size as u32) };
            if rc != 0 {
                return Err(BootError::InvalidState("kernel footprint reservation failed"));
            }
            Ok(())
        }

        fn wait_for_keypress(&mut self) {
            BiosKeyboard::new(self.exec).read_key();
        }

        fn set_video_mode(&mut self, text_mode: bool) {
            unsafe { handoff_set_video(text_mode as u32) };
        }

        fn finalize(&mut self, _ctx: &BootContext) -> Result {
            let line = self.command_line.as_str();
            let rc = unsafe { handoff_finalize(line.as_ptr(), line.len() as u32) };
            if rc != 0 {
                return Err(BootError::InvalidState("boot args finalization failed"));
            }
            Ok(())
        }

        fn transfer(&mut self, entry: u32) -> Result {
            unsafe { handoff_jump(entry) }
        }
    }

    /// 80x25 text-mode menu drawing through INT 10h teletype output.
    struct TextRenderer {
        console: BiosConsole<'static>,
        banner: bool,
    }

    impl TextRenderer {
        fn print_at(&mut self, row: u8, col: u8, text: &str) {
            self.console.set_cursor(row, col);
            self.console.clear_to_end_of_line();
            self.console.write_str(text);
        }
    }

    impl MenuRenderer for TextRenderer {
        fn show_banner(&mut self) {
            self.console.clear_screen();
            if self.banner {
                let mut line: ArrayString<80> = ArrayString::new();
                let _ = write!(line, "Moray Darwin/x86 boot v{}", env!("CARGO_PKG_VERSION"));
                self.print_at(0, 0, &line);
                self.print_at(2, 0, "Select a startup volume:");
            }
        }

        fn draw_items(&mut self, items: &[MenuItem], window: &MenuWindow) {
            for (row, idx) in (window.top..=window.bottom).enumerate() {
                let Some(item) = items.get(idx) else { break };
                let marker = if idx == window.selection { "> " } else { "  " };
                self.console.set_cursor((MENU_TOP_ROW + row) as u8, 0);
                self.console.clear_to_end_of_line();
                self.console.write_str(marker);
                self.console.write_str(&item.name);
            }
        }

        fn draw_countdown(&mut self, msg: &str, remaining: i32) {
            let mut line: ArrayString<96> = ArrayString::new();
            let mut digits = itoa::Buffer::new();
            let _ = write!(line, "{} ({})", msg, digits.format(remaining));
            self.print_at(3, 0, &line);
        }

        fn clear_countdown(&mut self) {
            self.print_at(3, 0, "");
        }

        fn show_prompt(&mut self, native: bool, rescan_enabled: bool) {
            let row = (MENU_TOP_ROW + 11) as u8;
            if native {
                self.print_at(row, 0, "Type kernel arguments, or press Enter to start up.");
            } else {
                self.print_at(row, 0, "Press Enter to start up the selected operating system.");
            }
            if rescan_enabled {
                self.print_at(row + 1, 0, "F5 rescans the optical drive.");
            } else {
                self.print_at(row + 1, 0, "");
            }
            self.console.set_cursor(row + 2, 0);
            self.console.clear_to_end_of_line();
            self.console.write_str("boot: ");
        }

        fn echo_key(&mut self, key: u16) {
            if key == keys::BACKSPACE {
                self.console.write_str("\u{8} \u{8}");
            } else if let Some(c) = char::from_u32((key & keys::ASCII_MASK) as u32) {
                self.console.write_char(c);
            }
        }

        fn clear_args(&mut self) {
            let row = (MENU_TOP_ROW + 13) as u8;
            self.console.set_cursor(row, 0);
            self.console.clear_to_end_of_line();
            self.console.write_str("boot: ");
        }

        fn info_box(&mut self, title: &str, body: &str) {
            self.console.clear_screen();
            self.console.write_str(title);
            self.console.write_str("\r\n\r\n");
            self.console.write_str(body);
            self.console.write_str("\r\n[press a key to continue]\r\n");
        }
    }

    /// `?` command back end reading straight from the firmware.
    struct BiosDiagnostics {
        exec: &'static RealModeExecutor,
        fs: ExternalFs,
    }

    /// INT 15h E820 address range descriptor as the firmware stores it
    /// in the transfer buffer.
    #[repr(C)]
    #[derive(Clone, Copy)]
    struct E820Entry {
        base: u64,
        length: u64,
        kind: u32,
    }

    impl DiagnosticsSource for BiosDiagnostics {
        fn video_info(&mut self) -> String {
            let mut ctx = RealModeContext::new();
            ctx.set_ah(0x0F);
            let mut out = String::new();
            if unsafe { self.exec.execute_int(0x10, &mut ctx) }.is_ok() {
                let _ = write!(
                    out,
                    "Video mode {:#04x}, {} columns, page {}",
                    ctx.al(),
                    ctx.ah(),
                    (ctx.ebx >> 8) & 0xFF
                );
            } else {
                out.push_str("Video services unavailable");
            }
            out
        }

        fn memory_info(&mut self) -> String {
            let mut out = String::new();
            let mut continuation = 0u32;
            for _ in 0..32 {
                let mut ctx = RealModeContext::new();
                ctx.eax = 0xE820;
                ctx.ebx = continuation;
                ctx.ecx = core::mem::size_of::<E820Entry>() as u32;
                ctx.edx = 0x534D_4150; // 'SMAP'
                ctx.es = (TRANSFER_BUF_ADDR >> 4) as u16;
                ctx.edi = TRANSFER_BUF_ADDR & 0xF;
                if unsafe { self.exec.execute_int(0x15, &mut ctx) }.is_err()
                    || ctx.carry()
                    || ctx.eax != 0x534D_4150
                {
                    break;
                }
                let entry =
                    unsafe { core::ptr::read_volatile(TRANSFER_BUF_ADDR as *const E820Entry) };
                let _ = writeln!(
                    out,
                    "{:#018x} + {:#x} type {}",
                    entry.base, entry.length, entry.kind
                );
                continuation = ctx.ebx;
                if continuation == 0 {
                    break;
                }
            }
            if out.is_empty() {
                out.push_str("No memory map from firmware");
            }
            out
        }

        fn pci_info(&mut self) -> String {
            let mut ctx = RealModeContext::new();
            ctx.set_ax(0xB101);
            let mut out = String::new();
            if unsafe { self.exec.execute_int(0x1A, &mut ctx) }.is_ok()
                && !ctx.carry()
                && ctx.edx == 0x2049_4350
            {
                let _ = write!(
                    out,
                    "PCI BIOS {}.{}, last bus {}",
                    (ctx.ebx >> 8) & 0xFF,
                    ctx.ebx & 0xFF,
                    ctx.ecx & 0xFF
                );
            } else {
                out.push_str("No PCI BIOS");
            }
            out
        }

        fn help_text(&mut self) -> &'static str {
            "?video    display adapter state\r\n\
             ?memory   firmware memory map\r\n\
             ?lspci    PCI BIOS presence\r\n\
             ?more <file>  show a text file\r\n\
             ?rd <cmd> ramdisk control\r\n\
             ?norescan disable optical rescans\r\n\
             ?bootdevice  scan a different BIOS device"
        }

        fn read_text_file(&mut self, path: &str) -> Option<String> {
            // more(1)-style display is bounded; huge files are truncated.
            let mut buf = vec![0u8; 64 * 1024];
            let got = self.fs.read_file(None, path, &mut buf).ok()?;
            buf.truncate(got);
            Some(String::from_utf8_lossy(&buf).into_owned())
        }

        fn ramdisk_command(&mut self, _args: &str) -> String {
            String::from("Ramdisk control is not linked into this build")
        }
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("moray is a BIOS second-stage loader; build it for the bare-metal target");
}
