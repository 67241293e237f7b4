//! Boot Option Menu
//!
//! Presents the filtered volume chain, runs the startup countdown, and
//! collects typed kernel arguments. The loop is a state machine over
//! keyboard and timer traits; rendering goes through [`MenuRenderer`] so
//! the logic never touches a display surface directly. Rescans are never
//! performed here; the outcome tells the outer loop to tear down and
//! rediscover.

use alloc::string::String;
use alloc::vec::Vec;
use arrayvec::ArrayString;

use crate::bios::keyboard::keys;
use crate::bios::{KeyboardServices, TickSource, TICKS_PER_SEC};
use crate::config::{keys as cfg, next_arg, BootConfig, BOOT_LINE_LEN};
use crate::context::{BootContext, BootMode};
use crate::disk::DiskSubsystem;
use crate::volume::{describe_volume, FilteredChain, VolumeArena, VolumeFlags, VolumeId, VOL_DESC_LEN};

/// Screen row where the menu window begins.
pub const MENU_TOP_ROW: usize = 5;

/// Most volume rows shown at once; longer chains scroll.
pub const MENU_MAX_ITEMS: usize = 10;

/// Countdown seconds when booting optical media without a Timeout key.
pub const CD_BOOT_TIMEOUT: i32 = 8;

/// One selectable row.
#[derive(Debug, Clone)]
pub struct MenuItem {
    pub name: ArrayString<VOL_DESC_LEN>,
    pub id: VolumeId,
}

/// Display surface the menu draws on. Implementations own cursor and
/// highlight handling.
pub trait MenuRenderer {
    fn show_banner(&mut self);

    /// Draw the rows `window.top..=window.bottom` of `items`, with
    /// `window.selection` highlighted.
    fn draw_items(&mut self, items: &[MenuItem], window: &MenuWindow);

    fn draw_countdown(&mut self, msg: &str, remaining: i32);

    fn clear_countdown(&mut self);

    /// Show the argument prompt. `native` is false when the selection is
    /// a foreign OS and only plain Return makes sense.
    fn show_prompt(&mut self, native: bool, rescan_enabled: bool);

    /// Echo one typed character, or rub one out for backspace.
    fn echo_key(&mut self, key: u16);

    fn clear_args(&mut self);

    fn info_box(&mut self, title: &str, body: &str);
}

/// Read-only system info behind the `?` commands.
pub trait DiagnosticsSource {
    fn video_info(&mut self) -> String;
    fn memory_info(&mut self) -> String;
    fn pci_info(&mut self) -> String;
    fn help_text(&mut self) -> &'static str;
    fn read_text_file(&mut self, path: &str) -> Option<String>;
    fn ramdisk_command(&mut self, args: &str) -> String;
}

/// Everything the menu loop polls or draws through.
pub struct MenuDeps<'a> {
    pub keyboard: &'a mut dyn KeyboardServices,
    pub ticks: &'a mut dyn TickSource,
    pub render: &'a mut dyn MenuRenderer,
    pub diag: &'a mut dyn DiagnosticsSource,
}

/// Visible slice of the item list plus the highlighted row.
///
/// Movement clamps at the ends (no wraparound) and scrolls one row when
/// the selection would leave the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MenuWindow {
    pub top: usize,
    pub bottom: usize,
    pub selection: usize,
    count: usize,
}

impl MenuWindow {
    pub fn new(count: usize, selection: usize, height: usize) -> Self {
        let mut win = MenuWindow {
            top: 0,
            bottom: count.min(height).saturating_sub(1),
            selection: selection.min(count.saturating_sub(1)),
            count,
        };
        if win.selection > win.bottom {
            win.top += win.selection - win.bottom;
            win.bottom = win.selection;
        }
        win
    }

    /// True when the selection or window changed.
    pub fn move_up(&mut self) -> bool {
        if self.selection > self.top {
            self.selection -= 1;
            true
        } else if self.top > 0 {
            self.top -= 1;
            self.bottom -= 1;
            self.selection -= 1;
            true
        } else {
            false
        }
    }

    pub fn move_down(&mut self) -> bool {
        if self.selection < self.bottom {
            self.selection += 1;
            true
        } else if self.bottom + 1 < self.count {
            self.top += 1;
            self.bottom += 1;
            self.selection += 1;
            true
        } else {
            false
        }
    }
}

/// Follow-up the outer loop must perform after the menu returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    None,
    /// F5 with optical rescan enabled: rescan the boot device.
    RescanOptical,
    /// F10: rescan every disk.
    RescanAll,
}

/// Result of one pass through the option menu.
#[derive(Debug)]
pub struct MenuOutcome {
    /// Chosen volume; `None` sends the outer loop back to discovery.
    pub volume: Option<VolumeId>,
    /// Raw typed argument text, kernel name included.
    pub args: ArrayString<BOOT_LINE_LEN>,
    pub action: MenuAction,
}

/// How a countdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownOutcome {
    Expired,
    Key(u16),
    /// Shift, control or alt held down.
    Modifier,
}

/// Busy-poll the tick counter for `seconds`, redrawing the remaining
/// count each second. A zero or negative timeout expires immediately
/// without touching the keyboard.
pub fn countdown(
    keyboard: &mut dyn KeyboardServices,
    ticks: &mut dyn TickSource,
    render: &mut dyn MenuRenderer,
    msg: &str,
    seconds: i32,
) -> CountdownOutcome {
    if seconds <= 0 {
        return CountdownOutcome::Expired;
    }

    keyboard.flush();
    render.draw_countdown(msg, seconds);

    let mut remaining = seconds;
    let mut deadline = ticks.ticks() + TICKS_PER_SEC;
    loop {
        if keyboard.key_available() {
            let key = keyboard.read_key();
            keyboard.flush();
            return CountdownOutcome::Key(key);
        }
        if keyboard.shift_flags().modifier_held() {
            return CountdownOutcome::Modifier;
        }
        if ticks.ticks() >= deadline {
            deadline += TICKS_PER_SEC;
            remaining -= 1;
            if remaining <= 0 {
                keyboard.flush();
                return CountdownOutcome::Expired;
            }
            render.draw_countdown(msg, remaining);
        }
    }
}

/// Countdown seconds for this boot, honoring the `Timeout` key.
///
/// Without a config the menu shows immediately so an unpartitioned or
/// unreadable disk still presents something. A negative timeout selects
/// quiet mode.
pub fn timeout_from_config(config: &BootConfig, is_cdrom: bool) -> i32 {
    if let Some(t) = config.get_int(cfg::TIMEOUT) {
        return t;
    }
    if is_cdrom {
        CD_BOOT_TIMEOUT
    } else if config.can_override {
        -1
    } else {
        0
    }
}

/// Default menu selection.
///
/// A `Default Partition` key naming a visible `hd(x,y)` wins, then the
/// volume the scanners designated, then the first native-boot volume in
/// the chain, then the first visible entry.
pub fn select_default_volume(
    chain: &FilteredChain,
    arena: &VolumeArena,
    designated: Option<VolumeId>,
    default_partition: Option<&str>,
) -> Option<VolumeId> {
    if let Some(wanted) = default_partition {
        for id in chain.visible_ids() {
            if arena.get(id).device_string().as_str() == wanted {
                return Some(id);
            }
        }
    }
    if let Some(id) = designated {
        if chain.contains(id) {
            return Some(id);
        }
    }
    chain
        .visible_ids()
        .find(|&id| arena.get(id).flags.contains(VolumeFlags::NATIVE_BOOT))
        .or_else(|| chain.visible_ids().next())
}

/// Menu rows for the visible chain, newest-scanned last.
///
/// Maps store entries in reverse discovery order, so the display list is
/// the visible chain reversed. Returns the items and the index of
/// `selected` within them.
pub fn build_menu_items(
    chain: &FilteredChain,
    arena: &VolumeArena,
    selected: Option<VolumeId>,
) -> (Vec<MenuItem>, usize) {
    let mut items: Vec<MenuItem> = chain
        .visible_ids()
        .map(|id| MenuItem { name: describe_volume(arena.get(id), true), id })
        .collect();
    items.reverse();
    let index = selected
        .and_then(|sel| items.iter().position(|item| item.id == sel))
        .unwrap_or(0);
    (items, index)
}

fn push_args(args: &mut ArrayString<BOOT_LINE_LEN>, text: &str) {
    if args.try_push_str(text).is_err() {
        log::warn!("boot arguments too long, truncating");
    }
}

/// Dispatch one `?command` line typed at the prompt. A non-`None` action
/// means the command invalidated the current volume maps.
fn run_booter_command(deps: &mut MenuDeps<'_>, ctx: &mut BootContext, line: &str) -> MenuAction {
    let (command, rest) = next_arg(line);
    let (param, rest) = next_arg(rest);
    match command {
        "video" => {
            let info = deps.diag.video_info();
            deps.render.info_box("Video", &info);
        }
        "memory" => {
            let info = deps.diag.memory_info();
            deps.render.info_box("Memory Map", &info);
        }
        "lspci" => {
            let info = deps.diag.pci_info();
            deps.render.info_box("PCI Devices", &info);
        }
        "more" => match deps.diag.read_text_file(param) {
            Some(text) => deps.render.info_box(param, &text),
            None => deps.render.info_box(param, "file not found"),
        },
        "rd" => {
            let mut full = ArrayString::<BOOT_LINE_LEN>::new();
            push_args(&mut full, param);
            if !rest.trim().is_empty() {
                push_args(&mut full, " ");
                push_args(&mut full, rest.trim());
            }
            let report = deps.diag.ramdisk_command(full.as_str());
            deps.render.info_box("Ramdisk", &report);
        }
        "norescan" => {
            ctx.cdrom_rescan_enabled = false;
        }
        "bootdevice" => {
            let dev = select_alternate_boot_device(deps, ctx.bios_dev);
            if dev != ctx.bios_dev {
                ctx.bios_dev = dev;
                ctx.scan_single_drive = false;
                return MenuAction::RescanAll;
            }
        }
        _ => {
            let help = deps.diag.help_text();
            deps.render.info_box("Help", help);
        }
    }
    MenuAction::None
}

/// Two-hex-digit prompt for retargeting the scan at another BIOS device.
/// Empty input or Escape keeps the current device.
fn select_alternate_boot_device(deps: &mut MenuDeps<'_>, current: u32) -> u32 {
    deps.render.info_box(
        "Boot Device",
        "Typical boot devices are 80 (first hard disk) and 81 (second).\nEnter a two-digit hexadecimal device, then press Enter.",
    );
    let mut digits = ArrayString::<2>::new();
    loop {
        let key = deps.keyboard.read_key();
        match key {
            keys::RETURN => {
                if digits.is_empty() {
                    return current;
                }
                // Only hex digits were admitted, so this cannot fail.
                return u32::from_str_radix(digits.as_str(), 16).unwrap_or(current);
            }
            keys::ESCAPE => return current,
            keys::BACKSPACE => {
                if digits.pop().is_some() {
                    deps.render.echo_key(keys::BACKSPACE);
                }
            }
            _ => {
                let ch = (key & keys::ASCII_MASK) as u8;
                if ch.is_ascii_hexdigit() && digits.try_push(ch as char).is_ok() {
                    deps.render.echo_key(key);
                }
            }
        }
    }
}

/// Retarget the default volume at a system volume on some other device.
/// Used when the user declines CD boot with 'h'.
fn find_hard_disk_system_volume(disks: &DiskSubsystem, cd_device: u32) -> Option<VolumeId> {
    let arena = disks.arena();
    let mut found = None;
    for map in disks.maps() {
        for &id in map.ids() {
            let vol = arena.get(id);
            if vol.flags.contains(VolumeFlags::SYSTEM_VOLUME) && vol.device != cd_device {
                found = Some(id);
            }
        }
    }
    found
}

/// Run the countdown and menu for one boot attempt.
///
/// `first_run` is false on re-entry after an escape or failed load, which
/// skips the countdown and goes straight to the menu.
pub fn get_boot_options(
    ctx: &mut BootContext,
    config: &BootConfig,
    disks: &DiskSubsystem,
    chain: &FilteredChain,
    first_run: bool,
    deps: &mut MenuDeps<'_>,
) -> MenuOutcome {
    let arena = disks.arena();
    let is_cdrom = ctx.booted_from_cdrom;

    let mut selected = select_default_volume(
        chain,
        arena,
        disks.designated_volume(),
        config.get(cfg::DEFAULT_PARTITION),
    );

    let mut timeout = timeout_from_config(config, is_cdrom);
    if timeout < 0 {
        ctx.mode |= BootMode::QUIET;
    }

    if deps.keyboard.shift_flags().modifier_held() {
        ctx.mode |= BootMode::SAFE;
    }

    let mut args = ArrayString::<BOOT_LINE_LEN>::new();

    // Drain anything typed before we got here. F8 aborts quiet mode;
    // 'v' and 's' pre-seed flags for a quiet first boot.
    let mut f8 = false;
    let mut v_press = false;
    let mut s_press = false;
    while deps.keyboard.key_available() {
        let key = deps.keyboard.read_key();
        match key {
            keys::F8 => f8 = true,
            _ => match (key & keys::ASCII_MASK) as u8 {
                b'v' | b'V' => v_press = true,
                b's' | b'S' => s_press = true,
                _ => {}
            },
        }
    }
    if f8 {
        ctx.mode.remove(BootMode::QUIET);
        timeout = 0;
    }
    if ctx.mode.contains(BootMode::QUIET) && first_run {
        if v_press {
            push_args(&mut args, " -v");
        }
        if s_press {
            push_args(&mut args, " -s");
        }
    }

    deps.render.show_banner();

    if is_cdrom && first_run {
        let (prompt, default_prompt) = match config.get(cfg::CDROM_PROMPT) {
            Some(text) => (ArrayString::<256>::from(text).unwrap_or_default(), false),
            None => (ArrayString::new(), true),
        };
        let mut built = ArrayString::<256>::new();
        let prompt: &str = if default_prompt {
            use core::fmt::Write;
            let name = selected
                .map(|id| describe_volume(arena.get(id), false))
                .unwrap_or_default();
            let _ = write!(
                built,
                "Press any key to start up from {}, or press F8 to enter startup options.",
                name
            );
            built.as_str()
        } else {
            prompt.as_str()
        };

        let option_key = cdrom_option_key(config);

        // An early F8 zeroed the timeout, which already means "enter
        // startup options": treat it as the option key without waiting.
        let key = if timeout != 0 {
            match countdown(deps.keyboard, deps.ticks, deps.render, prompt, timeout) {
                CountdownOutcome::Key(k) => k,
                CountdownOutcome::Modifier | CountdownOutcome::Expired => 0,
            }
        } else {
            option_key
        };
        deps.render.clear_countdown();

        if key == option_key {
            ctx.mode.remove(BootMode::QUIET);
            timeout = 0;
        } else {
            if (key & keys::ASCII_MASK) as u8 == b'h' {
                if let Some(id) = find_hard_disk_system_volume(disks, ctx.bios_dev) {
                    selected = Some(id);
                }
            }
            return MenuOutcome { volume: selected, args, action: MenuAction::None };
        }
    }

    if ctx.mode.contains(BootMode::QUIET) {
        return MenuOutcome { volume: selected, args, action: MenuAction::None };
    }

    if first_run {
        let outcome = countdown(
            deps.keyboard,
            deps.ticks,
            deps.render,
            "Press any key to enter startup options.",
            timeout,
        );
        deps.render.clear_countdown();
        if outcome == CountdownOutcome::Expired {
            if deps.keyboard.shift_flags().modifier_held() {
                ctx.mode |= BootMode::SAFE;
            }
            return MenuOutcome { volume: selected, args, action: MenuAction::None };
        }
    }

    menu_loop(ctx, disks, chain, selected, args, deps)
}

/// Keystroke that opts out of the default CD boot. An integer config
/// value names a scan code, a string's first byte an ASCII key; F8
/// otherwise.
fn cdrom_option_key(config: &BootConfig) -> u16 {
    if let Some(code) = config.get_int(cfg::CDROM_OPTION_KEY) {
        return code as u16;
    }
    if let Some(val) = config.get(cfg::CDROM_OPTION_KEY) {
        if let Some(&b) = val.as_bytes().first() {
            return b as u16;
        }
    }
    keys::F8
}

fn menu_loop(
    ctx: &mut BootContext,
    disks: &DiskSubsystem,
    chain: &FilteredChain,
    selected: Option<VolumeId>,
    mut args: ArrayString<BOOT_LINE_LEN>,
    deps: &mut MenuDeps<'_>,
) -> MenuOutcome {
    let arena = disks.arena();
    let (items, select_index) = build_menu_items(chain, arena, selected);
    let mut window = MenuWindow::new(items.len(), select_index, MENU_MAX_ITEMS);
    let mut current = items.get(window.selection).map(|item| item.id).or(selected);

    if !items.is_empty() {
        deps.render.draw_items(&items, &window);
    }

    let native = |id: Option<VolumeId>| {
        id.map_or(true, |id| arena.get(id).flags.contains(VolumeFlags::NATIVE_BOOT))
    };
    let mut show_prompt = native(current);
    deps.render.show_prompt(show_prompt, ctx.cdrom_rescan_enabled);

    loop {
        let key = deps.keyboard.read_key();

        match key {
            keys::UP_ARROW => {
                if window.move_up() {
                    current = items.get(window.selection).map(|item| item.id);
                    deps.render.draw_items(&items, &window);
                }
            }
            keys::DOWN_ARROW => {
                if window.move_down() {
                    current = items.get(window.selection).map(|item| item.id);
                    deps.render.draw_items(&items, &window);
                }
            }
            keys::RETURN => {
                if let Some(rest) = args.as_str().strip_prefix('?') {
                    let mut line = ArrayString::<BOOT_LINE_LEN>::new();
                    push_args(&mut line, rest);
                    let action = run_booter_command(deps, ctx, line.as_str());
                    args.clear();
                    deps.render.clear_args();
                    if action != MenuAction::None {
                        return MenuOutcome { volume: None, args: ArrayString::new(), action };
                    }
                    deps.render.show_prompt(show_prompt, ctx.cdrom_rescan_enabled);
                } else {
                    return MenuOutcome { volume: current, args, action: MenuAction::None };
                }
            }
            keys::ESCAPE => {
                args.clear();
                deps.render.clear_args();
                return MenuOutcome {
                    volume: None,
                    args: ArrayString::new(),
                    action: MenuAction::None,
                };
            }
            keys::F5 => {
                if ctx.cdrom_rescan_enabled {
                    return MenuOutcome {
                        volume: None,
                        args: ArrayString::new(),
                        action: MenuAction::RescanOptical,
                    };
                }
            }
            keys::F10 => {
                ctx.scan_single_drive = false;
                return MenuOutcome {
                    volume: None,
                    args: ArrayString::new(),
                    action: MenuAction::RescanAll,
                };
            }
            // Tab switches text/graphics in builds carrying a graphics
            // plane; with only the text console it swallows the key.
            keys::TAB => {}
            keys::BACKSPACE => {
                if args.pop().is_some() {
                    deps.render.echo_key(keys::BACKSPACE);
                }
            }
            _ => {
                let ch = (key & keys::ASCII_MASK) as u8;
                if show_prompt && ch >= b' ' && ch < 0x7F {
                    if args.try_push(ch as char).is_ok() {
                        deps.render.echo_key(key);
                    }
                }
            }
        }

        let now_native = native(current);
        if now_native != show_prompt {
            show_prompt = now_native;
            args.clear();
            deps.render.clear_args();
            deps.render.show_prompt(show_prompt, ctx.cdrom_rescan_enabled);
        }
    }
}
