//! Boot Configuration
//!
//! Three layers of configuration feed every lookup, in strict precedence:
//! the user-typed boot line wins over the per-volume override config,
//! which wins over the primary (system) config. Two exceptions keep an
//! override file from silently undoing a deliberate primary setting: an
//! override `Kernel` equal to the stock kernel name and an override empty
//! `Kernel Flags` do not shadow a primary value.

use alloc::string::String;
use arrayvec::ArrayString;
use hashbrown::HashMap;

use crate::error::{BootError, Result};
use crate::fs::FsReader;
use crate::volume::VolumeId;

/// Well-known configuration keys.
pub mod keys {
    pub const TIMEOUT: &str = "Timeout";
    pub const INSTANT_MENU: &str = "Instant Menu";
    pub const QUIET_BOOT: &str = "Quiet Boot";
    pub const KERNEL: &str = "Kernel";
    pub const KERNEL_FLAGS: &str = "Kernel Flags";
    pub const KERNEL_CACHE: &str = "Kernel Cache";
    pub const MKEXT_CACHE: &str = "MKext Cache";
    pub const DEFAULT_PARTITION: &str = "Default Partition";
    pub const HIDE_PARTITION: &str = "Hide Partition";
    pub const ROOT_UUID: &str = "Root UUID";
    pub const BOOT_UUID: &str = "boot-uuid";
    pub const BOOT_DEVICE: &str = "Boot Device";
    pub const ROOT_DEVICE: &str = "rd";
    pub const BOOT_GRAPHICS: &str = "Boot Graphics";
    pub const BOOT_BANNER: &str = "Boot Banner";
    pub const CDROM_PROMPT: &str = "CD-ROM Prompt";
    pub const CDROM_OPTION_KEY: &str = "CD-ROM Option Key";
    pub const RESCAN: &str = "Rescan";
    pub const RESCAN_PROMPT: &str = "Rescan Prompt";
    pub const SCAN_SINGLE_DRIVE: &str = "Scan Single Drive";
    pub const WAIT: &str = "Wait";
}

/// Stock kernel file name; choosing anything else disables cache use.
pub const DEFAULT_KERNEL: &str = "mach_kernel";

/// Capacity of the boot command line.
pub const BOOT_LINE_LEN: usize = 512;

/// Upper bound on a config file we will read.
pub const CONFIG_DATA_SIZE: usize = 4096;

/// Config file locations tried in order for the primary config.
pub const SYSTEM_CONFIG_PATHS: &[&str] = &[
    "/Extra/com.apple.Boot.plist",
    "bt(0,0)/Extra/com.apple.Boot.plist",
    "/Library/Preferences/SystemConfiguration/com.apple.Boot.plist",
    "/com.apple.boot.P/Library/Preferences/SystemConfiguration/com.apple.Boot.plist",
    "/com.apple.boot.R/Library/Preferences/SystemConfiguration/com.apple.Boot.plist",
    "/com.apple.boot.S/Library/Preferences/SystemConfiguration/com.apple.Boot.plist",
];

/// Locations tried for the per-volume override config.
pub const OVERRIDE_CONFIG_PATHS: &[&str] = &[
    "rd(0,0)/Extra/com.apple.Boot.plist",
    "/Extra/com.apple.Boot.plist",
    "/Library/Preferences/SystemConfiguration/com.apple.Boot.plist",
    "/com.apple.boot.P/Library/Preferences/SystemConfiguration/com.apple.Boot.plist",
    "/com.apple.boot.R/Library/Preferences/SystemConfiguration/com.apple.Boot.plist",
    "/com.apple.boot.S/Library/Preferences/SystemConfiguration/com.apple.Boot.plist",
];

/// Locations tried for a booter-helper volume's config.
pub const HELPER_CONFIG_PATHS: &[&str] = &[
    "/com.apple.boot.P/Library/Preferences/SystemConfiguration/com.apple.Boot.plist",
    "/com.apple.boot.R/Library/Preferences/SystemConfiguration/com.apple.Boot.plist",
    "/com.apple.boot.S/Library/Preferences/SystemConfiguration/com.apple.Boot.plist",
];

/// One parsed key/value table.
#[derive(Debug, Default, Clone)]
pub struct ConfigTable {
    entries: HashMap<String, String>,
}

impl ConfigTable {
    pub fn new() -> Self {
        ConfigTable::default()
    }

    /// Parse `key = value` lines. Keys and values may be double-quoted;
    /// blank lines and `#` comments are skipped, malformed lines ignored.
    pub fn parse(text: &str) -> Self {
        let mut table = ConfigTable::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some(eq) = find_unquoted_eq(line) else {
                continue;
            };
            let key = unquote(line[..eq].trim());
            let value = unquote(line[eq + 1..].trim().trim_end_matches(';').trim_end());
            if key.is_empty() {
                continue;
            }
            table.entries.insert(String::from(key), String::from(value));
        }
        table
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.entries.insert(String::from(key), String::from(value));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn find_unquoted_eq(line: &str) -> Option<usize> {
    let mut quoted = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '=' if !quoted => return Some(i),
            _ => {}
        }
    }
    None
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// One token of a boot line: either quoted (to the closing quote) or a run
/// of characters up to whitespace or `=`. Returns (token, rest).
fn get_token(line: &str) -> (&str, &str) {
    let bytes = line.as_bytes();
    if bytes.first() == Some(&b'"') {
        let inner = &line[1..];
        match inner.find('"') {
            Some(end) => (&inner[..end], &inner[end + 1..]),
            None => (inner, ""),
        }
    } else {
        let end = bytes
            .iter()
            .position(|&b| b.is_ascii_whitespace() || b == b'=')
            .unwrap_or(bytes.len());
        (&line[..end], &line[end..])
    }
}

/// Find `key` in a boot line of `flag` and `option=value` tokens. A bare
/// flag yields an empty value. The last occurrence wins.
pub fn value_for_boot_key<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let mut rest = line;
    let mut found = None;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let (token, after) = get_token(rest);
        if after.as_bytes().first() == Some(&b'=') {
            let (value, after_value) = get_token(&after[1..]);
            if token == key {
                found = Some(value);
            }
            rest = after_value;
        } else {
            if token == key {
                found = Some("");
            }
            rest = after;
        }
    }
    found
}

/// Pull the next whitespace-separated argument off an interactive command
/// line; double quotes group. Returns (argument, rest).
pub fn next_arg(line: &str) -> (&str, &str) {
    let rest = line.trim_start();
    if rest.is_empty() {
        return ("", "");
    }
    get_token(rest)
}

/// The layered lookup context.
#[derive(Debug, Default)]
pub struct BootConfig {
    pub primary: ConfigTable,
    pub overrides: ConfigTable,
    /// Set once the primary config loaded; overrides are ignored until
    /// then.
    pub can_override: bool,
    /// The user-typed portion of the boot line.
    pub command_line: ArrayString<BOOT_LINE_LEN>,
}

impl BootConfig {
    pub fn new() -> Self {
        BootConfig::default()
    }

    pub fn set_command_line(&mut self, line: &str) {
        self.command_line.clear();
        let take = line.len().min(BOOT_LINE_LEN);
        self.command_line.push_str(&line[..take]);
    }

    /// Layered lookup: command line, then override config, then primary.
    pub fn get(&self, key: &str) -> Option<&str> {
        if let Some(val) = value_for_boot_key(&self.command_line, key) {
            return Some(val);
        }

        let primary = self.primary.get(key);
        if self.can_override {
            if let Some(over) = self.overrides.get(key) {
                let shadowed = primary.is_some()
                    && ((key == keys::KERNEL && over == DEFAULT_KERNEL)
                        || (key == keys::KERNEL_FLAGS && over.is_empty()));
                if !shadowed {
                    return Some(over);
                }
            }
        }
        primary
    }

    /// Booleans are true exactly when the value starts with 'Y' or 'y'.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).map(|v| matches!(v.as_bytes().first(), Some(b'Y') | Some(b'y')))
    }

    /// Signed decimal integers; anything non-numeric is treated as absent.
    pub fn get_int(&self, key: &str) -> Option<i32> {
        let val = self.get(key)?;
        let val = val.trim();
        if val.is_empty() {
            return None;
        }
        val.parse::<i32>().ok()
    }
}

fn read_config_text(fs: &mut dyn FsReader, volume: Option<VolumeId>, path: &str) -> Result<ConfigTable> {
    let mut buf = [0u8; CONFIG_DATA_SIZE];
    let len = fs.read_file(volume, path, &mut buf)?;
    let text = core::str::from_utf8(&buf[..len])
        .map_err(|_| BootError::ConfigLoadFailed("config file is not text"))?;
    Ok(ConfigTable::parse(text))
}

/// Load the primary config from the first present candidate path.
pub fn load_system_config(fs: &mut dyn FsReader, config: &mut BootConfig) -> Result {
    for path in SYSTEM_CONFIG_PATHS {
        if let Ok(table) = read_config_text(fs, None, path) {
            log::info!("system config: {}", path);
            config.primary = table;
            config.can_override = true;
            return Ok(());
        }
    }
    Err(BootError::ConfigLoadFailed("system config not found"))
}

/// Load the selected volume's override config. Best-effort: absence
/// leaves the current overrides empty rather than failing the boot.
pub fn load_override_config(fs: &mut dyn FsReader, config: &mut BootConfig) -> Result {
    config.overrides = ConfigTable::new();
    for path in OVERRIDE_CONFIG_PATHS {
        if let Ok(table) = read_config_text(fs, None, path) {
            log::info!("override config: {}", path);
            config.overrides = table;
            return Ok(());
        }
    }
    Err(BootError::ConfigLoadFailed("override config not found"))
}

/// Load a booter-helper volume's own config table.
pub fn load_helper_config(fs: &mut dyn FsReader, volume: VolumeId) -> Result<ConfigTable> {
    for path in HELPER_CONFIG_PATHS {
        if let Ok(table) = read_config_text(fs, Some(volume), path) {
            return Ok(table);
        }
    }
    Err(BootError::ConfigLoadFailed("helper config not found"))
}
