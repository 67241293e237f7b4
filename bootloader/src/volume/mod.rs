//! Boot volume model
//!
//! Every partition the scanners recognize becomes a [`Volume`]. Volumes are
//! owned by a per-session [`VolumeArena`] and referenced everywhere else by
//! [`VolumeId`], so the per-device [`VolumeMap`]s and the menu's
//! [`FilteredChain`] never alias or copy volume records. A map can be freed
//! and its device rescanned without invalidating ids on other devices.

pub mod enrich;

use alloc::vec::Vec;
use arrayvec::ArrayString;
use bitflags::bitflags;
use core::fmt::Write;

use crate::fs::FilesystemKind;

/// Fixed capacity of the short name/type strings captured at scan time.
pub const VOL_STRLEN: usize = 32;

/// Capacity of a rendered volume description line.
pub const VOL_DESC_LEN: usize = 80;

bitflags! {
    /// Capabilities and roles discovered for a volume.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VolumeFlags: u32 {
        /// Active HFS primary in the FDISK table.
        const PRIMARY = 1 << 0;
        /// The loader can mount and read files from this volume.
        const NATIVE_BOOT = 1 << 1;
        /// Valid boot sector present.
        const BOOTABLE = 1 << 2;
        /// Bootable only by chain-loading its boot sector.
        const FOREIGN_BOOT = 1 << 3;
        /// Carries an operating system version file.
        const SYSTEM_VOLUME = 1 << 4;
        /// EFI system partition.
        const EFI_SYSTEM = 1 << 5;
        /// Dedicated booter (helper) partition.
        const BOOTER = 1 << 6;
    }
}

/// How a volume was introduced to the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartScheme {
    Fdisk,
    Gpt,
    Apm,
}

/// One recognized partition.
#[derive(Debug, Clone)]
pub struct Volume {
    /// Firmware device number the volume lives on.
    pub device: u32,
    /// Partition number as presented to the user (`hd(unit, part)`).
    pub part_no: u32,
    /// First sector of the partition, absolute on the device.
    pub part_offset: u64,
    /// Sector count, zero when the scheme does not report one.
    pub part_size: u64,
    /// FDISK system id, or the equivalent back-filled from the probe.
    pub part_type: u8,
    pub scheme: PartScheme,
    pub flags: VolumeFlags,
    /// Filesystem recognized at the partition start, if any.
    pub fs: Option<FilesystemKind>,
    /// Volume label captured from the filesystem at scan time.
    pub label: ArrayString<VOL_STRLEN>,
    /// Label read from the volume's own label file, preferred over `label`.
    pub alt_label: ArrayString<VOL_STRLEN>,
    /// Partition name from the map entry (APM only).
    pub name: ArrayString<VOL_STRLEN>,
    /// Partition type string from the map entry.
    pub type_name: ArrayString<VOL_STRLEN>,
    /// Filesystem modification time, seconds since the volume epoch.
    pub mod_time: u32,
    /// 64-bit filesystem identifier used for UUID derivation, if any.
    pub fs_id: Option<[u8; 8]>,
}

impl Volume {
    pub fn new(device: u32, part_no: u32, part_offset: u64, scheme: PartScheme) -> Self {
        Volume {
            device,
            part_no,
            part_offset,
            part_size: 0,
            part_type: 0,
            scheme,
            flags: VolumeFlags::empty(),
            fs: None,
            label: ArrayString::new(),
            alt_label: ArrayString::new(),
            name: ArrayString::new(),
            type_name: ArrayString::new(),
            mod_time: 0,
            fs_id: None,
        }
    }

    /// Drive unit as shown in `hd(unit, part)` notation.
    pub fn unit(&self) -> u32 {
        if self.device >= 0x80 { self.device - 0x80 } else { self.device }
    }

    /// `hd(unit, part)` device string for config matching.
    pub fn device_string(&self) -> ArrayString<VOL_STRLEN> {
        let mut s = ArrayString::new();
        let _ = write!(s, "hd({},{})", self.unit(), self.part_no);
        s
    }
}

/// Handle to a volume stored in a [`VolumeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VolumeId(u32);

impl VolumeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Slab owner of all volumes discovered in the current session.
///
/// Slots are recycled when a device map is freed, so ids are only valid
/// until their map is reset.
#[derive(Default)]
pub struct VolumeArena {
    slots: Vec<Option<Volume>>,
    free: Vec<u32>,
}

impl VolumeArena {
    pub fn new() -> Self {
        VolumeArena::default()
    }

    pub fn insert(&mut self, vol: Volume) -> VolumeId {
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(vol);
            VolumeId(idx)
        } else {
            self.slots.push(Some(vol));
            VolumeId((self.slots.len() - 1) as u32)
        }
    }

    pub fn remove(&mut self, id: VolumeId) {
        if let Some(slot) = self.slots.get_mut(id.index()) {
            if slot.take().is_some() {
                self.free.push(id.0);
            }
        }
    }

    pub fn get(&self, id: VolumeId) -> &Volume {
        self.slots[id.index()].as_ref().unwrap_or_else(|| panic!("stale volume id"))
    }

    pub fn get_mut(&mut self, id: VolumeId) -> &mut Volume {
        self.slots[id.index()].as_mut().unwrap_or_else(|| panic!("stale volume id"))
    }

    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

/// Volumes of one device, most recently discovered first.
pub struct VolumeMap {
    pub device: u32,
    ids: Vec<VolumeId>,
}

impl VolumeMap {
    pub fn new(device: u32) -> Self {
        VolumeMap { device, ids: Vec::new() }
    }

    /// Prepend a newly discovered volume. Each volume belongs to exactly
    /// one map, so an id must never be linked twice.
    pub fn link(&mut self, id: VolumeId) {
        debug_assert!(!self.ids.contains(&id));
        self.ids.insert(0, id);
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Ids in map order (newest first).
    pub fn ids(&self) -> &[VolumeId] {
        &self.ids
    }

    pub fn into_ids(self) -> Vec<VolumeId> {
        self.ids
    }
}

/// One entry of a [`FilteredChain`].
#[derive(Debug, Clone, Copy)]
pub struct ChainEntry {
    pub id: VolumeId,
    pub visible: bool,
}

/// Session-wide view over all maps with a visibility verdict per volume.
///
/// Map order is preserved; filtering only marks entries invisible, it never
/// reorders or drops them.
pub struct FilteredChain {
    entries: Vec<ChainEntry>,
    visible: usize,
}

impl FilteredChain {
    pub fn entries(&self) -> &[ChainEntry] {
        &self.entries
    }

    pub fn visible_count(&self) -> usize {
        self.visible
    }

    /// Visible ids in chain order.
    pub fn visible_ids(&self) -> impl Iterator<Item = VolumeId> + '_ {
        self.entries.iter().filter(|e| e.visible).map(|e| e.id)
    }

    pub fn contains(&self, id: VolumeId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }
}

/// Visibility filter inputs.
#[derive(Debug, Clone, Copy)]
pub struct ChainFilter<'a> {
    /// Lowest device number admitted.
    pub min_device: u32,
    /// Highest device number admitted.
    pub max_device: u32,
    /// Volumes must share a flag with this mask; zero admits all.
    pub allow: VolumeFlags,
    /// Volumes sharing a flag with this mask are hidden; zero hides none.
    pub deny: VolumeFlags,
    /// Space-separated `hd(x,y)` list of foreign volumes to suppress.
    pub hide_list: Option<&'a str>,
}

impl ChainFilter<'_> {
    /// Apply the filter to a single volume.
    pub fn admits(&self, vol: &Volume) -> bool {
        let mask_ok = (self.allow.is_empty() || vol.flags.intersects(self.allow))
            && (self.deny.is_empty() || !vol.flags.intersects(self.deny))
            && vol.device >= self.min_device
            && vol.device <= self.max_device;
        if !mask_ok {
            return false;
        }
        if vol.flags.contains(VolumeFlags::FOREIGN_BOOT) {
            if let Some(list) = self.hide_list {
                let dev = vol.device_string();
                if list.split_whitespace().any(|tok| tok == dev.as_str()) {
                    return false;
                }
            }
        }
        true
    }
}

/// Build the filtered chain over `maps`, preserving map order.
pub fn build_filtered_chain(
    maps: &[VolumeMap],
    arena: &VolumeArena,
    filter: &ChainFilter<'_>,
) -> FilteredChain {
    let mut entries = Vec::new();
    let mut visible = 0;
    for map in maps {
        for &id in map.ids() {
            let admit = filter.admits(arena.get(id));
            if admit {
                visible += 1;
            }
            entries.push(ChainEntry { id, visible: admit });
        }
    }
    FilteredChain { entries, visible }
}

/// Display names for FDISK partition types with no filesystem label.
const FDISK_TYPE_NAMES: &[(u8, &str)] = &[
    (0x07, "Windows NTFS"),
    (0x01, "Windows FAT12"),
    (0x04, "Windows FAT16"),
    (0x06, "Windows FAT16"),
    (0x0E, "Windows FAT16"),
    (0x0B, "Windows FAT32"),
    (0x0C, "Windows FAT32"),
    (0x83, "Linux"),
    (0xA8, "Apple UFS"),
    (0xAF, "Apple HFS"),
    (0xAB, "Apple Boot/UFS"),
    (0xCD, "CD-ROM"),
];

fn fdisk_type_name(part_type: u8) -> Option<&'static str> {
    FDISK_TYPE_NAMES
        .iter()
        .find(|(t, _)| *t == part_type)
        .map(|(_, name)| *name)
}

/// Render the description line shown in the volume menu.
///
/// Preference order: label file, filesystem label, well-known partition
/// type name, partition map type string, raw type byte. With `verbose` the
/// line is prefixed by the `hd(unit, part)` device string.
pub fn describe_volume(vol: &Volume, verbose: bool) -> ArrayString<VOL_DESC_LEN> {
    let mut out = ArrayString::new();
    if verbose {
        let _ = write!(out, "hd({},{}) ", vol.unit(), vol.part_no);
    }

    let body = if !vol.alt_label.is_empty() {
        vol.alt_label.as_str()
    } else if !vol.label.is_empty() {
        vol.label.as_str()
    } else if let Some(name) = fdisk_type_name(vol.part_type) {
        name
    } else if !vol.type_name.is_empty() {
        vol.type_name.as_str()
    } else {
        ""
    };

    if body.is_empty() {
        let _ = write!(out, "TYPE {:02X}", vol.part_type);
    } else {
        for c in body.chars() {
            if out.try_push(c).is_err() {
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk(device: u32, part_no: u32, flags: VolumeFlags) -> Volume {
        let mut v = Volume::new(device, part_no, 0, PartScheme::Fdisk);
        v.flags = flags;
        v
    }

    #[test]
    fn test_arena_recycles_slots() {
        let mut arena = VolumeArena::new();
        let a = arena.insert(mk(0x80, 1, VolumeFlags::empty()));
        let b = arena.insert(mk(0x80, 2, VolumeFlags::empty()));
        assert_ne!(a, b);
        arena.remove(a);
        assert_eq!(arena.live_count(), 1);
        let c = arena.insert(mk(0x81, 1, VolumeFlags::empty()));
        assert_eq!(a.index(), c.index());
        assert_eq!(arena.get(c).device, 0x81);
    }

    #[test]
    fn test_map_orders_newest_first() {
        let mut arena = VolumeArena::new();
        let mut map = VolumeMap::new(0x80);
        let first = arena.insert(mk(0x80, 1, VolumeFlags::NATIVE_BOOT));
        let second = arena.insert(mk(0x80, 2, VolumeFlags::NATIVE_BOOT));
        map.link(first);
        map.link(second);
        assert_eq!(map.ids(), &[second, first]);
    }

    #[test]
    fn test_filter_masks_and_device_window() {
        let native = mk(0x80, 1, VolumeFlags::NATIVE_BOOT | VolumeFlags::SYSTEM_VOLUME);
        let foreign = mk(0x80, 2, VolumeFlags::FOREIGN_BOOT);
        let hidden_dev = mk(0x82, 1, VolumeFlags::SYSTEM_VOLUME);

        let filter = ChainFilter {
            min_device: 0x80,
            max_device: 0x81,
            allow: VolumeFlags::SYSTEM_VOLUME | VolumeFlags::FOREIGN_BOOT,
            deny: VolumeFlags::EFI_SYSTEM,
            hide_list: None,
        };
        assert!(filter.admits(&native));
        assert!(filter.admits(&foreign));
        assert!(!filter.admits(&hidden_dev), "outside device window");

        let mut efi = native.clone();
        efi.flags |= VolumeFlags::EFI_SYSTEM;
        assert!(!filter.admits(&efi), "deny mask wins");

        let open = ChainFilter {
            allow: VolumeFlags::empty(),
            deny: VolumeFlags::empty(),
            ..filter
        };
        assert!(open.admits(&native), "zero masks admit everything in range");
    }

    #[test]
    fn test_hide_list_suppresses_foreign_only() {
        let filter = ChainFilter {
            min_device: 0,
            max_device: 0xFF,
            allow: VolumeFlags::empty(),
            deny: VolumeFlags::empty(),
            hide_list: Some("hd(0,2) hd(1,1)"),
        };
        let foreign = mk(0x80, 2, VolumeFlags::FOREIGN_BOOT);
        assert!(!filter.admits(&foreign));

        // The list only applies to chain-loaded volumes.
        let native = mk(0x80, 2, VolumeFlags::NATIVE_BOOT);
        assert!(filter.admits(&native));

        let other = mk(0x80, 3, VolumeFlags::FOREIGN_BOOT);
        assert!(filter.admits(&other));
    }

    #[test]
    fn test_filtered_chain_preserves_order_and_counts() {
        let mut arena = VolumeArena::new();
        let mut map = VolumeMap::new(0x80);
        let a = arena.insert(mk(0x80, 1, VolumeFlags::SYSTEM_VOLUME));
        let b = arena.insert(mk(0x80, 2, VolumeFlags::empty()));
        let c = arena.insert(mk(0x80, 3, VolumeFlags::SYSTEM_VOLUME));
        map.link(a);
        map.link(b);
        map.link(c);

        let filter = ChainFilter {
            min_device: 0x80,
            max_device: 0xFF,
            allow: VolumeFlags::SYSTEM_VOLUME,
            deny: VolumeFlags::empty(),
            hide_list: None,
        };
        let chain = build_filtered_chain(&[map], &arena, &filter);
        assert_eq!(chain.entries().len(), 3);
        assert_eq!(chain.visible_count(), 2);
        let ids: alloc::vec::Vec<_> = chain.visible_ids().collect();
        assert_eq!(ids, [c, a], "map order (newest first) preserved");
        assert!(!chain.entries()[1].visible);
    }

    #[test]
    fn test_describe_preference_order() {
        let mut v = mk(0x80, 2, VolumeFlags::empty());
        v.part_type = 0x07;
        assert_eq!(describe_volume(&v, false).as_str(), "Windows NTFS");

        let mut label = v.clone();
        label.label.push_str("DATA");
        assert_eq!(describe_volume(&label, false).as_str(), "DATA");

        let mut alt = label.clone();
        alt.alt_label.push_str("Backup Disk");
        assert_eq!(describe_volume(&alt, true).as_str(), "hd(0,2) Backup Disk");

        let mut raw = mk(0x81, 1, VolumeFlags::empty());
        raw.part_type = 0x42;
        assert_eq!(describe_volume(&raw, false).as_str(), "TYPE 42");
    }
}
