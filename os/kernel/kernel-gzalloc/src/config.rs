//! # Guard Policy
//!
//! The boot flags are read exactly once, when the allocator is configured,
//! and folded into an immutable [`GuardPolicy`]. The rules are applied in a
//! fixed order; a later rule overrides whatever an earlier one set:
//!
//! | flag                      | effect                                          |
//! |---------------------------|-------------------------------------------------|
//! | `-gzalloc_mode`           | enable, sizes `1024 ..= u32::MAX`               |
//! | `gzalloc_min=N`           | enable, sizes `N ..= u32::MAX`                  |
//! | `gzalloc_max=N`           | enable, upper bound `N` (lower bound 0 if unset)|
//! | `gzalloc_size=N`          | enable, exactly `N`                             |
//! | `gzalloc_fc_size=N`       | eviction cache capacity                         |
//! | `-gzalloc_wp`             | write-protect cached elements                   |
//! | `-gzalloc_unmap`          | release on free, no eviction cache              |
//! | `-gzalloc_uf_mode`        | guard page before the element                   |
//! | `-gzalloc_no_dfree_check` | skip the double-free scan                       |
//! | `gzalloc_zscale=N`        | guard submap size multiplier                    |
//! | `-gzalloc_noconsistency`  | skip header and fill-pattern checks             |
//! | `gzname=NAME`             | enable, additionally track the zone `NAME`      |
//! | (debug builds)            | if still disabled: size 1024 and `pmap`, `wp`   |
//! | `-nogzalloc_mode`         | disable, whatever came before                   |

use crate::boot_args::{BootArgs, BootFlags};
use crate::layout::{BoundaryMode, ElementLayout};
use crate::region::Access;
use crate::reserve::RESERVE_SIZE_DEFAULT;
use crate::zone::matches_boot_name;
use alloc::string::{String, ToString};

/// Names of the recognized boot flags.
pub mod flags {
    pub const MODE: &str = "-gzalloc_mode";
    pub const NO_MODE: &str = "-nogzalloc_mode";
    pub const MIN: &str = "gzalloc_min";
    pub const MAX: &str = "gzalloc_max";
    pub const SIZE: &str = "gzalloc_size";
    pub const CACHE_SIZE: &str = "gzalloc_fc_size";
    pub const WRITE_PROTECT: &str = "-gzalloc_wp";
    pub const UNMAP: &str = "-gzalloc_unmap";
    pub const UNDERFLOW: &str = "-gzalloc_uf_mode";
    pub const NO_DOUBLE_FREE_CHECK: &str = "-gzalloc_no_dfree_check";
    pub const ZONEMAP_SCALE: &str = "gzalloc_zscale";
    pub const NO_CONSISTENCY: &str = "-gzalloc_noconsistency";
    pub const ZONE_NAME: &str = "gzname";
}

/// Lower size bound selected by `-gzalloc_mode`.
pub const MIN_DEFAULT: u32 = 1024;

/// Default number of freed elements kept mapped per zone.
pub const CACHE_CAPACITY_DEFAULT: u32 = 1536;

/// Byte painted into the slack of every guarded element.
pub const FILL_BYTE_DEFAULT: u8 = 0x67;

/// Zone selected by name in debug builds when nothing else enabled guarding.
const DEBUG_ZONE: &str = "pmap";

/// Inclusive element size range. The empty range matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeFilter {
    pub min: u32,
    pub max: u32,
}

impl SizeFilter {
    pub const EMPTY: Self = Self {
        min: u32::MAX,
        max: 0,
    };

    #[must_use]
    pub const fn exact(size: u32) -> Self {
        Self {
            min: size,
            max: size,
        }
    }

    #[must_use]
    pub const fn contains(&self, elem_size: u32) -> bool {
        self.min <= elem_size && elem_size <= self.max
    }
}

impl Default for SizeFilter {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// What happens to the pages of a freed element.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionMode {
    /// Cached and made inaccessible.
    #[default]
    Inaccessible,
    /// Cached and made read-only.
    WriteProtect,
    /// Released immediately; no eviction cache.
    Unmap,
}

impl ProtectionMode {
    /// Protection applied to cached elements, `None` if nothing is cached.
    #[must_use]
    pub const fn access(self) -> Option<Access> {
        match self {
            Self::Inaccessible => Some(Access::None),
            Self::WriteProtect => Some(Access::Read),
            Self::Unmap => None,
        }
    }
}

/// Resolved guard configuration. Immutable once the allocator owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardPolicy {
    pub enabled: bool,
    pub size_filter: SizeFilter,
    /// Zone tracked regardless of its element size.
    pub named_zone: Option<String>,
    pub cache_capacity: u32,
    pub protection_mode: ProtectionMode,
    pub boundary_mode: BoundaryMode,
    pub consistency_checks: bool,
    pub double_free_checks: bool,
    pub fill_byte: u8,
    pub zonemap_scale: u32,
    /// Bytes stolen for the early reserve.
    pub reserve_size: usize,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            size_filter: SizeFilter::EMPTY,
            named_zone: None,
            cache_capacity: CACHE_CAPACITY_DEFAULT,
            protection_mode: ProtectionMode::Inaccessible,
            boundary_mode: BoundaryMode::Overflow,
            consistency_checks: true,
            double_free_checks: true,
            fill_byte: FILL_BYTE_DEFAULT,
            zonemap_scale: 1,
            reserve_size: RESERVE_SIZE_DEFAULT,
        }
    }
}

impl GuardPolicy {
    /// Resolve the policy from boot flags.
    ///
    /// `debug_defaults` enables guarding of 1024 byte zones and of the `pmap`
    /// zone (write-protected) when no flag enabled guarding explicitly.
    pub fn resolve(args: &impl BootFlags, debug_defaults: bool) -> Self {
        let mut policy = Self::default();

        if args.present(flags::MODE) {
            policy.enabled = true;
            policy.size_filter = SizeFilter {
                min: MIN_DEFAULT,
                max: u32::MAX,
            };
        }

        if let Some(min) = args.number(flags::MIN) {
            policy.enabled = true;
            policy.size_filter = SizeFilter { min, max: u32::MAX };
        }

        if let Some(max) = args.number(flags::MAX) {
            policy.enabled = true;
            policy.size_filter.max = max;
            if policy.size_filter.min == u32::MAX {
                policy.size_filter.min = 0;
            }
        }

        if let Some(size) = args.number(flags::SIZE) {
            policy.enabled = true;
            policy.size_filter = SizeFilter::exact(size);
        }

        if let Some(capacity) = args.number(flags::CACHE_SIZE) {
            policy.cache_capacity = capacity;
        }

        if args.present(flags::WRITE_PROTECT) {
            policy.protection_mode = ProtectionMode::WriteProtect;
        }

        if args.present(flags::UNMAP) {
            policy.protection_mode = ProtectionMode::Unmap;
        }

        if args.present(flags::UNDERFLOW) {
            policy.boundary_mode = BoundaryMode::Underflow;
        }

        if args.present(flags::NO_DOUBLE_FREE_CHECK) {
            policy.double_free_checks = false;
        }

        if let Some(scale) = args.number(flags::ZONEMAP_SCALE) {
            policy.zonemap_scale = scale;
        }

        if args.present(flags::NO_CONSISTENCY) {
            policy.consistency_checks = false;
        }

        if let Some(name) = args.string(flags::ZONE_NAME).filter(|n| !n.is_empty()) {
            policy.enabled = true;
            policy.named_zone = Some(name.to_string());
        }

        if debug_defaults && !policy.enabled {
            policy.enabled = true;
            policy.size_filter = SizeFilter::exact(MIN_DEFAULT);
            policy.named_zone = Some(DEBUG_ZONE.to_string());
            policy.protection_mode = ProtectionMode::WriteProtect;
        }

        if args.present(flags::NO_MODE) {
            policy.enabled = false;
        }

        policy
    }

    /// Resolve the policy from a kernel command line, with the debug defaults
    /// of the current build profile.
    pub fn from_boot_args(command_line: &str) -> Self {
        Self::resolve(&BootArgs::new(command_line), cfg!(debug_assertions))
    }

    /// Whether a zone with this name and element size is guarded.
    #[must_use]
    pub fn tracks(&self, zone_name: &str, elem_size: u32) -> bool {
        if !self.enabled {
            return false;
        }
        let named = self
            .named_zone
            .as_deref()
            .is_some_and(|wanted| matches_boot_name(zone_name, wanted));
        named || self.size_filter.contains(elem_size)
    }

    /// Whether freed elements are parked in a per-zone eviction cache.
    #[must_use]
    pub const fn uses_cache(&self) -> bool {
        self.cache_capacity > 0 && self.protection_mode.access().is_some()
    }

    /// Whether the free path scans the eviction cache for the element.
    #[must_use]
    pub const fn checks_double_free(&self) -> bool {
        self.uses_cache() && self.double_free_checks
    }

    /// Size of the guard submap for a zone map of `zone_map_size` bytes.
    #[must_use]
    pub const fn map_size(&self, zone_map_size: usize) -> usize {
        zone_map_size.saturating_mul(self.zonemap_scale as usize)
    }

    /// Layout of guarded elements of `elem_size` bytes.
    #[must_use]
    pub const fn layout(&self, elem_size: u32) -> ElementLayout {
        ElementLayout::new(self.boundary_mode, elem_size as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(line: &str) -> GuardPolicy {
        GuardPolicy::resolve(&BootArgs::new(line), false)
    }

    #[test]
    fn nothing_given_stays_disabled() {
        let p = resolve("");
        assert_eq!(p, GuardPolicy::default());
        assert!(!p.tracks("kalloc.1024", 1024));
    }

    #[test]
    fn mode_flag_tracks_from_1024_up() {
        let p = resolve("-gzalloc_mode");
        assert!(p.enabled);
        assert_eq!(p.size_filter, SizeFilter { min: 1024, max: u32::MAX });
        assert!(p.tracks("a", 1024));
        assert!(p.tracks("a", 65536));
        assert!(!p.tracks("a", 1023));
    }

    #[test]
    fn min_only() {
        let p = resolve("gzalloc_min=512");
        assert!(p.enabled);
        assert_eq!(p.size_filter, SizeFilter { min: 512, max: u32::MAX });
    }

    #[test]
    fn max_only_starts_at_zero() {
        let p = resolve("gzalloc_max=256");
        assert!(p.enabled);
        assert_eq!(p.size_filter, SizeFilter { min: 0, max: 256 });
        assert!(p.tracks("a", 16));
        assert!(!p.tracks("a", 512));
    }

    #[test]
    fn min_and_max_form_a_range() {
        let p = resolve("gzalloc_max=2048 gzalloc_min=512");
        assert_eq!(p.size_filter, SizeFilter { min: 512, max: 2048 });
    }

    #[test]
    fn size_overrides_min_and_max() {
        let p = resolve("gzalloc_min=16 gzalloc_max=4096 gzalloc_size=128");
        assert_eq!(p.size_filter, SizeFilter::exact(128));
        assert!(p.tracks("a", 128));
        assert!(!p.tracks("a", 129));
    }

    #[test]
    fn tuning_flags() {
        let p = resolve(
            "-gzalloc_mode gzalloc_fc_size=8 -gzalloc_wp -gzalloc_uf_mode \
             -gzalloc_no_dfree_check gzalloc_zscale=4 -gzalloc_noconsistency",
        );
        assert_eq!(p.cache_capacity, 8);
        assert_eq!(p.protection_mode, ProtectionMode::WriteProtect);
        assert_eq!(p.boundary_mode, BoundaryMode::Underflow);
        assert!(!p.double_free_checks);
        assert!(!p.consistency_checks);
        assert_eq!(p.zonemap_scale, 4);
        assert_eq!(p.map_size(0x10_0000), 0x40_0000);
    }

    #[test]
    fn tuning_flags_alone_do_not_enable() {
        let p = resolve("gzalloc_fc_size=8 -gzalloc_wp");
        assert!(!p.enabled);
    }

    #[test]
    fn unmap_beats_write_protect() {
        let p = resolve("-gzalloc_mode -gzalloc_wp -gzalloc_unmap");
        assert_eq!(p.protection_mode, ProtectionMode::Unmap);
        assert!(!p.uses_cache());
        assert!(!p.checks_double_free());
    }

    #[test]
    fn zero_capacity_disables_cache() {
        let p = resolve("-gzalloc_mode gzalloc_fc_size=0");
        assert!(!p.uses_cache());
        assert!(!p.checks_double_free());
        assert!(resolve("-gzalloc_mode").checks_double_free());
    }

    #[test]
    fn named_zone_is_tracked_regardless_of_size() {
        let p = resolve("gzname=vm.objects");
        assert!(p.enabled);
        assert_eq!(p.size_filter, SizeFilter::EMPTY);
        assert!(p.tracks("vm objects", 256));
        assert!(!p.tracks("vm pages", 256));
    }

    #[test]
    fn empty_name_is_ignored() {
        let p = resolve("gzname=");
        assert!(!p.enabled);
        assert_eq!(p.named_zone, None);
    }

    #[test]
    fn debug_defaults_only_when_nothing_enabled() {
        let p = GuardPolicy::resolve(&BootArgs::new(""), true);
        assert!(p.enabled);
        assert_eq!(p.size_filter, SizeFilter::exact(1024));
        assert_eq!(p.named_zone.as_deref(), Some("pmap"));
        assert_eq!(p.protection_mode, ProtectionMode::WriteProtect);
        assert!(p.tracks("pmap", 208));

        let p = GuardPolicy::resolve(&BootArgs::new("gzalloc_size=64"), true);
        assert_eq!(p.size_filter, SizeFilter::exact(64));
        assert_eq!(p.named_zone, None);
        assert_eq!(p.protection_mode, ProtectionMode::Inaccessible);
    }

    #[test]
    fn disable_flag_wins() {
        let p = resolve("-gzalloc_mode gzname=pmap -nogzalloc_mode");
        assert!(!p.enabled);
        assert!(!p.tracks("pmap", 1024));

        let p = GuardPolicy::resolve(&BootArgs::new("-nogzalloc_mode"), true);
        assert!(!p.enabled);
    }

    #[test]
    fn malformed_numbers_are_skipped() {
        let p = resolve("gzalloc_min=big gzalloc_fc_size=0x10");
        assert!(!p.enabled);
        assert_eq!(p.cache_capacity, 16);
    }

    #[test]
    fn layout_follows_boundary_mode() {
        let p = resolve("-gzalloc_mode -gzalloc_uf_mode");
        assert_eq!(p.layout(1024).mode(), BoundaryMode::Underflow);
        assert_eq!(p.layout(1024).elem_size(), 1024);
    }
}
