//! # Zones as seen by the guard overlay
//!
//! The zone allocator owns these records. The overlay only needs a stable
//! identity, the element size, the zone counters, and the zone lock, which it
//! also uses to protect the zone's eviction cache.

use crate::cache::FreeCache;
use crate::sync::{SpinLock, SpinLockGuard};
use alloc::string::String;
use core::fmt;
use core::num::NonZeroU64;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_ZONE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique zone identity, recorded in every element header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ZoneId(NonZeroU64);

impl ZoneId {
    fn next() -> Self {
        let raw = NEXT_ZONE_ID.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone#{}", self.0)
    }
}

/// Zone-local counters, protected by the zone lock.
///
/// `elems_free` and `wired_cur` are signed: guarded elements are taken from
/// the zone's accounting without ever having been on its free list.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ZoneCounters {
    pub elems_free: i64,
    pub wired_cur: i64,
    /// Guarded mappings created through the region manager.
    pub va_cur: u64,
    pub mem_allocated: u64,
    pub mem_freed: u64,
}

/// Everything behind the zone lock.
#[derive(Default)]
pub struct ZoneState {
    pub counters: ZoneCounters,
    pub(crate) cache: Option<FreeCache>,
}

impl ZoneState {
    /// The zone's eviction cache, if the zone is tracked and caching is on.
    #[must_use]
    pub const fn cache(&self) -> Option<&FreeCache> {
        self.cache.as_ref()
    }
}

pub struct Zone {
    id: ZoneId,
    name: String,
    elem_size: u32,
    tracked: AtomicBool,
    decided: AtomicBool,
    state: SpinLock<ZoneState>,
}

impl Zone {
    pub fn new(name: impl Into<String>, elem_size: u32) -> Self {
        Self {
            id: ZoneId::next(),
            name: name.into(),
            elem_size,
            tracked: AtomicBool::new(false),
            decided: AtomicBool::new(false),
            state: SpinLock::new(ZoneState::default()),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ZoneId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn elem_size(&self) -> u32 {
        self.elem_size
    }

    /// Whether every element of this zone goes through the guard paths.
    #[inline]
    #[must_use]
    pub fn is_tracked(&self) -> bool {
        self.tracked.load(Ordering::Acquire)
    }

    /// Take the zone lock.
    pub fn lock(&self) -> SpinLockGuard<'_, ZoneState> {
        self.state.lock()
    }

    #[must_use]
    pub fn counters(&self) -> ZoneCounters {
        self.lock().counters
    }

    /// Record the tracking decision. Only the first call has an effect.
    pub(crate) fn decide_tracking(&self, tracked: bool) -> bool {
        if self.decided.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.tracked.store(tracked, Ordering::Release);
        true
    }
}

impl fmt::Debug for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zone")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("elem_size", &self.elem_size)
            .field("tracked", &self.is_tracked())
            .finish_non_exhaustive()
    }
}

/// Compare a zone name against a name taken from the boot command line.
///
/// Boot arguments cannot carry spaces, so a `.` in `wanted` also matches a
/// space in `zone_name`.
#[must_use]
pub fn matches_boot_name(zone_name: &str, wanted: &str) -> bool {
    zone_name.len() == wanted.len()
        && zone_name
            .bytes()
            .zip(wanted.bytes())
            .all(|(z, w)| z == w || (z == b' ' && w == b'.'))
}
