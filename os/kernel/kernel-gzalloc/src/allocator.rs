//! # Guard Allocator
//!
//! [`GuardAllocator`] owns the resolved [`GuardPolicy`], the region manager
//! backing the guard submap, the early reserve and the cross-zone counters.
//! The zone allocator calls into it at three points:
//!
//! - [`on_zone_created`](GuardAllocator::on_zone_created) once per zone,
//! - [`alloc`](GuardAllocator::alloc) and [`free`](GuardAllocator::free) for
//!   every element of a tracked zone,
//! - [`drain_cache`](GuardAllocator::drain_cache) before a tracked zone is
//!   destroyed.
//!
//! ## Boot phases
//!
//! Until [`mark_vm_ready`](GuardAllocator::mark_vm_ready) is called the region
//! manager is not usable. Elements and cache buffers are then carved from the
//! early reserve instead; such elements get no guard page, are stamped with
//! [`DEAD_ZONE`] and are leaked when freed.

use crate::boot_args::BootFlags;
use crate::cache::FreeCache;
use crate::config::GuardPolicy;
use crate::fatal::{GuardViolation, fatal};
use crate::header::{DEAD_ZONE, ElementHeader};
use crate::layout::{ElementLayout, page_round};
use crate::region::{Platform, RegionManager};
use crate::reserve::EarlyReserve;
use crate::stats::GuardStats;
use crate::sync::SpinLock;
use crate::zone::Zone;
use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use core::mem::size_of;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, Ordering};
use log::{debug, info, trace};

pub struct GuardAllocator<R, P> {
    pub(crate) policy: GuardPolicy,
    pub(crate) regions: R,
    pub(crate) platform: P,
    pub(crate) reserve: SpinLock<EarlyReserve>,
    pub(crate) vm_ready: AtomicBool,
    /// Tracked zones by raw identity, for resolving element headers.
    pub(crate) zones: SpinLock<BTreeMap<u64, Weak<Zone>>>,
    pub(crate) stats: GuardStats,
}

impl<R: RegionManager, P: Platform> GuardAllocator<R, P> {
    /// Take over an already resolved policy.
    ///
    /// If guarding is enabled, `policy.reserve_size` bytes are stolen from the
    /// bootstrap allocator right away. Failing to get them halts.
    pub fn new(policy: GuardPolicy, regions: R, platform: P) -> Self {
        let reserve = if policy.enabled {
            let Some(base) = platform.steal_memory(policy.reserve_size) else {
                fatal(GuardViolation::ReserveUnavailable(policy.reserve_size));
            };
            EarlyReserve::new(base, policy.reserve_size)
        } else {
            EarlyReserve::empty()
        };

        if policy.enabled {
            info!(
                "gzalloc: enabled, sizes {:#x}..={:#x}, zone {:?}, cache {} ({:?}), {:?}, consistency checks {}, double free checks {}",
                policy.size_filter.min,
                policy.size_filter.max,
                policy.named_zone,
                policy.cache_capacity,
                policy.protection_mode,
                policy.boundary_mode,
                policy.consistency_checks,
                policy.double_free_checks,
            );
        } else {
            info!("gzalloc: disabled");
        }

        Self {
            policy,
            regions,
            platform,
            reserve: SpinLock::new(reserve),
            vm_ready: AtomicBool::new(false),
            zones: SpinLock::new(BTreeMap::new()),
            stats: GuardStats::new(),
        }
    }

    /// Resolve the policy from boot flags and take it over.
    pub fn configure(flags: &impl BootFlags, regions: R, platform: P) -> Self {
        Self::new(
            GuardPolicy::resolve(flags, cfg!(debug_assertions)),
            regions,
            platform,
        )
    }

    #[inline]
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.policy.enabled
    }

    #[must_use]
    pub const fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    #[must_use]
    pub const fn regions(&self) -> &R {
        &self.regions
    }

    #[must_use]
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    #[must_use]
    pub const fn stats(&self) -> &GuardStats {
        &self.stats
    }

    /// Bytes left in the early reserve.
    #[must_use]
    pub fn reserve_remaining(&self) -> usize {
        self.reserve.lock().remaining()
    }

    /// The region manager is online; stop carving from the early reserve.
    pub fn mark_vm_ready(&self) {
        self.vm_ready.store(true, Ordering::Release);
        debug!(
            "gzalloc: vm ready, {:#x} reserve bytes unused",
            self.reserve_remaining()
        );
    }

    #[inline]
    #[must_use]
    pub fn is_vm_ready(&self) -> bool {
        self.vm_ready.load(Ordering::Acquire)
    }

    /// Decide whether `zone` is guarded and, if so, give it an eviction cache.
    ///
    /// Only the first call per zone has an effect.
    pub fn on_zone_created(&self, zone: &Arc<Zone>) {
        let tracked = self.policy.tracks(zone.name(), zone.elem_size());
        if !zone.decide_tracking(tracked) || !tracked {
            return;
        }

        if self.policy.uses_cache() {
            let cache = self.new_cache(self.policy.cache_capacity as usize);
            zone.lock().cache = Some(cache);
        }

        let mut zones = self.zones.lock();
        zones.retain(|_, z| z.strong_count() > 0);
        zones.insert(zone.id().get(), Arc::downgrade(zone));
        drop(zones);

        debug!(
            "gzalloc: tracking {} \"{}\" (element size {:#x})",
            zone.id(),
            zone.name(),
            zone.elem_size()
        );
    }

    fn new_cache(&self, capacity: usize) -> FreeCache {
        if self.is_vm_ready() {
            return FreeCache::with_capacity(capacity);
        }
        let bytes = page_round(capacity * size_of::<usize>());
        let addr = self.reserve.lock().carve(bytes);
        // SAFETY: carved reserve memory is page aligned, writable and never handed out again.
        unsafe { FreeCache::from_reserve(addr, capacity) }
    }

    /// The live tracked zone with raw identity `id`.
    pub(crate) fn tracked_zone(&self, id: u64) -> Option<Arc<Zone>> {
        self.zones
            .lock()
            .get(&id)
            .and_then(Weak::upgrade)
            .filter(|z| z.is_tracked())
    }

    /// Allocate one guarded element of `zone`.
    ///
    /// Returns `None` only when the calling context runs with preemption
    /// disabled and `allow_block` is not set. Every other failure halts.
    ///
    /// # Panics
    /// `zone` is not tracked; the caller is responsible for checking.
    pub fn alloc(&self, zone: &Zone, allow_block: bool) -> Option<NonNull<u8>> {
        assert!(zone.is_tracked(), "gzalloc: alloc from untracked zone {}", zone.name());

        if self.platform.preemption_disabled() {
            if !allow_block {
                return None;
            }
            self.stats.record_preempt_disabled_alloc();
        }

        let layout = self.policy.layout(zone.elem_size());
        let vm_ready = self.is_vm_ready();
        let base = if vm_ready {
            self.regions
                .allocate(layout.mapping_size(), layout.mode().guard_placement())
                .unwrap_or_else(|source| {
                    fatal(GuardViolation::Region {
                        op: "allocate",
                        addr: 0,
                        source,
                    })
                })
        } else {
            let base = self.reserve.lock().carve(layout.mapping_size());
            self.stats.record_early_alloc(&layout);
            base
        };
        let owner = if vm_ready { zone.id().get() } else { DEAD_ZONE };

        // SAFETY: `base .. base + mapping_size` was just obtained, is writable
        // apart from the guard page, and is not shared with anyone yet.
        unsafe { self.stamp(&layout, base, ElementHeader::new(owner, zone.elem_size())) };

        {
            let mut state = zone.lock();
            let counters = &mut state.counters;
            counters.elems_free -= 1;
            counters.wired_cur += 1;
            if vm_ready {
                counters.va_cur += 1;
            }
            counters.mem_allocated += layout.rounded_size() as u64;
        }
        self.stats.record_alloc(&layout);

        let user = layout.user_addr(base);
        trace!("gzalloc: alloc {user:#x} (mapping {base:#x}) from {}", zone.name());
        NonNull::new(user as *mut u8)
    }

    /// Zero the data pages, paint the slack and write the header(s).
    ///
    /// # Safety
    /// The data pages of the mapping at `base` must be writable.
    unsafe fn stamp(&self, layout: &ElementLayout, base: usize, header: ElementHeader) {
        let data = layout.data_start(base);
        let slack = layout.slack(base);
        unsafe {
            ptr::write_bytes(data as *mut u8, 0, layout.rounded_size());
            ptr::write_bytes(slack.start as *mut u8, self.policy.fill_byte, slack.len());
            header.write(layout.header_addr(base));
            if let Some(copy) = layout.header_copy_addr(base) {
                header.write(copy);
            }
        }
    }
}
