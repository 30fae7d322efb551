//! # Guarded Free Path
//!
//! Validation runs front to back and halts at the first violation:
//!
//! 1. the mapping base derived from the pointer is page aligned,
//! 2. the mapping is not sitting in the zone's eviction cache (double free),
//! 3. the header is signed, names this zone and records its element size,
//! 4. every slack byte still holds the fill pattern.
//!
//! A valid element is then retired: early elements are leaked, everything
//! else is protected and parked in the eviction cache, which hands back the
//! oldest cached mapping for release.

use crate::allocator::GuardAllocator;
use crate::fatal::{GuardViolation, fatal};
use crate::header::{ElementHeader, GZALLOC_SIGNATURE};
use crate::layout::{ElementLayout, is_page_aligned};
use crate::region::{Platform, RegionManager};
use crate::zone::Zone;
use alloc::vec;
use core::ptr::NonNull;
use core::slice;
use log::{debug, trace};

impl<R: RegionManager, P: Platform> GuardAllocator<R, P> {
    /// Free a guarded element of `zone`.
    ///
    /// # Safety
    /// `ptr` must have been returned by [`alloc`](Self::alloc) for `zone`
    /// and the element's data pages must still be mapped, unless it was
    /// already freed (which is detected while it is cached).
    ///
    /// # Panics
    /// `zone` is not tracked, or any integrity check fails.
    pub unsafe fn free(&self, zone: &Zone, ptr: NonNull<u8>) {
        assert!(zone.is_tracked(), "gzalloc: free to untracked zone {}", zone.name());

        let layout = self.policy.layout(zone.elem_size());
        let addr = ptr.as_ptr() as usize;
        let base = layout.base_of(addr);

        if !is_page_aligned(base) {
            fatal(GuardViolation::MisalignedBase {
                addr,
                base,
                elem_size: zone.elem_size(),
                zone: zone.name(),
            });
        }

        if self.policy.checks_double_free() {
            self.check_double_free(zone, base);
        }

        // SAFETY: the caller guarantees the data pages are mapped, and the
        // header lies within them for every valid element layout.
        let header = unsafe { ElementHeader::read(layout.header_addr(base)) };

        if self.policy.consistency_checks {
            // SAFETY: as above.
            unsafe { self.check_consistency(zone, &layout, addr, base, &header) };
        }

        if !self.is_vm_ready() || header.is_dead_zone() {
            self.stats.record_early_free(&layout);
            trace!("gzalloc: leaking early element {addr:#x}");
            return;
        }

        if self.platform.preemption_disabled() {
            self.stats.record_preempt_disabled_free();
        }

        let access = self.policy.protection_mode.access();
        let cached = self.policy.uses_cache();
        if let Some(access) = access.filter(|_| cached) {
            let range = base..base + layout.mapping_size();
            if let Err(source) = self.regions.protect(range, access) {
                fatal(GuardViolation::Region {
                    op: "protect",
                    addr: base,
                    source,
                });
            }
        }

        let victim = {
            let mut state = zone.lock();
            let victim = if cached {
                state.cache.as_mut().map_or(Some(base), |c| c.insert(base))
            } else {
                Some(base)
            };
            if victim.is_some() {
                state.counters.elems_free += 1;
                state.counters.wired_cur -= 1;
            }
            state.counters.mem_freed += layout.rounded_size() as u64;
            victim
        };

        if let Some(victim) = victim {
            self.regions.release(victim, layout.mapping_size());
            self.stats.record_release(&layout);
        }

        trace!(
            "gzalloc: free {addr:#x} to {}, released {victim:#x?}",
            zone.name()
        );
    }

    fn check_double_free(&self, zone: &Zone, base: usize) {
        let state = zone.lock();
        let Some(cache) = state.cache() else {
            return;
        };
        if let Some(slot) = cache.position(base) {
            let cursor = cache.cursor();
            drop(state);
            fatal(GuardViolation::DoubleFree {
                base,
                cursor,
                slot,
                zone: zone.name(),
            });
        }
    }

    /// # Safety
    /// The data pages of the mapping at `base` must be readable.
    unsafe fn check_consistency(
        &self,
        zone: &Zone,
        layout: &ElementLayout,
        addr: usize,
        base: usize,
        header: &ElementHeader,
    ) {
        if !header.is_signed() {
            fatal(GuardViolation::SignatureMismatch {
                addr,
                expected: GZALLOC_SIGNATURE,
                found: header.signature,
            });
        }

        if header.zone != zone.id().get() && !header.is_dead_zone() {
            fatal(GuardViolation::ZoneMismatch {
                addr,
                expected: zone.id().get(),
                found: header.zone,
                zone: zone.name(),
            });
        }

        if header.size != zone.elem_size() {
            fatal(GuardViolation::SizeMismatch {
                addr,
                expected: zone.elem_size(),
                found: header.size,
                zone: zone.name(),
            });
        }

        let slack = layout.slack(base);
        // SAFETY: the slack range lies within the readable data pages.
        let bytes = unsafe { slice::from_raw_parts(slack.start as *const u8, slack.len()) };
        let fill = self.policy.fill_byte;
        if let Some(i) = bytes.iter().position(|&b| b != fill) {
            let at = slack.start + i;
            fatal(GuardViolation::FillPattern {
                at,
                offset: at - base,
                addr,
                found: bytes[i],
                expected: fill,
                elem_size: zone.elem_size(),
                zone: zone.name(),
            });
        }
    }

    /// Release every mapping parked in the eviction cache of `zone`.
    ///
    /// The zone lock is dropped while mappings are released; the cache reads
    /// as empty in the meantime. The cache buffer itself stays with the zone.
    ///
    /// # Panics
    /// `zone` is not tracked.
    pub fn drain_cache(&self, zone: &Zone) {
        assert!(zone.is_tracked(), "gzalloc: drain of untracked zone {}", zone.name());

        let capacity = zone.lock().cache().map_or(0, |c| c.capacity());
        if capacity == 0 {
            return;
        }
        let mut scratch = vec![0usize; capacity];

        if let Some(cache) = zone.lock().cache.as_mut() {
            cache.drain_into(&mut scratch);
        }

        let layout = self.policy.layout(zone.elem_size());
        let mut released = 0i64;
        for &base in scratch.iter().filter(|&&a| a != 0) {
            if self.regions.contains(base) {
                self.regions.release(base, layout.mapping_size());
                self.stats.record_release(&layout);
                released += 1;
            }
        }

        {
            let mut state = zone.lock();
            state.counters.elems_free += released;
            state.counters.wired_cur -= released;
        }

        debug!("gzalloc: drained {released} cached elements of {}", zone.name());
    }
}
