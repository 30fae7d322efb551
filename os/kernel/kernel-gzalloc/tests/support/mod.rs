#![allow(dead_code)]

use kernel_gzalloc::{
    Access, GuardAllocator, GuardPlacement, GuardPolicy, Platform, RegionError, RegionManager,
    SizeFilter, Zone,
};
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::any::Any;
use std::collections::BTreeMap;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const PAGE: usize = 4096;
const ARENA_SIZE: usize = 16 * 1024 * 1024;

/// A live mapping handed out by [`HostRegions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub size: usize,
    pub guard: GuardPlacement,
    pub access: Access,
}

#[derive(Default)]
struct HostState {
    next: usize,
    live: BTreeMap<usize, Mapping>,
    released: Vec<usize>,
    ops: usize,
}

/// Region manager over a page-aligned heap arena.
///
/// Addresses are handed out front to back and never reused, so a released
/// mapping stays readable and can be told apart from a live one. Guard pages
/// and protections are recorded, not enforced.
pub struct HostRegions {
    arena: usize,
    layout: Layout,
    state: Mutex<HostState>,
}

impl HostRegions {
    pub fn new() -> Self {
        let layout = Layout::from_size_align(ARENA_SIZE, PAGE).unwrap();
        let arena = unsafe { alloc_zeroed(layout) } as usize;
        assert_ne!(arena, 0);
        Self {
            arena,
            layout,
            state: Mutex::new(HostState {
                next: arena,
                ..HostState::default()
            }),
        }
    }

    /// The live mapping starting at `base`.
    pub fn mapping(&self, base: usize) -> Option<Mapping> {
        self.state.lock().unwrap().live.get(&base).copied()
    }

    pub fn is_released(&self, base: usize) -> bool {
        self.state.lock().unwrap().released.contains(&base)
    }

    /// Released mapping bases, oldest first.
    pub fn released(&self) -> Vec<usize> {
        self.state.lock().unwrap().released.clone()
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    /// Number of allocate, protect and release calls so far.
    pub fn ops(&self) -> usize {
        self.state.lock().unwrap().ops
    }
}

impl Drop for HostRegions {
    fn drop(&mut self) {
        unsafe { dealloc(self.arena as *mut u8, self.layout) };
    }
}

unsafe impl RegionManager for HostRegions {
    fn range(&self) -> Range<usize> {
        self.arena..self.arena + self.layout.size()
    }

    fn allocate(&self, size: usize, guard: GuardPlacement) -> Result<usize, RegionError> {
        let mut state = self.state.lock().unwrap();
        state.ops += 1;
        if size % PAGE != 0 {
            return Err(RegionError::Unaligned {
                start: state.next,
                end: state.next + size,
            });
        }
        if state.next + size > self.range().end {
            return Err(RegionError::OutOfSpace(size));
        }
        let base = state.next;
        state.next += size;
        state.live.insert(
            base,
            Mapping {
                size,
                guard,
                access: Access::ReadWrite,
            },
        );
        Ok(base)
    }

    fn lookup(&self, addr: usize) -> Option<Range<usize>> {
        let state = self.state.lock().unwrap();
        let (&base, mapping) = state.live.range(..=addr).next_back()?;
        (addr < base + mapping.size).then_some(base..base + mapping.size)
    }

    fn protect(&self, range: Range<usize>, access: Access) -> Result<(), RegionError> {
        let mut state = self.state.lock().unwrap();
        state.ops += 1;
        if range.start % PAGE != 0 || range.end % PAGE != 0 {
            return Err(RegionError::Unaligned {
                start: range.start,
                end: range.end,
            });
        }
        let (&base, mapping) = state
            .live
            .range_mut(..=range.start)
            .next_back()
            .ok_or(RegionError::Unmapped(range.start))?;
        if range.end > base + mapping.size {
            return Err(RegionError::Unmapped(range.end));
        }
        mapping.access = access;
        Ok(())
    }

    fn release(&self, base: usize, size: usize) {
        let mut state = self.state.lock().unwrap();
        state.ops += 1;
        let mapping = state
            .live
            .remove(&base)
            .unwrap_or_else(|| panic!("release of unknown mapping {base:#x}"));
        assert_eq!(mapping.size, size, "release size of {base:#x}");
        state.released.push(base);
    }
}

/// Platform whose bootstrap allocator is the host heap.
#[derive(Default)]
pub struct HostPlatform {
    pub preemption_disabled: AtomicBool,
    pub refuse_steal: bool,
}

impl HostPlatform {
    pub fn set_preemption_disabled(&self, disabled: bool) {
        self.preemption_disabled.store(disabled, Ordering::SeqCst);
    }
}

impl Platform for HostPlatform {
    fn preemption_disabled(&self) -> bool {
        self.preemption_disabled.load(Ordering::SeqCst)
    }

    fn steal_memory(&self, size: usize) -> Option<usize> {
        if self.refuse_steal {
            return None;
        }
        let layout = Layout::from_size_align(size, PAGE).ok()?;
        // Leaked on purpose: stolen memory is never returned.
        let addr = unsafe { alloc_zeroed(layout) } as usize;
        (addr != 0).then_some(addr)
    }
}

pub type TestAllocator = GuardAllocator<HostRegions, HostPlatform>;

/// Guard 1024 byte zones, keep 4 freed elements per zone.
pub fn policy() -> GuardPolicy {
    GuardPolicy {
        enabled: true,
        size_filter: SizeFilter::exact(1024),
        cache_capacity: 4,
        reserve_size: 256 * 1024,
        ..GuardPolicy::default()
    }
}

/// An allocator before the region manager came online.
pub fn early_allocator_with(policy: GuardPolicy) -> TestAllocator {
    GuardAllocator::new(policy, HostRegions::new(), HostPlatform::default())
}

pub fn allocator_with(policy: GuardPolicy) -> TestAllocator {
    let gz = early_allocator_with(policy);
    gz.mark_vm_ready();
    gz
}

pub fn allocator() -> TestAllocator {
    allocator_with(policy())
}

pub fn early_allocator() -> TestAllocator {
    early_allocator_with(policy())
}

/// Create a zone and register it; it must end up tracked.
pub fn tracked_zone(gz: &TestAllocator, name: &str, elem_size: u32) -> Arc<Zone> {
    let zone = Arc::new(Zone::new(name, elem_size));
    gz.on_zone_created(&zone);
    assert!(zone.is_tracked(), "zone {name} should be tracked");
    zone
}

/// Base of the mapping that holds the element at `user`.
pub fn base_of(gz: &TestAllocator, zone: &Zone, user: *mut u8) -> usize {
    gz.policy().layout(zone.elem_size()).base_of(user as usize)
}

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        String::from("<non-string panic payload>")
    }
}

/// Run `f`, which must halt, and return the diagnostic.
pub fn expect_fatal(f: impl FnOnce()) -> String {
    let payload = panic::catch_unwind(AssertUnwindSafe(f)).expect_err("expected a fatal halt");
    panic_message(payload.as_ref())
}
