mod support;

use kernel_gzalloc::header::{ElementHeader, HEADER_SIZE};
use kernel_gzalloc::{
    BootArgs, BoundaryMode, GuardAllocator, GuardPolicy, ProtectionMode, RegionManager,
};
use support::{
    HostPlatform, HostRegions, PAGE, early_allocator, early_allocator_with, expect_fatal, policy,
    tracked_zone,
};

const RESERVE: usize = 256 * 1024;

#[test]
fn reserve_is_stolen_when_enabled() {
    let gz = early_allocator();
    assert!(gz.is_enabled());
    assert!(!gz.is_vm_ready());
    assert_eq!(gz.reserve_remaining(), RESERVE);
}

#[test]
fn early_cache_is_carved_from_the_reserve() {
    let gz = early_allocator();
    let zone = tracked_zone(&gz, "kalloc.1024", 1024);
    // Four slots round up to a full page.
    assert_eq!(gz.reserve_remaining(), RESERVE - PAGE);
    assert_eq!(zone.lock().cache().unwrap().capacity(), 4);

    gz.mark_vm_ready();
    let late = tracked_zone(&gz, "late.1024", 1024);
    assert_eq!(gz.reserve_remaining(), RESERVE - PAGE);
    assert_eq!(late.lock().cache().unwrap().capacity(), 4);
}

#[test]
fn early_allocations_come_from_the_reserve_without_a_guard_page() {
    let gz = early_allocator();
    let zone = tracked_zone(&gz, "kalloc.1024", 1024);
    let before = gz.reserve_remaining();

    let p = gz.alloc(&zone, true).unwrap();

    // Element plus the page that would have been the guard.
    assert_eq!(gz.reserve_remaining(), before - 2 * PAGE);
    assert_eq!(gz.regions().ops(), 0);
    assert!(!gz.regions().contains(p.as_ptr() as usize));
    assert!(gz.introspect(p.as_ptr()).is_none());

    let header = unsafe { ElementHeader::read(p.as_ptr() as usize - HEADER_SIZE) };
    assert!(header.is_signed());
    assert!(header.is_dead_zone());
    assert_eq!(header.size, 1024);

    let s = gz.stats().snapshot();
    assert_eq!((s.early_alloc, s.allocated, s.wasted), (4096, 4096, 3072));
    let c = zone.counters();
    assert_eq!((c.elems_free, c.wired_cur, c.va_cur), (-1, 1, 0));

    unsafe { std::ptr::write_bytes(p.as_ptr(), 0x5a, 1024) };
}

#[test]
fn early_frees_are_leaked() {
    let gz = early_allocator();
    let zone = tracked_zone(&gz, "kalloc.1024", 1024);
    let p = gz.alloc(&zone, true).unwrap();

    unsafe { gz.free(&zone, p) };

    let s = gz.stats().snapshot();
    assert_eq!((s.early_free, s.freed), (4096, 0));
    assert!(zone.lock().cache().unwrap().is_empty());
    assert_eq!(zone.counters().wired_cur, 1);
    assert_eq!(gz.regions().ops(), 0);
}

#[test]
fn early_elements_freed_after_vm_ready_are_still_leaked() {
    let gz = early_allocator();
    let zone = tracked_zone(&gz, "kalloc.1024", 1024);
    let early = gz.alloc(&zone, true).unwrap();

    gz.mark_vm_ready();
    let late = gz.alloc(&zone, true).unwrap();

    unsafe {
        gz.free(&zone, early);
        gz.free(&zone, late);
    }

    let s = gz.stats().snapshot();
    assert_eq!(s.early_free, 4096);
    let cache = zone.lock();
    assert_eq!(cache.cache().unwrap().len(), 1);
    assert!(!cache.cache().unwrap().contains(early.as_ptr() as usize - 3072));
}

#[test]
fn early_underflow_elements_keep_their_layout() {
    let gz = early_allocator_with(GuardPolicy {
        boundary_mode: BoundaryMode::Underflow,
        ..policy()
    });
    let zone = tracked_zone(&gz, "kalloc.1024", 1024);
    let p = gz.alloc(&zone, true).unwrap();
    let user = p.as_ptr() as usize;

    let footer = unsafe { ElementHeader::read(user + 1024) };
    let copy = unsafe { ElementHeader::read(user + PAGE - HEADER_SIZE) };
    assert_eq!(footer, copy);
    assert!(footer.is_dead_zone());

    unsafe { gz.free(&zone, p) };
    assert_eq!(gz.stats().snapshot().early_free, 4096);
}

#[test]
fn reserve_exhaustion_halts() {
    let gz = early_allocator_with(GuardPolicy {
        reserve_size: 4 * PAGE,
        ..policy()
    });
    let zone = tracked_zone(&gz, "kalloc.1024", 1024);
    let _first = gz.alloc(&zone, true).unwrap();
    assert_eq!(gz.reserve_remaining(), PAGE);

    let msg = expect_fatal(|| {
        let _ = gz.alloc(&zone, true);
    });
    assert!(msg.contains("reserve exhausted"), "{msg}");
    // The reserve lock was released on the way out.
    assert_eq!(gz.reserve_remaining(), PAGE);
}

#[test]
fn early_cache_larger_than_the_reserve_halts() {
    let gz = early_allocator_with(GuardPolicy {
        cache_capacity: 1536,
        reserve_size: 2 * PAGE,
        ..policy()
    });
    let msg = expect_fatal(|| {
        tracked_zone(&gz, "kalloc.1024", 1024);
    });
    assert!(msg.contains("reserve exhausted"), "{msg}");
}

#[test]
fn failing_to_steal_the_reserve_halts() {
    let platform = HostPlatform {
        refuse_steal: true,
        ..HostPlatform::default()
    };
    let msg = expect_fatal(|| {
        GuardAllocator::new(policy(), HostRegions::new(), platform);
    });
    assert!(msg.contains("unable to steal"), "{msg}");
}

#[test]
fn disabled_guarding_steals_nothing() {
    let platform = HostPlatform {
        refuse_steal: true,
        ..HostPlatform::default()
    };
    let gz = GuardAllocator::new(GuardPolicy::default(), HostRegions::new(), platform);
    assert!(!gz.is_enabled());
    assert_eq!(gz.reserve_remaining(), 0);
}

#[test]
fn configured_from_the_command_line() {
    let gz = GuardAllocator::configure(
        &BootArgs::new("gzalloc_size=1024 gzalloc_fc_size=2 -gzalloc_wp"),
        HostRegions::new(),
        HostPlatform::default(),
    );
    assert!(gz.is_enabled());
    assert_eq!(gz.policy().cache_capacity, 2);
    assert_eq!(gz.policy().protection_mode, ProtectionMode::WriteProtect);

    let gz = GuardAllocator::configure(
        &BootArgs::new("gzalloc_size=1024 -nogzalloc_mode"),
        HostRegions::new(),
        HostPlatform::default(),
    );
    assert!(!gz.is_enabled());
}
