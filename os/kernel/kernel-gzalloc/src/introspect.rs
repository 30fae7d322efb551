//! Zone and size lookup for arbitrary addresses inside the guard submap.

use crate::allocator::GuardAllocator;
use crate::fatal::{GuardViolation, fatal};
use crate::header::{ElementHeader, GZALLOC_SIGNATURE, HEADER_SIZE, SIGNATURE_OFFSET};
use crate::layout::{BoundaryMode, PAGE_SIZE};
use crate::region::{Platform, RegionManager};
use crate::zone::Zone;
use alloc::sync::Arc;
use core::mem::size_of;
use core::ops::Range;
use core::ptr;

impl<R: RegionManager, P: Platform> GuardAllocator<R, P> {
    /// Resolve the zone and element size of a guarded address.
    ///
    /// `addr` may point anywhere into a live guarded mapping. Addresses
    /// outside the guard submap, or any address while guarding is disabled,
    /// yield `None`. A mapping without a valid header halts.
    pub fn introspect(&self, addr: *const u8) -> Option<(Arc<Zone>, usize)> {
        let addr = addr as usize;
        if !self.is_enabled() || !self.regions.contains(addr) {
            return None;
        }

        let Some(mapping) = self.regions.lookup(addr) else {
            fatal(GuardViolation::MapEntryMissing(addr));
        };

        let header_addr = match self.policy.boundary_mode {
            BoundaryMode::Underflow => mapping.end - HEADER_SIZE,
            BoundaryMode::Overflow => find_header(&mapping)
                .unwrap_or_else(|| fatal(GuardViolation::SignatureMissing(addr))),
        };

        // SAFETY: `header_addr` lies within the data pages of a live mapping.
        let header = unsafe { ElementHeader::read(header_addr) };
        if !header.is_signed() {
            fatal(GuardViolation::SignatureMismatch {
                addr,
                expected: GZALLOC_SIGNATURE,
                found: header.signature,
            });
        }

        let Some(zone) = self.tracked_zone(header.zone) else {
            fatal(GuardViolation::UntrackedZone {
                addr,
                zone: header.zone,
            });
        };
        let size = zone.elem_size() as usize;
        Some((zone, size))
    }
}

/// Scan the data pages of an overflow-mode mapping for the first signature
/// and step back to the start of its header.
///
/// Headers of odd-sized elements are not word aligned, so the scan moves one
/// byte at a time. The trailing guard page is never touched.
fn find_header(mapping: &Range<usize>) -> Option<usize> {
    let data_end = mapping.end.saturating_sub(PAGE_SIZE);
    (mapping.start + SIGNATURE_OFFSET..data_end.saturating_sub(size_of::<u32>() - 1))
        // SAFETY: the word lies within the data pages of the mapping.
        .find(|&at| unsafe { ptr::read_unaligned(at as *const u32) } == GZALLOC_SIGNATURE)
        .map(|at| at - SIGNATURE_OFFSET)
}
