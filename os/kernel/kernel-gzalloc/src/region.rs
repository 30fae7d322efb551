//! Interfaces to the virtual memory layer and the platform.

use core::ops::Range;

/// Side of a fresh mapping that receives the guard page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPlacement {
    First,
    Last,
}

/// Page protection requested for a cached (freed) element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    None,
    Read,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegionError {
    #[error("out of address space for {0:#x} bytes")]
    OutOfSpace(usize),
    #[error("no mapping at {0:#x}")]
    Unmapped(usize),
    #[error("range {start:#x}..{end:#x} is not page aligned")]
    Unaligned { start: usize, end: usize },
}

/// Page-granular region manager backing the guard submap.
///
/// # Safety
/// Implementors guarantee that
/// - [`allocate`](Self::allocate) returns a page-aligned, zero-filled,
///   readable and writable mapping of exactly `size` bytes, apart from the
///   guard page, that stays mapped until [`release`](Self::release);
/// - [`lookup`](Self::lookup) only returns ranges of such mappings.
pub unsafe trait RegionManager {
    /// Address range registered for the guard submap.
    fn range(&self) -> Range<usize>;

    #[inline]
    fn contains(&self, addr: usize) -> bool {
        self.range().contains(&addr)
    }

    /// Map `size` zeroed bytes with one guard page at the `guard` end.
    ///
    /// # Errors
    /// The submap cannot satisfy the request.
    fn allocate(&self, size: usize, guard: GuardPlacement) -> Result<usize, RegionError>;

    /// The mapping that contains `addr`, guard page included.
    fn lookup(&self, addr: usize) -> Option<Range<usize>>;

    /// Change the protection of `range`.
    ///
    /// # Errors
    /// `range` is not (part of) a live mapping.
    fn protect(&self, range: Range<usize>, access: Access) -> Result<(), RegionError>;

    /// Unmap a mapping previously returned by [`allocate`](Self::allocate).
    fn release(&self, base: usize, size: usize);
}

/// Execution context and boot services the guard paths depend on.
pub trait Platform {
    /// Whether the current thread runs with preemption disabled, i.e. must not block.
    fn preemption_disabled(&self) -> bool;

    /// Take `size` bytes from the bootstrap allocator that runs before the
    /// region manager exists. The memory is page aligned and never returned.
    fn steal_memory(&self, size: usize) -> Option<usize>;
}
