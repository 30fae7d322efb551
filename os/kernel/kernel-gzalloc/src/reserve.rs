//! # Early Reserve
//!
//! Memory stolen from the bootstrap allocator while guarding is configured.
//! Until the region manager comes online, guarded elements and eviction cache
//! buffers are carved from here, front to back. Nothing is ever returned.

use crate::fatal::{GuardViolation, fatal};

/// Default number of bytes stolen for the reserve.
pub const RESERVE_SIZE_DEFAULT: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EarlyReserve {
    next: usize,
    remaining: usize,
}

impl EarlyReserve {
    /// A reserve with nothing in it; any carve is fatal.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            next: 0,
            remaining: 0,
        }
    }

    /// Take ownership of `size` bytes starting at `base`.
    #[must_use]
    pub const fn new(base: usize, size: usize) -> Self {
        Self {
            next: base,
            remaining: size,
        }
    }

    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.remaining
    }

    /// Hand out the next `size` bytes. Exhaustion halts.
    pub fn carve(&mut self, size: usize) -> usize {
        if self.remaining < size {
            fatal(GuardViolation::ReserveExhausted {
                requested: size,
                remaining: self.remaining,
            });
        }
        let addr = self.next;
        self.next += size;
        self.remaining -= size;
        addr
    }
}
