//! Cross-zone byte and event counters.
//!
//! Each counter is an independent relaxed atomic; no ordering is implied
//! between them and none of them is covered by a zone lock.

use crate::layout::ElementLayout;
use core::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct GuardStats {
    allocated: AtomicU64,
    freed: AtomicU64,
    wasted: AtomicU64,
    early_alloc: AtomicU64,
    early_free: AtomicU64,
    preempt_disabled_allocs: AtomicU64,
    preempt_disabled_frees: AtomicU64,
}

/// Point-in-time copy of [`GuardStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Data-page bytes handed out.
    pub allocated: u64,
    /// Data-page bytes released back to the region manager.
    pub freed: u64,
    /// Residue bytes of all elements not yet released.
    pub wasted: u64,
    /// Data-page bytes carved from the early reserve.
    pub early_alloc: u64,
    /// Data-page bytes of early elements that were freed (and leaked).
    pub early_free: u64,
    pub preempt_disabled_allocs: u64,
    pub preempt_disabled_frees: u64,
}

#[inline]
fn add(counter: &AtomicU64, bytes: usize) {
    counter.fetch_add(bytes as u64, Ordering::Relaxed);
}

impl GuardStats {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allocated: AtomicU64::new(0),
            freed: AtomicU64::new(0),
            wasted: AtomicU64::new(0),
            early_alloc: AtomicU64::new(0),
            early_free: AtomicU64::new(0),
            preempt_disabled_allocs: AtomicU64::new(0),
            preempt_disabled_frees: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_alloc(&self, layout: &ElementLayout) {
        add(&self.allocated, layout.rounded_size());
        add(&self.wasted, layout.residue());
    }

    pub(crate) fn record_release(&self, layout: &ElementLayout) {
        add(&self.freed, layout.rounded_size());
        self.wasted
            .fetch_sub(layout.residue() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_early_alloc(&self, layout: &ElementLayout) {
        add(&self.early_alloc, layout.rounded_size());
    }

    pub(crate) fn record_early_free(&self, layout: &ElementLayout) {
        add(&self.early_free, layout.rounded_size());
    }

    pub(crate) fn record_preempt_disabled_alloc(&self) {
        add(&self.preempt_disabled_allocs, 1);
    }

    pub(crate) fn record_preempt_disabled_free(&self) {
        add(&self.preempt_disabled_frees, 1);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            allocated: self.allocated.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
            wasted: self.wasted.load(Ordering::Relaxed),
            early_alloc: self.early_alloc.load(Ordering::Relaxed),
            early_free: self.early_free.load(Ordering::Relaxed),
            preempt_disabled_allocs: self.preempt_disabled_allocs.load(Ordering::Relaxed),
            preempt_disabled_frees: self.preempt_disabled_frees.load(Ordering::Relaxed),
        }
    }
}
