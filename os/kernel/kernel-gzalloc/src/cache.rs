//! Per-zone eviction cache.
//!
//! A ring of the most recently freed mapping bases. Freed elements stay mapped
//! (and protected) while they sit in the ring; inserting into a full ring
//! evicts the oldest entry, which is then released for real. Empty slots hold
//! `0`.

use alloc::boxed::Box;
use alloc::vec;
use core::mem;

enum Slots {
    /// Carved from the early reserve; lives for the rest of the boot.
    Reserved(&'static mut [usize]),
    Heap(Box<[usize]>),
}

pub struct FreeCache {
    slots: Slots,
    cursor: usize,
}

impl FreeCache {
    /// A zeroed cache on the kernel heap.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Slots::Heap(vec![0; capacity].into_boxed_slice()),
            cursor: 0,
        }
    }

    /// A zeroed cache placed at `addr`.
    ///
    /// # Safety
    /// `addr` must be aligned for `usize`, and `addr .. addr + capacity * size_of::<usize>()`
    /// must be writable memory that is never handed out again.
    #[must_use]
    pub unsafe fn from_reserve(addr: usize, capacity: usize) -> Self {
        let slots = unsafe { core::slice::from_raw_parts_mut(addr as *mut usize, capacity) };
        slots.fill(0);
        Self {
            slots: Slots::Reserved(slots),
            cursor: 0,
        }
    }

    fn slots(&self) -> &[usize] {
        match &self.slots {
            Slots::Reserved(s) => &s[..],
            Slots::Heap(s) => &s[..],
        }
    }

    fn slots_mut(&mut self) -> &mut [usize] {
        match &mut self.slots {
            Slots::Reserved(s) => &mut s[..],
            Slots::Heap(s) => &mut s[..],
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots().len()
    }

    /// Slot the next insertion lands in (before wrapping).
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots().iter().filter(|&&a| a != 0).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, base: usize) -> bool {
        self.position(base).is_some()
    }

    /// Slot index holding `base`.
    #[must_use]
    pub fn position(&self, base: usize) -> Option<usize> {
        if base == 0 {
            return None;
        }
        self.slots().iter().position(|&a| a == base)
    }

    /// Cache `base` and return the address it displaced, if any.
    ///
    /// A zero-capacity cache displaces `base` itself.
    pub fn insert(&mut self, base: usize) -> Option<usize> {
        let capacity = self.capacity();
        if capacity == 0 {
            return Some(base);
        }
        if self.cursor >= capacity {
            self.cursor = 0;
        }
        let cursor = self.cursor;
        let evicted = mem::replace(&mut self.slots_mut()[cursor], base);
        self.cursor += 1;
        (evicted != 0).then_some(evicted)
    }

    /// Copy every slot into `scratch`, then empty the cache.
    pub fn drain_into(&mut self, scratch: &mut [usize]) {
        for (dst, src) in scratch.iter_mut().zip(self.slots_mut().iter_mut()) {
            *dst = mem::take(src);
        }
        self.slots_mut().fill(0);
        self.cursor = 0;
    }
}
