//! # Element Header
//!
//! Fixed-layout record stamped next to every guarded element. In underflow
//! mode it trails the element (a footer) and is duplicated at the end of the
//! mapping.
//!
//! ```text
//! offset 0        8          12          16
//!        ┌────────┬──────────┬───────────┐
//!        │ zone   │ size     │ signature │
//!        └────────┴──────────┴───────────┘
//! ```
//!
//! The signature is the last field, so a forward word scan that finds it can
//! step back to the start of the header.

use core::mem::{offset_of, size_of};
use core::ptr;

/// Magic value every intact header carries.
pub const GZALLOC_SIGNATURE: u32 = 0xABAD_CAFE;

/// Owner recorded for elements handed out before virtual memory was online.
pub const DEAD_ZONE: u64 = 0xDEAD_201E;

/// Size of [`ElementHeader`] in bytes.
pub const HEADER_SIZE: usize = size_of::<ElementHeader>();

/// Offset of the signature within the header.
pub const SIGNATURE_OFFSET: usize = offset_of!(ElementHeader, signature);

const _: () = assert!(HEADER_SIZE == 16);
const _: () = assert!(SIGNATURE_OFFSET + size_of::<u32>() == HEADER_SIZE);

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    /// Raw identity of the owning zone, or [`DEAD_ZONE`].
    pub zone: u64,
    /// Element size at allocation time.
    pub size: u32,
    pub signature: u32,
}

impl ElementHeader {
    #[must_use]
    pub const fn new(zone: u64, size: u32) -> Self {
        Self {
            zone,
            size,
            signature: GZALLOC_SIGNATURE,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_signed(&self) -> bool {
        self.signature == GZALLOC_SIGNATURE
    }

    #[inline]
    #[must_use]
    pub const fn is_dead_zone(&self) -> bool {
        self.zone == DEAD_ZONE
    }

    /// Read a header from `addr`.
    ///
    /// # Safety
    /// `addr .. addr + HEADER_SIZE` must be mapped and readable.
    #[inline]
    #[must_use]
    pub unsafe fn read(addr: usize) -> Self {
        unsafe { ptr::read_unaligned(addr as *const Self) }
    }

    /// Write this header to `addr`.
    ///
    /// # Safety
    /// `addr .. addr + HEADER_SIZE` must be mapped and writable.
    #[inline]
    pub unsafe fn write(&self, addr: usize) {
        unsafe { ptr::write_unaligned(addr as *mut Self, *self) }
    }
}
