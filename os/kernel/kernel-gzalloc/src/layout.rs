//! # Guarded Element Layout
//!
//! Pure offset arithmetic for guarded elements. Nothing in here touches memory;
//! the allocation and free paths feed the computed addresses to the header and
//! fill-pattern code.
//!
//! Every guarded element occupies `rounded_size + PAGE_SIZE` bytes of address
//! space. The extra page is the guard page, placed after the element in
//! [`BoundaryMode::Overflow`] and before it in [`BoundaryMode::Underflow`]:
//!
//! ```text
//! Overflow:
//! base                                      base + rounded_size
//! ┌──────────────┬────────┬─────────────────┬────────────────┐
//! │ slack (fill) │ header │ element         │ guard page     │
//! └──────────────┴────────┴─────────────────┴────────────────┘
//!                         ^ user = base + residue
//!
//! Underflow:
//! base           base + PAGE_SIZE                 base + PAGE_SIZE + rounded_size
//! ┌──────────────┬─────────┬────────┬──────────────┬─────────────┐
//! │ guard page   │ element │ footer │ slack (fill) │ footer copy │
//! └──────────────┴─────────┴────────┴──────────────┴─────────────┘
//!                ^ user
//! ```
//!
//! The slack range is painted with the fill byte at allocation time and
//! verified on free.

use crate::header::HEADER_SIZE;
use crate::region::GuardPlacement;
use core::ops::Range;

/// Size of a base page.
pub const PAGE_SIZE: usize = 4096;

/// Mask of the in-page offset bits.
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// Round `bytes` up to the next page boundary.
#[inline]
#[must_use]
pub const fn page_round(bytes: usize) -> usize {
    (bytes + PAGE_MASK) & !PAGE_MASK
}

#[inline]
#[must_use]
pub const fn is_page_aligned(addr: usize) -> bool {
    addr & PAGE_MASK == 0
}

/// Which side of the element the guard page protects.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryMode {
    /// Guard page trails the element; catches writes past its end.
    #[default]
    Overflow,
    /// Guard page leads the element; catches writes before its start.
    Underflow,
}

impl BoundaryMode {
    /// Where the region manager has to place the guard page.
    #[must_use]
    pub const fn guard_placement(self) -> GuardPlacement {
        match self {
            Self::Overflow => GuardPlacement::Last,
            Self::Underflow => GuardPlacement::First,
        }
    }
}

/// Placement of one guarded element of a given size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementLayout {
    mode: BoundaryMode,
    elem_size: usize,
    rounded_size: usize,
}

impl ElementLayout {
    /// Compute the layout for elements of `elem_size` bytes.
    ///
    /// Underflow mode keeps room for both the footer and its trailing copy so
    /// that the two never partially overlap.
    #[must_use]
    pub const fn new(mode: BoundaryMode, elem_size: usize) -> Self {
        let metadata = match mode {
            BoundaryMode::Overflow => HEADER_SIZE,
            BoundaryMode::Underflow => 2 * HEADER_SIZE,
        };
        Self {
            mode,
            elem_size,
            rounded_size: page_round(elem_size + metadata),
        }
    }

    #[must_use]
    pub const fn mode(&self) -> BoundaryMode {
        self.mode
    }

    #[must_use]
    pub const fn elem_size(&self) -> usize {
        self.elem_size
    }

    /// Page-rounded size of the data pages (element, header and slack).
    #[must_use]
    pub const fn rounded_size(&self) -> usize {
        self.rounded_size
    }

    /// Size of the whole mapping, including the guard page.
    #[must_use]
    pub const fn mapping_size(&self) -> usize {
        self.rounded_size + PAGE_SIZE
    }

    /// Bytes of the data pages not occupied by the element itself.
    #[must_use]
    pub const fn residue(&self) -> usize {
        self.rounded_size - self.elem_size
    }

    /// First byte of the data pages of the mapping starting at `base`.
    #[must_use]
    pub const fn data_start(&self, base: usize) -> usize {
        match self.mode {
            BoundaryMode::Overflow => base,
            BoundaryMode::Underflow => base + PAGE_SIZE,
        }
    }

    /// Address handed out to the caller.
    #[must_use]
    pub const fn user_addr(&self, base: usize) -> usize {
        match self.mode {
            BoundaryMode::Overflow => base + self.residue(),
            BoundaryMode::Underflow => base + PAGE_SIZE,
        }
    }

    /// Address of the header (a footer in underflow mode).
    #[must_use]
    pub const fn header_addr(&self, base: usize) -> usize {
        match self.mode {
            BoundaryMode::Overflow => base + self.residue() - HEADER_SIZE,
            BoundaryMode::Underflow => base + PAGE_SIZE + self.elem_size,
        }
    }

    /// Address of the trailing header copy, underflow mode only.
    #[must_use]
    pub const fn header_copy_addr(&self, base: usize) -> Option<usize> {
        match self.mode {
            BoundaryMode::Overflow => None,
            BoundaryMode::Underflow => Some(base + self.mapping_size() - HEADER_SIZE),
        }
    }

    /// Recover the mapping base from a user address.
    ///
    /// Garbage input wraps instead of panicking; the result then fails the
    /// page-alignment check of the free path.
    #[must_use]
    pub const fn base_of(&self, user: usize) -> usize {
        match self.mode {
            BoundaryMode::Overflow => user.wrapping_sub(self.residue()),
            BoundaryMode::Underflow => user.wrapping_sub(PAGE_SIZE),
        }
    }

    /// Bytes that must hold the fill pattern while the element is live.
    #[must_use]
    pub const fn slack(&self, base: usize) -> Range<usize> {
        match self.mode {
            BoundaryMode::Overflow => base..self.header_addr(base),
            BoundaryMode::Underflow => {
                let start = self.header_addr(base) + HEADER_SIZE;
                let end = base + self.mapping_size() - HEADER_SIZE;
                start..end
            }
        }
    }
}
