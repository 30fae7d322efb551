//! # Guard-Page Zone Allocator Overlay
//!
//! A debugging overlay for the kernel zone allocator. Zones selected by boot
//! flags hand out every element from its own page-granular mapping, flanked
//! by a guard page and stamped with a signed header. Memory errors that would
//! otherwise corrupt neighbouring elements silently become immediate,
//! diagnosable halts:
//!
//! | error                  | caught by                                        |
//! |------------------------|--------------------------------------------------|
//! | overflow / underflow   | guard page fault, fill pattern check on free     |
//! | use after free         | freed mappings stay protected in an LRU cache    |
//! | double free            | scan of the zone's eviction cache                |
//! | wrong zone / bad size  | header check on free                             |
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Zone allocator                      │
//! │    • zone creation / destruction                    │
//! │    • element alloc / free for tracked zones         │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              GuardAllocator                         │
//! │    • GuardPolicy resolved from boot flags           │
//! │    • element layout, header stamping, checks        │
//! │    • per-zone eviction cache (under the zone lock)  │
//! │    • early reserve until the VM layer is ready      │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │         RegionManager / Platform                    │
//! │    • guard submap: map, look up, protect, unmap     │
//! │    • preemption state, bootstrap memory             │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! * [`config`]: boot flag resolution into an immutable [`GuardPolicy`].
//! * [`layout`]: page rounding and the placement of element, header, slack
//!   and guard page for both [`BoundaryMode`]s.
//! * [`header`]: the 16 byte [`ElementHeader`] stamped next to each element.
//! * [`cache`]: the ring of recently freed, still protected mappings.
//! * [`reserve`]: the bump-allocated pool used before the VM layer is up.
//! * [`fatal`]: every integrity violation, and the one way to report it.
//!
//! ## Usage
//!
//! ```ignore
//! let gz = GuardAllocator::configure(&BootArgs::new(cmdline), submap, platform);
//! // ... bring up virtual memory ...
//! gz.mark_vm_ready();
//!
//! let zone = Arc::new(Zone::new("kalloc.1024", 1024));
//! gz.on_zone_created(&zone);
//! if zone.is_tracked() {
//!     let elem = gz.alloc(&zone, true).expect("blocking allowed");
//!     unsafe { gz.free(&zone, elem) };
//! }
//! ```
//!
//! ## Failure Model
//!
//! Only one condition is reported to the caller: a non-blocking allocation
//! in a context with preemption disabled yields `None`. Everything else is
//! either guaranteed by the region manager or is an integrity violation,
//! which is logged and halts through [`fatal::fatal`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod allocator;
pub mod boot_args;
pub mod cache;
pub mod config;
pub mod fatal;
mod free;
pub mod header;
mod introspect;
pub mod layout;
pub mod region;
pub mod reserve;
pub mod stats;
pub mod sync;
pub mod zone;

pub use allocator::GuardAllocator;
pub use boot_args::{BootArgs, BootFlags};
pub use config::{GuardPolicy, ProtectionMode, SizeFilter};
pub use fatal::GuardViolation;
pub use header::ElementHeader;
pub use layout::{BoundaryMode, ElementLayout, PAGE_SIZE};
pub use region::{Access, GuardPlacement, Platform, RegionError, RegionManager};
pub use stats::{GuardStats, StatsSnapshot};
pub use zone::{Zone, ZoneCounters, ZoneId};
