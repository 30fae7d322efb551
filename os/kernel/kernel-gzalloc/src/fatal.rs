//! # Fatal Integrity Violations
//!
//! Everything this crate detects is unrecoverable. Detection sites build a
//! [`GuardViolation`] and hand it to [`fatal`], which logs the diagnostic and
//! panics; the kernel's panic handler halts the machine. Nothing in the crate
//! catches these panics, and nothing downgrades them to a log line.

use crate::region::RegionError;

#[derive(Debug, thiserror::Error)]
pub enum GuardViolation<'a> {
    #[error(
        "invalid address supplied: {addr:#x} (adjusted: {base:#x}) for zone {zone} with element size {elem_size:#x}"
    )]
    MisalignedBase {
        addr: usize,
        base: usize,
        elem_size: u32,
        zone: &'a str,
    },

    #[error(
        "double free detected, freed address: {base:#x}, current free cache index: {cursor}, freed index: {slot} (zone {zone})"
    )]
    DoubleFree {
        base: usize,
        cursor: usize,
        slot: usize,
        zone: &'a str,
    },

    #[error("signature mismatch for element {addr:#x}, expected {expected:#x}, found {found:#x}")]
    SignatureMismatch { addr: usize, expected: u32, found: u32 },

    #[error(
        "mismatched zone or under/overflow, current zone: {zone} ({expected:#x}), recorded zone: {found:#x}, address: {addr:#x}"
    )]
    ZoneMismatch {
        addr: usize,
        expected: u64,
        found: u64,
        zone: &'a str,
    },

    #[error(
        "mismatched free or under/overflow for zone {zone}, recorded size: {found:#x}, element size: {expected:#x}, address: {addr:#x}"
    )]
    SizeMismatch {
        addr: usize,
        expected: u32,
        found: u32,
        zone: &'a str,
    },

    #[error(
        "detected over/underflow, byte at {at:#x} (offset {offset:#x} into the mapping), element {addr:#x}, contents {found:#04x} from {elem_size:#x} byte sized zone ({zone}) doesn't match fill pattern {expected:#04x}"
    )]
    FillPattern {
        at: usize,
        offset: usize,
        addr: usize,
        found: u8,
        expected: u8,
        elem_size: u32,
        zone: &'a str,
    },

    #[error("unable to locate map entry for {0:#x}")]
    MapEntryMissing(usize),

    #[error("signature missing for address {0:#x}")]
    SignatureMissing(usize),

    #[error("zone mismatch: element {addr:#x} records zone {zone:#x}, which is not a tracked zone")]
    UntrackedZone { addr: usize, zone: u64 },

    #[error("reserve exhausted: requested {requested:#x} bytes, {remaining:#x} remaining")]
    ReserveExhausted { requested: usize, remaining: usize },

    #[error("unable to steal {0:#x} bytes for the early reserve")]
    ReserveUnavailable(usize),

    #[error("{op} failed at {addr:#x}: {source}")]
    Region {
        op: &'static str,
        addr: usize,
        #[source]
        source: RegionError,
    },
}

/// Halt on an integrity violation.
#[cold]
#[inline(never)]
#[track_caller]
pub fn fatal(violation: GuardViolation<'_>) -> ! {
    log::error!("gzalloc: {violation}");
    panic!("gzalloc: {violation}");
}
