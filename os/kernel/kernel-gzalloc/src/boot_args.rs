//! Boot flag lookup.
//!
//! Flags come from the kernel command line: presence flags such as
//! `-gzalloc_mode`, and valued flags such as `gzalloc_min=512` or
//! `gzname=vm.objects`, separated by ASCII whitespace. A missing flag is
//! never an error, and neither is a malformed number: it is logged and
//! treated as absent.

use log::warn;

/// Read-only, best-effort view on boot flags.
pub trait BootFlags {
    /// Whether the presence flag `name` was given.
    fn present(&self, name: &str) -> bool;

    /// Value of `name=value`, if given.
    fn string(&self, name: &str) -> Option<&str>;

    /// Value of `name=value` as a number.
    fn number(&self, name: &str) -> Option<u32> {
        let raw = self.string(name)?;
        let parsed = parse_number(raw);
        if parsed.is_none() {
            warn!("gzalloc: ignoring malformed boot flag {name}={raw}");
        }
        parsed
    }
}

/// Decimal or `0x`-prefixed hexadecimal.
#[must_use]
pub fn parse_number(raw: &str) -> Option<u32> {
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

/// Flags parsed out of a kernel command line. The first occurrence wins.
#[derive(Debug, Clone, Copy)]
pub struct BootArgs<'a> {
    line: &'a str,
}

impl<'a> BootArgs<'a> {
    #[must_use]
    pub const fn new(line: &'a str) -> Self {
        Self { line }
    }

    fn tokens(&self) -> impl Iterator<Item = &'a str> {
        self.line.split_ascii_whitespace()
    }
}

impl BootFlags for BootArgs<'_> {
    fn present(&self, name: &str) -> bool {
        self.tokens()
            .any(|t| t == name || t.split_once('=').is_some_and(|(k, _)| k == name))
    }

    fn string(&self, name: &str) -> Option<&str> {
        self.tokens()
            .filter_map(|t| t.split_once('='))
            .find_map(|(k, v)| (k == name).then_some(v))
    }
}
