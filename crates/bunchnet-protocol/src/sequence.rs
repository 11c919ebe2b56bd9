//! Resolution of truncated wire counters against a local base.

use bunchnet_core::constants::{MAX_CH_SEQUENCE, MAX_PACKET_ID};

/// Absolute (unwrapped) packet identifier. Starts below zero so the first
/// packet (id 0) is always newer.
pub type PacketId = i32;

/// Stateless helper mapping between absolute counters and their `log2(modulus)`-bit wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketSequencer {
    modulus: u32,
}

/// An unwrapped wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    /// Absolute value nearest the base.
    pub value: i32,
    /// The value is not ahead of the base (a late or duplicated arrival).
    pub out_of_order: bool,
}

impl PacketSequencer {
    /// Sequencer for packet ids.
    pub const PACKET_ID: Self = Self::new(MAX_PACKET_ID);
    /// Sequencer for reliable channel sequences.
    pub const CH_SEQUENCE: Self = Self::new(MAX_CH_SEQUENCE);

    /// Creates a sequencer for a power-of-two modulus.
    pub const fn new(modulus: u32) -> Self {
        assert!(modulus.is_power_of_two(), "sequence modulus must be a power of two");
        Self { modulus }
    }

    /// Returns the modulus.
    pub const fn modulus(&self) -> u32 {
        self.modulus
    }

    /// Truncates an absolute value to its wire representation.
    pub fn wrap(&self, value: i32) -> u32 {
        (value as u32) & (self.modulus - 1)
    }

    /// Returns the value congruent to `raw` that lies nearest `base`,
    /// in the window `(base - modulus/2, base + modulus/2]`.
    pub fn unwrap(&self, raw: u32, base: i32) -> i32 {
        let modulus = i64::from(self.modulus);
        let raw = i64::from(raw) & (modulus - 1);
        let base = i64::from(base);
        (raw + ((base - raw + modulus / 2) & !(modulus - 1))) as i32
    }

    /// Unwraps `raw` against `base` and flags values that are not ahead of it.
    pub fn resolve(&self, raw: u32, base: i32) -> Resolved {
        let value = self.unwrap(raw, base);
        Resolved { value, out_of_order: value <= base }
    }
}
