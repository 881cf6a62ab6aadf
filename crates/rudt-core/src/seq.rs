//! # Cyclic Sequence Numbers
//!
//! Fixed-width sequence numbers drawn from a wrapping space. Every value is
//! masked into `BITS` bits, and ordering is wraparound-aware: `a` is later
//! than `b` when the forward distance from `b` to `a` is non-zero and less
//! than half of the space.
//!
//! Two spaces are used on the wire:
//!
//! - [`PacketSeq`] — 24-bit packet sequence numbers (packet header, NAK,
//!   packet-level ACK, RTT probes)
//! - [`MessageSeq`] — 16-bit per-channel message sequence numbers (message
//!   frames and per-channel acks)

use std::cmp::Ordering;
use std::fmt;

/// A sequence number in a `BITS`-wide cyclic space.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeqNum<const BITS: u32>(u32);

/// Packet header sequence number space.
pub type PacketSeq = SeqNum<24>;

/// Per-channel message sequence number space.
pub type MessageSeq = SeqNum<16>;

impl<const BITS: u32> SeqNum<BITS> {
    /// Mask applied to every value.
    pub const MASK: u32 = ((1u64 << BITS) - 1) as u32;

    const HALF: u32 = 1 << (BITS - 1);

    pub const ZERO: Self = SeqNum(0);

    /// Create a sequence number, masking `val` into range.
    #[inline]
    pub const fn new(val: u32) -> Self {
        SeqNum(val & Self::MASK)
    }

    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// The following sequence number (wraps at the top of the space).
    #[inline]
    pub const fn next(self) -> Self {
        Self::new(self.0.wrapping_add(1))
    }

    /// Number of increments needed to get from `self` to `later`.
    #[inline]
    pub const fn forward_distance(self, later: Self) -> u32 {
        later.0.wrapping_sub(self.0) & Self::MASK
    }

    /// Wraparound-aware comparison.
    ///
    /// Two values exactly half a space apart are both "less" than each
    /// other; callers never hold numbers that far apart.
    pub fn cyclic_cmp(self, other: Self) -> Ordering {
        let d = other.forward_distance(self);
        if d == 0 {
            Ordering::Equal
        } else if d < Self::HALF {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }

    /// Whether `self` is logically later than `other`.
    #[inline]
    pub fn is_after(self, other: Self) -> bool {
        self.cyclic_cmp(other) == Ordering::Greater
    }

    /// The logically later of the two values.
    #[inline]
    pub fn cyclic_max(self, other: Self) -> Self {
        if other.is_after(self) {
            other
        } else {
            self
        }
    }
}

impl<const BITS: u32> fmt::Debug for SeqNum<BITS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNum<{}>({})", BITS, self.0)
    }
}

impl<const BITS: u32> fmt::Display for SeqNum<BITS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
