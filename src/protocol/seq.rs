//! Sequence numbers with modular (wrap-around) arithmetic.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A GBN sequence number, living in `0..65536` and wrapping around.
///
/// All comparisons are modular: `Seq(65535)` is *before* `Seq(0)`. Callers
/// must never compare the inner `u16` values directly near the wrap-around
/// boundary; the half-range ordering here is the single source of truth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Seq(pub u16);

impl Seq {
    /// Returns the current value and advances `self` by one (mod 2^16).
    pub fn post_increment(&mut self) -> Seq {
        let cur = *self;
        self.0 = self.0.wrapping_add(1);
        cur
    }

    /// The sequence number immediately after this one.
    #[must_use]
    pub fn next(self) -> Seq {
        Seq(self.0.wrapping_add(1))
    }

    /// The sequence number immediately before this one.
    #[must_use]
    pub fn prev(self) -> Seq {
        Seq(self.0.wrapping_sub(1))
    }

    /// Modular distance `self − base (mod 2^16)`.
    pub fn dist_from(self, base: Seq) -> u16 {
        self.0.wrapping_sub(base.0)
    }

    /// Whether `self` lies in the window `[base, base + size)` under modular
    /// arithmetic.
    pub fn in_window(self, base: Seq, size: u16) -> bool {
        self.dist_from(base) < size
    }

    /// Logical modular ordering: the value within half the sequence space
    /// ahead of the other is the greater one, so `65535 cmp 0` is `Less`
    /// while `1 cmp 0` is `Greater`.
    pub fn cmp_wrapping(self, other: Seq) -> Ordering {
        const HALF: u16 = u16::MAX / 2;

        if self.0 == other.0 {
            Ordering::Equal
        } else if self.0.wrapping_sub(other.0) <= HALF {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }

    /// Whether `self` is strictly after `other` in modular order.
    pub fn after(self, other: Seq) -> bool {
        self.cmp_wrapping(other) == Ordering::Greater
    }
}

impl From<u16> for Seq {
    fn from(value: u16) -> Self {
        Seq(value)
    }
}

impl std::fmt::Display for Seq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn increments_wrap() {
        let mut seq = Seq(u16::MAX);
        assert_eq!(seq.post_increment(), Seq(u16::MAX));
        assert_eq!(seq, Seq(0));
        assert_eq!(Seq(u16::MAX).next(), Seq(0));
        assert_eq!(Seq(0).prev(), Seq(u16::MAX));
    }

    #[test]
    fn ordering_respects_wraparound() {
        assert!(Seq(1).after(Seq(0)));
        assert!(Seq(0).after(Seq(u16::MAX)));
        assert!(!Seq(u16::MAX).after(Seq(0)));
        assert_eq!(Seq(7).cmp_wrapping(Seq(7)), Ordering::Equal);
    }

    #[test]
    fn window_membership_across_boundary() {
        // Window [65534, 65534 + 5) covers 65534, 65535, 0, 1, 2.
        let base = Seq(65534);
        for offset in 0..5u16 {
            assert!(Seq(base.0.wrapping_add(offset)).in_window(base, 5));
        }
        assert!(!Seq(3).in_window(base, 5));
        assert!(!Seq(65533).in_window(base, 5));
    }

    proptest! {
        #[test]
        fn dist_is_inverse_of_add(base in any::<u16>(), offset in any::<u16>()) {
            let seq = Seq(base.wrapping_add(offset));
            prop_assert_eq!(seq.dist_from(Seq(base)), offset);
        }

        #[test]
        fn successor_is_always_after(value in any::<u16>()) {
            let seq = Seq(value);
            prop_assert!(seq.next().after(seq));
            prop_assert!(!seq.after(seq.next()));
        }
    }
}
