//! Fixed-capacity set of drive positions.
//!
//! Replaces raw position bitmasks: the capacity is the array width, fixed
//! at construction, so "position >= width" is rejected at the API boundary
//! instead of silently setting a bit past the end of the array.

use crate::error::{Error, Result};
use crate::types::Position;

/// Widest array supported by the engine.
pub const MAX_WIDTH: u32 = 16;

/// A set of drive positions for one array, capacity = width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionSet {
    bits: u16,
    width: u32,
}

impl PositionSet {
    /// Create an empty set for an array of `width` drives.
    pub fn new(width: u32) -> Result<Self> {
        if width == 0 || width > MAX_WIDTH {
            return Err(Error::invalid_argument(format!(
                "width {width} outside 1..={MAX_WIDTH}"
            )));
        }
        Ok(Self { bits: 0, width })
    }

    /// Array width this set was sized for.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Add a position. Fails if the position is outside the array.
    pub fn insert(&mut self, position: Position) -> Result<()> {
        if position >= self.width {
            return Err(Error::invalid_argument(format!(
                "position {position} >= width {}",
                self.width
            )));
        }
        self.bits |= 1 << position;
        Ok(())
    }

    /// Whether the set holds this position. Out-of-range positions are
    /// simply absent.
    #[must_use]
    pub fn contains(&self, position: Position) -> bool {
        position < self.width && self.bits & (1 << position) != 0
    }

    /// Number of positions in the set.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.bits.count_ones()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Lowest position in the set, if any.
    #[must_use]
    pub fn first(&self) -> Option<Position> {
        if self.bits == 0 {
            None
        } else {
            Some(self.bits.trailing_zeros())
        }
    }

    /// Second-lowest position in the set, if any.
    #[must_use]
    pub fn second(&self) -> Option<Position> {
        let rest = self.bits & self.bits.wrapping_sub(1);
        if rest == 0 {
            None
        } else {
            Some(rest.trailing_zeros())
        }
    }

    /// Iterate positions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Position> + '_ {
        (0..self.width).filter(|p| self.contains(*p))
    }

    /// Remove every position. Callers that guard a grow-only set must log
    /// before resetting.
    pub fn clear(&mut self) {
        self.bits = 0;
    }

    /// Whether `other` is a subset of `self`.
    #[must_use]
    pub fn contains_all(&self, other: &Self) -> bool {
        other.bits & !self.bits == 0
    }

    /// Raw bitmask, low bit = position 0. For log formatting only.
    #[must_use]
    pub fn raw_bits(&self) -> u16 {
        self.bits
    }
}

impl std::fmt::Display for PositionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}/{}", self.bits, self.width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_width() {
        assert!(PositionSet::new(0).is_err());
        assert!(PositionSet::new(MAX_WIDTH + 1).is_err());
        assert!(PositionSet::new(1).is_ok());
        assert!(PositionSet::new(MAX_WIDTH).is_ok());
    }

    #[test]
    fn test_insert_and_contains() {
        let mut set = PositionSet::new(5).unwrap();
        assert!(set.is_empty());
        set.insert(0).unwrap();
        set.insert(4).unwrap();
        assert!(set.contains(0));
        assert!(set.contains(4));
        assert!(!set.contains(2));
        assert_eq!(set.count(), 2);
    }

    #[test]
    fn test_insert_past_width_fails() {
        let mut set = PositionSet::new(5).unwrap();
        assert!(set.insert(5).is_err());
        assert!(set.insert(15).is_err());
        assert!(set.is_empty());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut set = PositionSet::new(4).unwrap();
        set.insert(3).unwrap();
        set.insert(3).unwrap();
        assert_eq!(set.count(), 1);
    }

    #[test]
    fn test_first_and_second() {
        let mut set = PositionSet::new(8).unwrap();
        assert_eq!(set.first(), None);
        assert_eq!(set.second(), None);
        set.insert(6).unwrap();
        assert_eq!(set.first(), Some(6));
        assert_eq!(set.second(), None);
        set.insert(2).unwrap();
        assert_eq!(set.first(), Some(2));
        assert_eq!(set.second(), Some(6));
    }

    #[test]
    fn test_iter_ascending() {
        let mut set = PositionSet::new(8).unwrap();
        for p in [7, 1, 4] {
            set.insert(p).unwrap();
        }
        let positions: Vec<_> = set.iter().collect();
        assert_eq!(positions, vec![1, 4, 7]);
    }

    #[test]
    fn test_contains_all() {
        let mut a = PositionSet::new(6).unwrap();
        let mut b = PositionSet::new(6).unwrap();
        a.insert(1).unwrap();
        a.insert(3).unwrap();
        b.insert(3).unwrap();
        assert!(a.contains_all(&b));
        assert!(!b.contains_all(&a));
    }

    #[test]
    fn test_display() {
        let mut set = PositionSet::new(5).unwrap();
        set.insert(0).unwrap();
        set.insert(2).unwrap();
        assert_eq!(set.to_string(), "0x5/5");
    }
}
