//! Sorted sets of closed sequence number intervals.
//!
//! [`SequenceRangeCollection`] records which sequence numbers have been
//! acknowledged (sender side) or received (receiver side). Collections are
//! immutable values: merging returns a new collection and leaves the original
//! untouched, so a collection can be handed to another task while the owner
//! keeps accumulating.
//!
//! # Invariants
//!
//! - Ranges are sorted ascending by lower bound.
//! - No two ranges overlap or touch; `[1, 3]` and `[4, 6]` are always stored as
//!   `[1, 6]`.
//!
//! # Representation
//!
//! The overwhelmingly common case is a single contiguous range starting at 1, so
//! the empty and single-range cases are stored inline without allocating. Only
//! collections with gaps share an `Arc<[SequenceRange]>`.

use std::fmt;
use std::ops::Index;
use std::sync::Arc;

/// A closed interval `[lower, upper]` of sequence numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequenceRange {
    lower: u64,
    upper: u64,
}

impl SequenceRange {
    /// Create a new range
    ///
    /// # Panics
    ///
    /// Panics if `lower > upper`.
    #[must_use]
    pub fn new(lower: u64, upper: u64) -> Self {
        assert!(
            lower <= upper,
            "inverted sequence range [{lower}, {upper}]"
        );
        Self { lower, upper }
    }

    /// A range holding exactly one sequence number
    #[must_use]
    pub fn single(number: u64) -> Self {
        Self {
            lower: number,
            upper: number,
        }
    }

    /// Lower bound (inclusive)
    #[must_use]
    pub fn lower(&self) -> u64 {
        self.lower
    }

    /// Upper bound (inclusive)
    #[must_use]
    pub fn upper(&self) -> u64 {
        self.upper
    }

    /// Number of sequence numbers covered
    #[must_use]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.upper - self.lower + 1
    }

    /// Check if `number` lies within the range
    #[must_use]
    pub fn contains(&self, number: u64) -> bool {
        self.lower <= number && number <= self.upper
    }

    /// Check if `other` lies entirely within the range
    #[must_use]
    pub fn contains_range(&self, other: &SequenceRange) -> bool {
        self.lower <= other.lower && other.upper <= self.upper
    }

    /// Check if the two ranges overlap or are contiguous
    #[must_use]
    pub fn touches(&self, other: &SequenceRange) -> bool {
        self.lower <= other.upper.saturating_add(1) && other.lower <= self.upper.saturating_add(1)
    }

    fn union(&self, other: &SequenceRange) -> SequenceRange {
        SequenceRange {
            lower: self.lower.min(other.lower),
            upper: self.upper.max(other.upper),
        }
    }
}

impl fmt::Display for SequenceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lower == self.upper {
            write!(f, "{}", self.lower)
        } else {
            write!(f, "{}-{}", self.lower, self.upper)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum Repr {
    #[default]
    Empty,
    Single(SequenceRange),
    Multi(Arc<[SequenceRange]>),
}

/// Immutable, sorted, coalesced set of sequence ranges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceRangeCollection {
    repr: Repr,
}

impl SequenceRangeCollection {
    /// The empty collection
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    fn from_sorted(ranges: Vec<SequenceRange>) -> Self {
        let repr = match ranges.len() {
            0 => Repr::Empty,
            1 => Repr::Single(ranges[0]),
            _ => Repr::Multi(ranges.into()),
        };
        Self { repr }
    }

    /// Ranges as a sorted slice
    #[must_use]
    pub fn as_slice(&self) -> &[SequenceRange] {
        match &self.repr {
            Repr::Empty => &[],
            Repr::Single(range) => std::slice::from_ref(range),
            Repr::Multi(ranges) => ranges,
        }
    }

    /// Number of disjoint ranges
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Check if no sequence number is recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self.repr, Repr::Empty)
    }

    /// Iterate over the ranges in ascending order
    pub fn iter(&self) -> std::slice::Iter<'_, SequenceRange> {
        self.as_slice().iter()
    }

    /// Lowest range
    #[must_use]
    pub fn first(&self) -> Option<&SequenceRange> {
        self.as_slice().first()
    }

    /// Highest range
    #[must_use]
    pub fn last(&self) -> Option<&SequenceRange> {
        self.as_slice().last()
    }

    /// Highest sequence number in the collection
    #[must_use]
    pub fn upper(&self) -> Option<u64> {
        self.last().map(SequenceRange::upper)
    }

    /// Check if `number` is in the collection
    #[must_use]
    pub fn contains(&self, number: u64) -> bool {
        match &self.repr {
            Repr::Empty => false,
            Repr::Single(range) => range.contains(number),
            Repr::Multi(ranges) => {
                let idx = ranges.partition_point(|r| r.lower <= number);
                idx > 0 && ranges[idx - 1].upper >= number
            }
        }
    }

    /// Return a new collection with `number` merged in
    #[must_use]
    pub fn merge_with(&self, number: u64) -> Self {
        self.merge_with_range(SequenceRange::single(number))
    }

    /// Return a new collection with `range` merged in, coalescing every range it
    /// overlaps or touches
    #[must_use]
    pub fn merge_with_range(&self, range: SequenceRange) -> Self {
        match &self.repr {
            Repr::Empty => Self {
                repr: Repr::Single(range),
            },
            Repr::Single(existing) => {
                if existing.touches(&range) {
                    Self {
                        repr: Repr::Single(existing.union(&range)),
                    }
                } else if range.upper < existing.lower {
                    Self::from_sorted(vec![range, *existing])
                } else {
                    Self::from_sorted(vec![*existing, range])
                }
            }
            Repr::Multi(ranges) => {
                // ranges[start..end] are exactly the ones touching `range`
                let start = ranges.partition_point(|r| r.upper.saturating_add(1) < range.lower);
                let end = ranges.partition_point(|r| r.lower <= range.upper.saturating_add(1));

                if end - start == 1 && ranges[start].contains_range(&range) {
                    return self.clone();
                }

                let merged = if start == end {
                    range
                } else {
                    ranges[start].union(&ranges[end - 1]).union(&range)
                };

                let mut out = Vec::with_capacity(ranges.len() + 1 - (end - start));
                out.extend_from_slice(&ranges[..start]);
                out.push(merged);
                out.extend_from_slice(&ranges[end..]);
                Self::from_sorted(out)
            }
        }
    }

    /// Return a new collection holding the union of both collections
    #[must_use]
    pub fn merge_with_collection(&self, other: &SequenceRangeCollection) -> Self {
        other
            .iter()
            .fold(self.clone(), |acc, range| acc.merge_with_range(*range))
    }
}

impl Index<usize> for SequenceRangeCollection {
    type Output = SequenceRange;

    fn index(&self, index: usize) -> &SequenceRange {
        &self.as_slice()[index]
    }
}

impl From<SequenceRange> for SequenceRangeCollection {
    fn from(range: SequenceRange) -> Self {
        Self {
            repr: Repr::Single(range),
        }
    }
}

impl FromIterator<SequenceRange> for SequenceRangeCollection {
    fn from_iter<I: IntoIterator<Item = SequenceRange>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::empty(), |acc, range| acc.merge_with_range(range))
    }
}

impl<'a> IntoIterator for &'a SequenceRangeCollection {
    type Item = &'a SequenceRange;
    type IntoIter = std::slice::Iter<'a, SequenceRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for SequenceRangeCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, range) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{range}")?;
        }
        write!(f, "]")
    }
}
