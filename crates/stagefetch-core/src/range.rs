//! Key intervals over a sort schema.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::datum::{Tuple, TupleComparator};

/// A key interval `[start, end]` in natural value order (`start <= end`
/// column-wise), tagged with the orientation of the leading sort key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleRange {
    pub start: Tuple,
    pub end: Tuple,
    #[serde(default = "ascending_default")]
    pub ascending: bool,
}

fn ascending_default() -> bool {
    true
}

impl TupleRange {
    pub fn new(start: Tuple, end: Tuple, ascending: bool) -> Self {
        Self {
            start,
            end,
            ascending,
        }
    }

    /// `self` ends where `next` starts.
    pub fn is_adjacent_to(&self, next: &TupleRange) -> bool {
        self.end == next.start
    }

    /// Order of two ranges under the producing sort's comparator. For a
    /// descending leading key this is the reverse of value order.
    pub fn cmp_by(&self, other: &TupleRange, comparator: &TupleComparator) -> Ordering {
        comparator
            .compare(&self.start, &other.start)
            .then_with(|| comparator.compare(&self.end, &other.end))
    }
}

impl fmt::Display for TupleRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} ~ {}]{}",
            self.start,
            self.end,
            if self.ascending { "" } else { " desc" }
        )
    }
}
