//! Comparators for grouping keys and secondary sorts.

use super::base::TupleLike;
use std::cmp::Ordering;

/// Compares tuples on a sparse set of positions only.
///
/// Each position uses the natural [`Value`](super::Value) ordering, where nulls sort
/// before every non-null value. Positions not listed are ignored, so a stable sort
/// keeps arrival order among tuples that tie on every configured position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SparseComparator {
    positions: Vec<usize>,
    reverse: bool,
}

impl SparseComparator {
    pub fn new(positions: Vec<usize>) -> Self {
        Self {
            positions,
            reverse: false,
        }
    }

    pub fn reversed(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    pub fn compare(&self, left: &dyn TupleLike, right: &dyn TupleLike) -> Ordering {
        let ordering = self
            .positions
            .iter()
            .map(|&p| left.get(p).cmp(right.get(p)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal);
        if self.reverse {
            ordering.reverse()
        } else {
            ordering
        }
    }
}
