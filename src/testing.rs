//! Helpers for testing flows.
//!
//! - Assertions comparing the tuples a sink received with expected rows:
//!   [`assert_tuples_equal`], [`assert_tuples_unordered_equal`],
//!   [`assert_tuples_grouped_equal`].
//! - [`TestRows`]: a fluent builder of input rows.
//!
//! ```
//! use ductflow::testing::{TestRows, assert_tuples_unordered_equal};
//! use ductflow::tuple;
//!
//! let rows = TestRows::new()
//!     .add_row(tuple!["a", 1])
//!     .add_keyed_range("b", 1..=2)
//!     .build();
//! assert_tuples_unordered_equal(&rows, &[tuple!["b", 2], tuple!["a", 1], tuple!["b", 1]]);
//! ```

use crate::tuple::{Tuple, Value};
use std::collections::HashMap;
use std::ops::RangeInclusive;

/// Asserts that two row sets are equal in order and content.
///
/// # Panics
///
/// Panics with both row sets when they differ.
pub fn assert_tuples_equal(actual: &[Tuple], expected: &[Tuple]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "Row count mismatch:\n  Expected: {} rows\n  Actual: {} rows\n  Expected: {}\n  Actual: {}",
        expected.len(),
        actual.len(),
        render(expected),
        render(actual)
    );
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert_eq!(
            a,
            e,
            "Row mismatch at index {i}:\n  Expected: {e}\n  Actual: {a}\n  Full expected: {}\n  Full actual: {}",
            render(expected),
            render(actual)
        );
    }
}

/// Asserts that two row sets hold the same rows with the same multiplicities,
/// ignoring order.
///
/// # Panics
///
/// Panics listing the missing and unexpected rows.
pub fn assert_tuples_unordered_equal(actual: &[Tuple], expected: &[Tuple]) {
    let mut counts: HashMap<&Tuple, isize> = HashMap::new();
    for row in actual {
        *counts.entry(row).or_default() += 1;
    }
    for row in expected {
        *counts.entry(row).or_default() -= 1;
    }
    let mut missing: Vec<String> = Vec::new();
    let mut extra: Vec<String> = Vec::new();
    for (row, count) in counts {
        if count < 0 {
            missing.push(format!("{row} x{}", -count));
        } else if count > 0 {
            extra.push(format!("{row} x{count}"));
        }
    }
    if !missing.is_empty() || !extra.is_empty() {
        missing.sort();
        extra.sort();
        panic!(
            "Row content mismatch:\n  Missing: {missing:?}\n  Unexpected: {extra:?}\n  Expected: {}\n  Actual: {}",
            render(expected),
            render(actual)
        );
    }
}

/// Asserts that rows carrying the same values at `key` positions appear in the same
/// order in both sets, while keys may be interleaved differently.
///
/// Fits flows that merge several sources, where each source keeps its order but the
/// interleaving depends on scheduling.
///
/// # Panics
///
/// Panics naming the first key whose rows differ.
pub fn assert_tuples_grouped_equal(actual: &[Tuple], expected: &[Tuple], key: &[usize]) {
    let group = |rows: &[Tuple]| {
        let mut groups: HashMap<Tuple, Vec<Tuple>> = HashMap::new();
        for row in rows {
            groups.entry(row.select(key)).or_default().push(row.clone());
        }
        groups
    };
    let actual_groups = group(actual);
    let expected_groups = group(expected);
    let mut keys: Vec<&Tuple> = actual_groups.keys().chain(expected_groups.keys()).collect();
    keys.sort();
    keys.dedup();
    for k in keys {
        let a = actual_groups.get(k).map_or(&[][..], Vec::as_slice);
        let e = expected_groups.get(k).map_or(&[][..], Vec::as_slice);
        assert!(
            a == e,
            "Rows for key {k} differ:\n  Expected: {}\n  Actual: {}",
            render(e),
            render(a)
        );
    }
}

fn render(rows: &[Tuple]) -> String {
    let rendered: Vec<String> = rows.iter().map(ToString::to_string).collect();
    format!("[{}]", rendered.join(", "))
}

/// Fluent builder of input rows.
#[derive(Clone, Debug, Default)]
pub struct TestRows {
    rows: Vec<Tuple>,
}

impl TestRows {
    #[must_use]
    pub const fn new() -> Self {
        Self { rows: Vec::new() }
    }

    #[must_use]
    pub fn add_row(mut self, row: Tuple) -> Self {
        self.rows.push(row);
        self
    }

    #[must_use]
    pub fn add_rows(mut self, rows: impl IntoIterator<Item = Tuple>) -> Self {
        self.rows.extend(rows);
        self
    }

    #[must_use]
    pub fn add_repeated(mut self, row: Tuple, count: usize) -> Self {
        self.rows.extend(std::iter::repeat_n(row, count));
        self
    }

    /// Adds `(key, n)` for every `n` in `range`.
    #[must_use]
    pub fn add_keyed_range(mut self, key: impl Into<Value>, range: RangeInclusive<i64>) -> Self {
        let key = key.into();
        self.rows
            .extend(range.map(|n| Tuple::from(vec![key.clone(), Value::Int(n)])));
        self
    }

    #[must_use]
    pub fn build(self) -> Vec<Tuple> {
        self.rows
    }
}
