//! Zero-copy tuple views.
//!
//! Views never own values: they borrow one or more backings (tuples or other views)
//! together with an index layout owned by the duct that built them. Layouts are
//! computed once when a duct is initialized; pointing a view at a new record is just
//! constructing the borrow struct, so per-record cost is O(1) and reading a view costs
//! O(projected width).
//!
//! The borrow checker enforces the aliasing contract: a view cannot outlive the call in
//! which its backings were handed over. Consumers that need to keep values call
//! [`TupleLike::to_tuple`].

use super::base::TupleLike;
use super::value::Value;

/// A subset of one backing, selected by position.
pub struct Narrow<'a> {
    base: &'a dyn TupleLike,
    positions: &'a [usize],
}

impl<'a> Narrow<'a> {
    pub fn new(base: &'a dyn TupleLike, positions: &'a [usize]) -> Self {
        debug_assert!(
            positions.iter().all(|&p| p < base.size()),
            "narrow positions {positions:?} exceed backing width {}",
            base.size()
        );
        Self { base, positions }
    }
}

impl TupleLike for Narrow<'_> {
    fn size(&self) -> usize {
        self.positions.len()
    }

    fn get(&self, pos: usize) -> &Value {
        self.base.get(self.positions[pos])
    }
}

enum Parts<'a> {
    One([&'a dyn TupleLike; 1]),
    Pair([&'a dyn TupleLike; 2]),
    Many(Vec<&'a dyn TupleLike>),
}

/// The concatenation of several backings.
pub struct Composite<'a> {
    parts: Parts<'a>,
    size: usize,
}

impl<'a> Composite<'a> {
    /// A composite over a single backing (used for single-branch join rows).
    pub fn single(part: &'a dyn TupleLike) -> Self {
        Self {
            size: part.size(),
            parts: Parts::One([part]),
        }
    }

    pub fn pair(left: &'a dyn TupleLike, right: &'a dyn TupleLike) -> Self {
        Self {
            size: left.size() + right.size(),
            parts: Parts::Pair([left, right]),
        }
    }

    pub fn new(parts: Vec<&'a dyn TupleLike>) -> Self {
        Self {
            size: parts.iter().map(|p| p.size()).sum(),
            parts: Parts::Many(parts),
        }
    }

    /// The backings in order.
    pub fn parts(&self) -> &[&'a dyn TupleLike] {
        match &self.parts {
            Parts::One(p) => p,
            Parts::Pair(p) => p,
            Parts::Many(p) => p,
        }
    }
}

impl TupleLike for Composite<'_> {
    fn size(&self) -> usize {
        self.size
    }

    fn get(&self, pos: usize) -> &Value {
        let mut offset = pos;
        for part in self.parts() {
            let width = part.size();
            if offset < width {
                return part.get(offset);
            }
            offset -= width;
        }
        panic!("position {pos} out of range for composite of width {}", self.size)
    }
}

/// A base backing with some positions remapped onto an overlay.
///
/// `remap[i] == Some(j)` reads position `j` of the overlay in place of position `i` of
/// the base; `None` reads the base.
pub struct Override<'a> {
    base: &'a dyn TupleLike,
    overlay: &'a dyn TupleLike,
    remap: &'a [Option<usize>],
}

impl<'a> Override<'a> {
    pub fn new(
        base: &'a dyn TupleLike,
        overlay: &'a dyn TupleLike,
        remap: &'a [Option<usize>],
    ) -> Self {
        debug_assert_eq!(remap.len(), base.size());
        Self {
            base,
            overlay,
            remap,
        }
    }
}

impl TupleLike for Override<'_> {
    fn size(&self) -> usize {
        self.remap.len()
    }

    fn get(&self, pos: usize) -> &Value {
        match self.remap[pos] {
            Some(j) => self.overlay.get(j),
            None => self.base.get(pos),
        }
    }
}

/// One output position of a [`Selected`] view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    Incoming(usize),
    Result(usize),
}

/// An arbitrary selection over an incoming tuple and an operator result.
pub struct Selected<'a> {
    incoming: &'a dyn TupleLike,
    result: &'a dyn TupleLike,
    slots: &'a [Slot],
}

impl<'a> Selected<'a> {
    pub fn new(incoming: &'a dyn TupleLike, result: &'a dyn TupleLike, slots: &'a [Slot]) -> Self {
        Self {
            incoming,
            result,
            slots,
        }
    }
}

impl TupleLike for Selected<'_> {
    fn size(&self) -> usize {
        self.slots.len()
    }

    fn get(&self, pos: usize) -> &Value {
        match self.slots[pos] {
            Slot::Incoming(i) => self.incoming.get(i),
            Slot::Result(i) => self.result.get(i),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple;

    #[test]
    fn views_compose_without_copying() {
        let a = tuple![1, 2, 3, 4];
        let b = tuple![9, 8];
        let narrow = Narrow::new(&a, &[3, 0]);
        let composite = Composite::pair(&narrow, &b);
        assert_eq!(composite.to_tuple(), tuple![4, 1, 9, 8]);

        let remap = [None, Some(0), Some(1), None];
        let replaced = Override::new(&a, &b, &remap);
        assert_eq!(replaced.to_tuple(), tuple![1, 9, 8, 4]);

        let slots = [Slot::Result(1), Slot::Incoming(2)];
        assert_eq!(Selected::new(&a, &b, &slots).to_tuple(), tuple![8, 3]);
    }

    #[test]
    fn composite_of_empty_parts() {
        let empty = tuple![];
        let b = tuple!["x"];
        let c = Composite::new(vec![&empty, &b, &empty]);
        assert_eq!(c.size(), 1);
        assert_eq!(c.get(0), &Value::from("x"));
    }
}
