//! Grouping and join gates.
//!
//! A gate collects the tuples of one or more keyed branches and, once every branch
//! has completed, replays them one [`Grouping`] per key in sorted key order. What a
//! grouping yields is decided by its [`Joiner`]:
//!
//! - [`Union`]: the values of every branch, one after the other (GroupBy);
//! - [`InnerJoin`], [`OuterJoin`], [`LeftJoin`], [`RightJoin`], [`MixedJoin`]: the
//!   cross product of the branch values, with empty optional branches replaced by a
//!   placeholder of nulls of the branch's width (CoGroup).
//!
//! The only gate implementation here is the in-memory [`MemoryGate`].

mod joiner;
mod memory;
pub(crate) mod ordering;

pub use joiner::{InnerJoin, Joiner, LeftJoin, MixedJoin, OuterJoin, RightJoin, Union};
pub use memory::{GateBranch, MemoryGate};

use crate::tuple::{Composite, Tuple};

/// The per-branch values of one key.
pub struct JoinerClosure<'a> {
    branches: Vec<&'a [Tuple]>,
    placeholders: &'a [Tuple],
}

impl<'a> JoinerClosure<'a> {
    /// `placeholders[i]` stands in for branch `i` when it has no values.
    pub fn new(branches: Vec<&'a [Tuple]>, placeholders: &'a [Tuple]) -> Self {
        debug_assert_eq!(branches.len(), placeholders.len());
        Self {
            branches,
            placeholders,
        }
    }

    /// Number of logical branches.
    pub fn size(&self) -> usize {
        self.branches.len()
    }

    pub fn values(&self, branch: usize) -> &'a [Tuple] {
        self.branches[branch]
    }

    pub fn is_empty(&self, branch: usize) -> bool {
        self.branches[branch].is_empty()
    }

    pub fn placeholder(&self, branch: usize) -> &'a Tuple {
        &self.placeholders[branch]
    }

    /// The values of `branch`, or its placeholder when it has none.
    pub fn values_or_placeholder(&self, branch: usize) -> &'a [Tuple] {
        match self.branches[branch] {
            [] => std::slice::from_ref(&self.placeholders[branch]),
            values => values,
        }
    }
}

/// One key emitted by a gate, with lazy access to its joined rows.
///
/// Each call to [`iter`](Grouping::iter) starts a fresh single pass over the rows,
/// so several consumers behind a fork can each read the whole group.
pub struct Grouping<'a> {
    key: &'a Tuple,
    closure: JoinerClosure<'a>,
    joiner: &'a dyn Joiner,
}

impl<'a> Grouping<'a> {
    pub fn new(key: &'a Tuple, closure: JoinerClosure<'a>, joiner: &'a dyn Joiner) -> Self {
        Self {
            key,
            closure,
            joiner,
        }
    }

    pub fn key(&self) -> &'a Tuple {
        self.key
    }

    pub fn closure(&self) -> &JoinerClosure<'a> {
        &self.closure
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = Composite<'_>> + '_> {
        self.joiner.join(&self.closure)
    }
}
