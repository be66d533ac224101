//! Join strategies over a [`JoinerClosure`].

use super::JoinerClosure;
use crate::tuple::{Composite, Tuple, TupleLike};
use std::iter;

/// Decides which rows a grouping yields from its per-branch values.
pub trait Joiner: Send + Sync {
    fn join<'c>(
        &'c self,
        closure: &'c JoinerClosure<'_>,
    ) -> Box<dyn Iterator<Item = Composite<'c>> + 'c>;

    /// Whether a key yields no rows at all; such keys never reach the consumers of
    /// the gate, so reducers see no empty groups.
    fn is_suppressed(&self, _closure: &JoinerClosure<'_>) -> bool {
        false
    }

    /// Checks that this joiner can combine `branches` logical branches.
    fn validate(&self, _branches: usize) -> Result<(), String> {
        Ok(())
    }
}

/// Nested-loop cross product over non-empty slices, last branch varying fastest.
struct Product<'c> {
    branches: Vec<&'c [Tuple]>,
    cursor: Vec<usize>,
    done: bool,
}

impl<'c> Product<'c> {
    fn new(branches: Vec<&'c [Tuple]>) -> Self {
        let done = branches.is_empty() || branches.iter().any(|b| b.is_empty());
        Self {
            cursor: vec![0; branches.len()],
            branches,
            done,
        }
    }

    fn advance(&mut self) {
        for i in (0..self.branches.len()).rev() {
            self.cursor[i] += 1;
            if self.cursor[i] < self.branches[i].len() {
                return;
            }
            self.cursor[i] = 0;
        }
        self.done = true;
    }
}

impl<'c> Iterator for Product<'c> {
    type Item = Composite<'c>;

    fn next(&mut self) -> Option<Composite<'c>> {
        if self.done {
            return None;
        }
        let row = match *self.branches.as_slice() {
            [only] => Composite::single(&only[self.cursor[0]]),
            [left, right] => Composite::pair(&left[self.cursor[0]], &right[self.cursor[1]]),
            _ => Composite::new(
                self.branches
                    .iter()
                    .zip(&self.cursor)
                    .map(|(&b, &c)| &b[c] as &dyn TupleLike)
                    .collect(),
            ),
        };
        self.advance();
        Some(row)
    }
}

/// An empty required branch suppresses the key, as does having no values at all.
fn suppressed(closure: &JoinerClosure<'_>, required: impl Fn(usize) -> bool) -> bool {
    let size = closure.size();
    (0..size).all(|b| closure.is_empty(b))
        || (0..size).any(|b| closure.is_empty(b) && required(b))
}

/// Joins with a per-branch required flag; an empty optional branch contributes its
/// placeholder.
fn mixed<'c>(
    closure: &'c JoinerClosure<'_>,
    required: impl Fn(usize) -> bool,
) -> Box<dyn Iterator<Item = Composite<'c>> + 'c> {
    if suppressed(closure, &required) {
        return Box::new(iter::empty());
    }
    let size = closure.size();
    let branches = (0..size).map(|b| closure.values_or_placeholder(b)).collect();
    Box::new(Product::new(branches))
}

/// Rows only for keys present in every branch.
#[derive(Clone, Copy, Debug, Default)]
pub struct InnerJoin;

impl Joiner for InnerJoin {
    fn join<'c>(
        &'c self,
        closure: &'c JoinerClosure<'_>,
    ) -> Box<dyn Iterator<Item = Composite<'c>> + 'c> {
        mixed(closure, |_| true)
    }

    fn is_suppressed(&self, closure: &JoinerClosure<'_>) -> bool {
        suppressed(closure, |_| true)
    }
}

/// Rows for every key; missing branches are null-filled.
#[derive(Clone, Copy, Debug, Default)]
pub struct OuterJoin;

impl Joiner for OuterJoin {
    fn join<'c>(
        &'c self,
        closure: &'c JoinerClosure<'_>,
    ) -> Box<dyn Iterator<Item = Composite<'c>> + 'c> {
        mixed(closure, |_| false)
    }

    fn is_suppressed(&self, closure: &JoinerClosure<'_>) -> bool {
        suppressed(closure, |_| false)
    }
}

/// Rows for every key of the first branch; the other branches are optional.
#[derive(Clone, Copy, Debug, Default)]
pub struct LeftJoin;

impl Joiner for LeftJoin {
    fn join<'c>(
        &'c self,
        closure: &'c JoinerClosure<'_>,
    ) -> Box<dyn Iterator<Item = Composite<'c>> + 'c> {
        mixed(closure, |b| b == 0)
    }

    fn is_suppressed(&self, closure: &JoinerClosure<'_>) -> bool {
        suppressed(closure, |b| b == 0)
    }
}

/// Rows for keys present in every branch but the first, which is optional.
#[derive(Clone, Copy, Debug, Default)]
pub struct RightJoin;

impl Joiner for RightJoin {
    fn join<'c>(
        &'c self,
        closure: &'c JoinerClosure<'_>,
    ) -> Box<dyn Iterator<Item = Composite<'c>> + 'c> {
        mixed(closure, |b| b != 0)
    }

    fn is_suppressed(&self, closure: &JoinerClosure<'_>) -> bool {
        suppressed(closure, |b| b != 0)
    }
}

/// Per-branch choice: `true` marks a branch required (inner), `false` optional (outer).
#[derive(Clone, Debug)]
pub struct MixedJoin(pub Vec<bool>);

impl Joiner for MixedJoin {
    fn join<'c>(
        &'c self,
        closure: &'c JoinerClosure<'_>,
    ) -> Box<dyn Iterator<Item = Composite<'c>> + 'c> {
        mixed(closure, |b| self.0[b])
    }

    fn is_suppressed(&self, closure: &JoinerClosure<'_>) -> bool {
        suppressed(closure, |b| self.0[b])
    }

    fn validate(&self, branches: usize) -> Result<(), String> {
        if self.0.len() == branches {
            Ok(())
        } else {
            Err(format!(
                "mixed join declares {} branches, gate has {branches}",
                self.0.len()
            ))
        }
    }
}

/// The values of every branch in branch order, each row a single branch tuple.
#[derive(Clone, Copy, Debug, Default)]
pub struct Union;

impl Joiner for Union {
    fn join<'c>(
        &'c self,
        closure: &'c JoinerClosure<'_>,
    ) -> Box<dyn Iterator<Item = Composite<'c>> + 'c> {
        Box::new(
            closure
                .branches
                .iter()
                .flat_map(|values| values.iter())
                .map(|t| Composite::single(t)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple;

    fn rows(joiner: &dyn Joiner, closure: &JoinerClosure<'_>) -> Vec<Tuple> {
        joiner.join(closure).map(|c| c.to_tuple()).collect()
    }

    #[test]
    fn joins_fill_empty_sides_with_placeholders() {
        let left = vec![tuple![1, "a"], tuple![1, "b"]];
        let placeholders = vec![Tuple::nulls(2), Tuple::nulls(1)];
        let closure = JoinerClosure::new(vec![left.as_slice(), &[]], &placeholders);

        assert!(rows(&InnerJoin, &closure).is_empty());
        assert!(rows(&RightJoin, &closure).is_empty());
        assert!(InnerJoin.is_suppressed(&closure));
        assert!(RightJoin.is_suppressed(&closure));
        assert!(!OuterJoin.is_suppressed(&closure));
        assert!(!LeftJoin.is_suppressed(&closure));
        let outer = rows(&OuterJoin, &closure);
        assert_eq!(
            outer,
            vec![
                tuple![1, "a", crate::Value::Null],
                tuple![1, "b", crate::Value::Null]
            ]
        );
        assert_eq!(rows(&LeftJoin, &closure), outer);
    }

    #[test]
    fn inner_join_is_a_cross_product() {
        let left = vec![tuple!["l1"], tuple!["l2"]];
        let right = vec![tuple!["r1"], tuple!["r2"], tuple!["r3"]];
        let placeholders = vec![Tuple::nulls(1), Tuple::nulls(1)];
        let closure = JoinerClosure::new(vec![left.as_slice(), right.as_slice()], &placeholders);
        let joined = rows(&InnerJoin, &closure);
        assert_eq!(joined.len(), 6);
        assert_eq!(joined[0], tuple!["l1", "r1"]);
        assert_eq!(joined[5], tuple!["l2", "r3"]);
    }

    #[test]
    fn union_concatenates_branches() {
        let a = vec![tuple![1], tuple![2]];
        let b = vec![tuple![3]];
        let placeholders = vec![Tuple::nulls(1), Tuple::nulls(1)];
        let closure = JoinerClosure::new(vec![a.as_slice(), b.as_slice()], &placeholders);
        assert_eq!(
            rows(&Union, &closure),
            vec![tuple![1], tuple![2], tuple![3]]
        );
    }

    #[test]
    fn mixed_join_validates_arity() {
        assert!(MixedJoin(vec![true, false]).validate(2).is_ok());
        assert!(MixedJoin(vec![true]).validate(2).is_err());
    }
}
