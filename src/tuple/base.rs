//! Owned tuples and the read interface shared with views.

use super::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::ops::Index;

/// Read access to a tuple-shaped value, owned or borrowed.
///
/// Implemented by [`Tuple`] and by every zero-copy view in [`view`](super::view).
/// `get` panics on an out-of-range position, like slice indexing.
pub trait TupleLike {
    /// Number of positions.
    fn size(&self) -> usize;

    /// Value at `pos`.
    fn get(&self, pos: usize) -> &Value;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Deep-copies the visible values into a new owned tuple.
    fn to_tuple(&self) -> Tuple {
        Tuple((0..self.size()).map(|i| self.get(i).clone()).collect())
    }

    /// Deep-copies the visible values into `dst`, reusing its allocation.
    fn copy_into(&self, dst: &mut Tuple) {
        dst.0.clear();
        dst.0.extend((0..self.size()).map(|i| self.get(i).clone()));
    }

    /// Element-wise equality against any other tuple-shaped value.
    fn content_eq(&self, other: &dyn TupleLike) -> bool {
        self.size() == other.size() && (0..self.size()).all(|i| self.get(i) == other.get(i))
    }
}

impl<T: TupleLike + ?Sized> TupleLike for &T {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn get(&self, pos: usize) -> &Value {
        (**self).get(pos)
    }
}

/// Iterates the values of any tuple-shaped value.
pub fn values(tuple: &dyn TupleLike) -> impl Iterator<Item = &Value> + '_ {
    (0..tuple.size()).map(move |i| tuple.get(i))
}

/// An owned, ordered sequence of [`Value`]s.
///
/// Equality, hashing and ordering are by content; ordering is lexicographic, which is
/// the natural ordering used for grouping keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tuple(Vec<Value>);

impl Tuple {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// A tuple of `width` nulls, used as a placeholder of known arity.
    pub fn nulls(width: usize) -> Self {
        Self(vec![Value::Null; width])
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn set(&mut self, pos: usize, value: impl Into<Value>) {
        self.0[pos] = value.into();
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.0.push(value.into());
    }

    /// Appends every value of `other`.
    pub fn append(&mut self, other: &dyn TupleLike) {
        self.0.extend(values(other).cloned());
    }

    /// Copies the values at `positions` into a new tuple.
    pub fn select(&self, positions: &[usize]) -> Tuple {
        Tuple(positions.iter().map(|&p| self.0[p].clone()).collect())
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl TupleLike for Tuple {
    fn size(&self) -> usize {
        self.0.len()
    }

    fn get(&self, pos: usize) -> &Value {
        &self.0[pos]
    }

    fn to_tuple(&self) -> Tuple {
        self.clone()
    }
}

impl Index<usize> for Tuple {
    type Output = Value;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl FromIterator<Value> for Tuple {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Tuple {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Display for Tuple {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, "]")
    }
}

/// Builds a [`Tuple`] from values convertible into [`Value`].
///
/// ```
/// use ductflow::{tuple, Value};
///
/// let t = tuple!["a", 1, 2.5, Value::Null];
/// assert_eq!(t.len(), 4);
/// ```
#[macro_export]
macro_rules! tuple {
    () => { $crate::Tuple::new() };
    ($($v:expr),+ $(,)?) => {
        $crate::Tuple::from(vec![$($crate::Value::from($v)),+])
    };
}
