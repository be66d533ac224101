//! Tuples, field declarations and the zero-copy view algebra.
//!
//! - [`Value`] / [`Tuple`]: owned, dynamically typed records.
//! - [`TupleLike`]: read interface shared by tuples and views.
//! - [`view`]: [`Narrow`], [`Composite`], [`Override`] and [`Selected`] projections.
//! - [`Fields`]: declarations and selectors resolved to positions at compile time.
//! - [`SparseComparator`]: secondary-sort comparator over a subset of positions.

mod base;
pub mod compare;
pub mod fields;
mod value;
pub mod view;

pub use base::{Tuple, TupleLike, values};
pub use compare::SparseComparator;
pub use fields::{Field, Fields};
pub use value::Value;
pub use view::{Composite, Narrow, Override, Selected, Slot};
