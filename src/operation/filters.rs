//! Built-in filters.

use super::{Filter, OperationContext};
use crate::tuple::{TupleLike, values};

/// Removes tuples whose arguments are all null.
#[derive(Clone, Copy, Debug, Default)]
pub struct FilterNull;

impl Filter for FilterNull {
    fn is_remove(
        &self,
        _ctx: &OperationContext<'_>,
        arguments: &dyn TupleLike,
    ) -> anyhow::Result<bool> {
        Ok(values(arguments).all(|v| v.is_null()))
    }
}

/// Removes tuples with at least one non-null argument.
#[derive(Clone, Copy, Debug, Default)]
pub struct FilterNotNull;

impl Filter for FilterNotNull {
    fn is_remove(
        &self,
        _ctx: &OperationContext<'_>,
        arguments: &dyn TupleLike,
    ) -> anyhow::Result<bool> {
        Ok(values(arguments).any(|v| !v.is_null()))
    }
}

struct FnFilter<F>(F);

impl<F> Filter for FnFilter<F>
where
    F: Fn(&dyn TupleLike) -> bool + Send + Sync,
{
    fn is_remove(
        &self,
        _ctx: &OperationContext<'_>,
        arguments: &dyn TupleLike,
    ) -> anyhow::Result<bool> {
        Ok(!(self.0)(arguments))
    }
}

/// Builds a [`Filter`] keeping the tuples for which `keep` returns `true`.
pub fn filter_fn<F>(keep: F) -> impl Filter
where
    F: Fn(&dyn TupleLike) -> bool + Send + Sync,
{
    FnFilter(keep)
}
