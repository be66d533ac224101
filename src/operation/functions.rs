//! Built-in functions.

use super::{Collector, Function, OperationContext};
use crate::tuple::{Fields, Tuple, TupleLike};

/// Emits its arguments unchanged.
///
/// With a `RESULTS` output selector this narrows a stream to the argument fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl Function for Identity {
    fn declared_fields(&self, arguments: &Fields) -> Fields {
        arguments.clone()
    }

    fn operate(
        &self,
        _ctx: &OperationContext<'_>,
        arguments: &dyn TupleLike,
        out: &mut Collector<'_>,
    ) -> anyhow::Result<()> {
        out.emit(arguments)
    }
}

/// Emits the same constant values for every tuple.
#[derive(Clone, Debug)]
pub struct Insert {
    fields: Fields,
    values: Tuple,
}

impl Insert {
    pub fn new(fields: Fields, values: Tuple) -> Self {
        debug_assert_eq!(fields.size(), values.len());
        Self { fields, values }
    }
}

impl Function for Insert {
    fn declared_fields(&self, _arguments: &Fields) -> Fields {
        self.fields.clone()
    }

    fn operate(
        &self,
        _ctx: &OperationContext<'_>,
        _arguments: &dyn TupleLike,
        out: &mut Collector<'_>,
    ) -> anyhow::Result<()> {
        out.emit(&self.values)
    }
}

struct FnFunction<F> {
    fields: Fields,
    f: F,
}

impl<F> Function for FnFunction<F>
where
    F: Fn(&dyn TupleLike, &mut Collector<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn declared_fields(&self, _arguments: &Fields) -> Fields {
        self.fields.clone()
    }

    fn operate(
        &self,
        _ctx: &OperationContext<'_>,
        arguments: &dyn TupleLike,
        out: &mut Collector<'_>,
    ) -> anyhow::Result<()> {
        (self.f)(arguments, out)
    }
}

/// Builds a [`Function`] declaring `fields` from a closure.
///
/// ```
/// use ductflow::operation::function_fn;
/// use ductflow::{Fields, tuple};
///
/// let double = function_fn(Fields::names(["doubled"]), |args, out| {
///     let v = args.get(0).as_i64().unwrap_or(0);
///     out.emit(&tuple![v * 2])
/// });
/// # let _ = double;
/// ```
pub fn function_fn<F>(fields: Fields, f: F) -> impl Function
where
    F: Fn(&dyn TupleLike, &mut Collector<'_>) -> anyhow::Result<()> + Send + Sync,
{
    FnFunction { fields, f }
}
