//! Built-in buffers.

use super::{Buffer, Collector, OperationContext};
use crate::tuple::{Fields, Tuple, TupleLike};

/// Emits the arguments of the first `n` values of each group.
///
/// Combine with a secondary sort to take the top `n` of every group.
#[derive(Clone, Copy, Debug)]
pub struct FirstN(pub usize);

impl Buffer for FirstN {
    fn declared_fields(&self, arguments: &Fields) -> Fields {
        arguments.clone()
    }

    fn operate(
        &self,
        _ctx: &OperationContext<'_>,
        _key: &dyn TupleLike,
        values: &mut dyn Iterator<Item = Tuple>,
        out: &mut Collector<'_>,
    ) -> anyhow::Result<()> {
        for value in values.take(self.0) {
            out.emit(&value)?;
        }
        Ok(())
    }
}

struct FnBuffer<F> {
    fields: Fields,
    retain: bool,
    f: F,
}

impl<F> Buffer for FnBuffer<F>
where
    F: Fn(&dyn TupleLike, &mut dyn Iterator<Item = Tuple>, &mut Collector<'_>) -> anyhow::Result<()>
        + Send
        + Sync,
{
    fn declared_fields(&self, _arguments: &Fields) -> Fields {
        self.fields.clone()
    }

    fn retain_values(&self) -> bool {
        self.retain
    }

    fn operate(
        &self,
        _ctx: &OperationContext<'_>,
        key: &dyn TupleLike,
        values: &mut dyn Iterator<Item = Tuple>,
        out: &mut Collector<'_>,
    ) -> anyhow::Result<()> {
        (self.f)(key, values, out)
    }
}

/// Builds a [`Buffer`] declaring `fields` from a closure receiving the group key, the
/// value iterator and the output collector.
///
/// `retain_values` keeps the last iterated values visible in results emitted after
/// the iterator is exhausted.
pub fn buffer_fn<F>(fields: Fields, retain_values: bool, f: F) -> impl Buffer
where
    F: Fn(&dyn TupleLike, &mut dyn Iterator<Item = Tuple>, &mut Collector<'_>) -> anyhow::Result<()>
        + Send
        + Sync,
{
    FnBuffer {
        fields,
        retain: retain_values,
        f,
    }
}
