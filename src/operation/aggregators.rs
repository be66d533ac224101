//! Built-in aggregators: Sum, Count, Average, First, Last, Min, Max

use super::{Aggregator, Collector, OperationContext};
use crate::tuple::{Fields, Tuple, TupleLike, Value};
use anyhow::anyhow;

fn single(name: &str) -> Fields {
    Fields::names([name])
}

fn add_into(slot: &mut Tuple, pos: usize, value: &Value) -> anyhow::Result<()> {
    let sum = slot[pos]
        .numeric_add(value)
        .ok_or_else(|| anyhow!("cannot add non-numeric value {value}"))?;
    slot.set(pos, sum);
    Ok(())
}

/* ===================== Sum ===================== */

/// Sum of the first argument; nulls are skipped and an all-null group sums to null.
///
/// Integer inputs produce an integer sum; any float promotes the sum to a float.
#[derive(Clone, Debug)]
pub struct Sum {
    fields: Fields,
}

impl Sum {
    pub fn new(name: &str) -> Self {
        Self {
            fields: single(name),
        }
    }
}

impl Aggregator for Sum {
    fn declared_fields(&self, _arguments: &Fields) -> Fields {
        self.fields.clone()
    }

    fn start(&self, _ctx: &OperationContext<'_>, _key: &dyn TupleLike) -> anyhow::Result<Tuple> {
        Ok(Tuple::nulls(1))
    }

    fn aggregate(
        &self,
        _ctx: &OperationContext<'_>,
        context: &mut Tuple,
        arguments: &dyn TupleLike,
    ) -> anyhow::Result<()> {
        add_into(context, 0, arguments.get(0))
    }

    fn complete(
        &self,
        _ctx: &OperationContext<'_>,
        context: Tuple,
        out: &mut Collector<'_>,
    ) -> anyhow::Result<()> {
        out.emit(&context)
    }
}

/* ===================== Count ===================== */

/// Number of values in the group.
#[derive(Clone, Debug)]
pub struct Count {
    fields: Fields,
}

impl Count {
    pub fn new(name: &str) -> Self {
        Self {
            fields: single(name),
        }
    }
}

impl Aggregator for Count {
    fn declared_fields(&self, _arguments: &Fields) -> Fields {
        self.fields.clone()
    }

    fn start(&self, _ctx: &OperationContext<'_>, _key: &dyn TupleLike) -> anyhow::Result<Tuple> {
        Ok(Tuple::from(vec![Value::Int(0)]))
    }

    fn aggregate(
        &self,
        _ctx: &OperationContext<'_>,
        context: &mut Tuple,
        _arguments: &dyn TupleLike,
    ) -> anyhow::Result<()> {
        add_into(context, 0, &Value::Int(1))
    }

    fn complete(
        &self,
        _ctx: &OperationContext<'_>,
        context: Tuple,
        out: &mut Collector<'_>,
    ) -> anyhow::Result<()> {
        out.emit(&context)
    }
}

/* ===================== Average ===================== */

/// Mean of the first argument as a float; nulls are skipped.
#[derive(Clone, Debug)]
pub struct Average {
    fields: Fields,
}

impl Average {
    pub fn new(name: &str) -> Self {
        Self {
            fields: single(name),
        }
    }
}

impl Aggregator for Average {
    fn declared_fields(&self, _arguments: &Fields) -> Fields {
        self.fields.clone()
    }

    fn start(&self, _ctx: &OperationContext<'_>, _key: &dyn TupleLike) -> anyhow::Result<Tuple> {
        Ok(Tuple::from(vec![Value::from(0.0), Value::Int(0)]))
    }

    fn aggregate(
        &self,
        _ctx: &OperationContext<'_>,
        context: &mut Tuple,
        arguments: &dyn TupleLike,
    ) -> anyhow::Result<()> {
        let value = arguments.get(0);
        if value.is_null() {
            return Ok(());
        }
        add_into(context, 0, value)?;
        add_into(context, 1, &Value::Int(1))
    }

    fn complete(
        &self,
        _ctx: &OperationContext<'_>,
        context: Tuple,
        out: &mut Collector<'_>,
    ) -> anyhow::Result<()> {
        let count = context[1].as_i64().unwrap_or(0);
        let mean = match context[0].as_f64() {
            Some(sum) if count > 0 => Value::from(sum / count as f64),
            _ => Value::Null,
        };
        out.emit(&Tuple::from(vec![mean]))
    }
}

/* ===================== First / Last ===================== */

/// The arguments of the first value in the group (after any secondary sort).
#[derive(Clone, Copy, Debug, Default)]
pub struct First;

/// The arguments of the last value in the group.
#[derive(Clone, Copy, Debug, Default)]
pub struct Last;

fn start_positional(ctx: &OperationContext<'_>) -> Tuple {
    let mut context = Tuple::nulls(ctx.arguments.size());
    context.push(false);
    context
}

fn emit_positional(context: Tuple, out: &mut Collector<'_>) -> anyhow::Result<()> {
    let mut values = context.into_values();
    values.pop();
    out.emit(&Tuple::from(values))
}

impl Aggregator for First {
    fn declared_fields(&self, arguments: &Fields) -> Fields {
        arguments.clone()
    }

    fn start(&self, ctx: &OperationContext<'_>, _key: &dyn TupleLike) -> anyhow::Result<Tuple> {
        Ok(start_positional(ctx))
    }

    fn aggregate(
        &self,
        _ctx: &OperationContext<'_>,
        context: &mut Tuple,
        arguments: &dyn TupleLike,
    ) -> anyhow::Result<()> {
        let seen = context.len() - 1;
        if context[seen].as_bool() != Some(true) {
            arguments.copy_into(context);
            context.push(true);
        }
        Ok(())
    }

    fn complete(
        &self,
        _ctx: &OperationContext<'_>,
        context: Tuple,
        out: &mut Collector<'_>,
    ) -> anyhow::Result<()> {
        emit_positional(context, out)
    }
}

impl Aggregator for Last {
    fn declared_fields(&self, arguments: &Fields) -> Fields {
        arguments.clone()
    }

    fn start(&self, ctx: &OperationContext<'_>, _key: &dyn TupleLike) -> anyhow::Result<Tuple> {
        Ok(start_positional(ctx))
    }

    fn aggregate(
        &self,
        _ctx: &OperationContext<'_>,
        context: &mut Tuple,
        arguments: &dyn TupleLike,
    ) -> anyhow::Result<()> {
        arguments.copy_into(context);
        context.push(true);
        Ok(())
    }

    fn complete(
        &self,
        _ctx: &OperationContext<'_>,
        context: Tuple,
        out: &mut Collector<'_>,
    ) -> anyhow::Result<()> {
        emit_positional(context, out)
    }
}

/* ===================== Min / Max ===================== */

/// Smallest non-null first argument, by natural value ordering.
#[derive(Clone, Debug)]
pub struct Min {
    fields: Fields,
}

/// Largest non-null first argument, by natural value ordering.
#[derive(Clone, Debug)]
pub struct Max {
    fields: Fields,
}

impl Min {
    pub fn new(name: &str) -> Self {
        Self {
            fields: single(name),
        }
    }
}

impl Max {
    pub fn new(name: &str) -> Self {
        Self {
            fields: single(name),
        }
    }
}

fn keep_extreme(context: &mut Tuple, value: &Value, replace: impl Fn(&Value, &Value) -> bool) {
    if !value.is_null() && (context[0].is_null() || replace(value, &context[0])) {
        context.set(0, value.clone());
    }
}

impl Aggregator for Min {
    fn declared_fields(&self, _arguments: &Fields) -> Fields {
        self.fields.clone()
    }

    fn start(&self, _ctx: &OperationContext<'_>, _key: &dyn TupleLike) -> anyhow::Result<Tuple> {
        Ok(Tuple::nulls(1))
    }

    fn aggregate(
        &self,
        _ctx: &OperationContext<'_>,
        context: &mut Tuple,
        arguments: &dyn TupleLike,
    ) -> anyhow::Result<()> {
        keep_extreme(context, arguments.get(0), |v, cur| v < cur);
        Ok(())
    }

    fn complete(
        &self,
        _ctx: &OperationContext<'_>,
        context: Tuple,
        out: &mut Collector<'_>,
    ) -> anyhow::Result<()> {
        out.emit(&context)
    }
}

impl Aggregator for Max {
    fn declared_fields(&self, _arguments: &Fields) -> Fields {
        self.fields.clone()
    }

    fn start(&self, _ctx: &OperationContext<'_>, _key: &dyn TupleLike) -> anyhow::Result<Tuple> {
        Ok(Tuple::nulls(1))
    }

    fn aggregate(
        &self,
        _ctx: &OperationContext<'_>,
        context: &mut Tuple,
        arguments: &dyn TupleLike,
    ) -> anyhow::Result<()> {
        keep_extreme(context, arguments.get(0), |v, cur| v > cur);
        Ok(())
    }

    fn complete(
        &self,
        _ctx: &OperationContext<'_>,
        context: Tuple,
        out: &mut Collector<'_>,
    ) -> anyhow::Result<()> {
        out.emit(&context)
    }
}
