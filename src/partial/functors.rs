//! Built-in partial aggregation parts.
//!
//! Each functor folds values into an accumulator on the map side and names the
//! aggregator that merges the completed partial results after grouping.

use super::Functor;
use crate::operation::{Aggregator, Collector, First, Max, Min, OperationContext, Sum};
use crate::tuple::{Fields, Tuple, TupleLike, Value};
use anyhow::anyhow;
use std::sync::Arc;

fn add(prior: Option<&Tuple>, pos: usize, value: &Value) -> anyhow::Result<Value> {
    let base = prior.map_or(&Value::Null, |p| &p[pos]);
    base.numeric_add(value)
        .ok_or_else(|| anyhow!("cannot add non-numeric value {value}"))
}

/* ===================== SumBy / CountBy ===================== */

/// Partial sum of the first argument, merged with [`Sum`].
#[derive(Clone, Debug)]
pub struct SumBy {
    name: String,
}

impl SumBy {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Functor for SumBy {
    fn declared_fields(&self) -> Fields {
        Fields::names([self.name.as_str()])
    }

    fn aggregate(&self, arguments: &dyn TupleLike, prior: Option<&Tuple>) -> anyhow::Result<Tuple> {
        Ok(Tuple::from(vec![add(prior, 0, arguments.get(0))?]))
    }

    fn complete(&self, accumulator: Tuple) -> anyhow::Result<Tuple> {
        Ok(accumulator)
    }

    fn merger(&self) -> Arc<dyn Aggregator> {
        Arc::new(Sum::new(&self.name))
    }
}

/// Partial row count, merged by summing the partial counts.
#[derive(Clone, Debug)]
pub struct CountBy {
    name: String,
}

impl CountBy {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Functor for CountBy {
    fn declared_fields(&self) -> Fields {
        Fields::names([self.name.as_str()])
    }

    fn aggregate(&self, _arguments: &dyn TupleLike, prior: Option<&Tuple>) -> anyhow::Result<Tuple> {
        let count = prior.and_then(|p| p[0].as_i64()).unwrap_or(0);
        Ok(Tuple::from(vec![Value::Int(count + 1)]))
    }

    fn complete(&self, accumulator: Tuple) -> anyhow::Result<Tuple> {
        Ok(accumulator)
    }

    fn merger(&self) -> Arc<dyn Aggregator> {
        Arc::new(Sum::new(&self.name))
    }
}

/* ===================== MinBy / MaxBy ===================== */

fn extreme(
    arguments: &dyn TupleLike,
    prior: Option<&Tuple>,
    replace: impl Fn(&Value, &Value) -> bool,
) -> Tuple {
    let value = arguments.get(0);
    match prior {
        Some(p) if value.is_null() || (!p[0].is_null() && !replace(value, &p[0])) => p.clone(),
        _ => Tuple::from(vec![value.clone()]),
    }
}

/// Partial minimum of the first argument, nulls ignored.
#[derive(Clone, Debug)]
pub struct MinBy {
    name: String,
}

impl MinBy {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Functor for MinBy {
    fn declared_fields(&self) -> Fields {
        Fields::names([self.name.as_str()])
    }

    fn aggregate(&self, arguments: &dyn TupleLike, prior: Option<&Tuple>) -> anyhow::Result<Tuple> {
        Ok(extreme(arguments, prior, |v, cur| v < cur))
    }

    fn complete(&self, accumulator: Tuple) -> anyhow::Result<Tuple> {
        Ok(accumulator)
    }

    fn merger(&self) -> Arc<dyn Aggregator> {
        Arc::new(Min::new(&self.name))
    }
}

/// Partial maximum of the first argument, nulls ignored.
#[derive(Clone, Debug)]
pub struct MaxBy {
    name: String,
}

impl MaxBy {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Functor for MaxBy {
    fn declared_fields(&self) -> Fields {
        Fields::names([self.name.as_str()])
    }

    fn aggregate(&self, arguments: &dyn TupleLike, prior: Option<&Tuple>) -> anyhow::Result<Tuple> {
        Ok(extreme(arguments, prior, |v, cur| v > cur))
    }

    fn complete(&self, accumulator: Tuple) -> anyhow::Result<Tuple> {
        Ok(accumulator)
    }

    fn merger(&self) -> Arc<dyn Aggregator> {
        Arc::new(Max::new(&self.name))
    }
}

/* ===================== FirstBy ===================== */

/// The arguments of the first value seen per key, merged with [`First`].
///
/// Which value is first depends on arrival order and eviction; put a secondary sort
/// on the grouping when it matters.
#[derive(Clone, Debug)]
pub struct FirstBy {
    fields: Fields,
}

impl FirstBy {
    /// `fields` names the kept arguments, one per argument position.
    pub fn new(fields: Fields) -> Self {
        Self { fields }
    }
}

impl Functor for FirstBy {
    fn declared_fields(&self) -> Fields {
        self.fields.clone()
    }

    fn aggregate(&self, arguments: &dyn TupleLike, prior: Option<&Tuple>) -> anyhow::Result<Tuple> {
        Ok(match prior {
            Some(p) => p.clone(),
            None => arguments.to_tuple(),
        })
    }

    fn complete(&self, accumulator: Tuple) -> anyhow::Result<Tuple> {
        Ok(accumulator)
    }

    fn merger(&self) -> Arc<dyn Aggregator> {
        Arc::new(First)
    }
}

/* ===================== AverageBy ===================== */

/// Partial sum and count of the first argument, merged into their quotient.
#[derive(Clone, Debug)]
pub struct AverageBy {
    name: String,
}

impl AverageBy {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Functor for AverageBy {
    fn declared_fields(&self) -> Fields {
        Fields::names([
            format!("__{}_sum", self.name),
            format!("__{}_count", self.name),
        ])
    }

    fn aggregate(&self, arguments: &dyn TupleLike, prior: Option<&Tuple>) -> anyhow::Result<Tuple> {
        let value = arguments.get(0);
        if value.is_null() {
            return Ok(prior.cloned().unwrap_or_else(|| Tuple::from(vec![Value::Null, Value::Int(0)])));
        }
        let sum = add(prior, 0, value)?;
        let count = add(prior, 1, &Value::Int(1))?;
        Ok(Tuple::from(vec![sum, count]))
    }

    fn complete(&self, accumulator: Tuple) -> anyhow::Result<Tuple> {
        Ok(accumulator)
    }

    fn merger(&self) -> Arc<dyn Aggregator> {
        Arc::new(AverageMerge {
            fields: Fields::names([self.name.as_str()]),
        })
    }
}

/// Divides the summed partial sums by the summed partial counts.
struct AverageMerge {
    fields: Fields,
}

impl Aggregator for AverageMerge {
    fn declared_fields(&self, _arguments: &Fields) -> Fields {
        self.fields.clone()
    }

    fn start(&self, _ctx: &OperationContext<'_>, _key: &dyn TupleLike) -> anyhow::Result<Tuple> {
        Ok(Tuple::from(vec![Value::Null, Value::Int(0)]))
    }

    fn aggregate(
        &self,
        _ctx: &OperationContext<'_>,
        context: &mut Tuple,
        arguments: &dyn TupleLike,
    ) -> anyhow::Result<()> {
        let sum = add(Some(&*context), 0, arguments.get(0))?;
        let count = add(Some(&*context), 1, arguments.get(1))?;
        context.set(0, sum);
        context.set(1, count);
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple;

    fn fold(functor: &dyn Functor, values: &[Tuple]) -> Tuple {
        let mut acc: Option<Tuple> = None;
        for value in values {
            acc = Some(functor.aggregate(value, acc.as_ref()).unwrap());
        }
        functor.complete(acc.unwrap()).unwrap()
    }

    #[test]
    fn partial_sums_and_counts() {
        let values = [tuple![3], tuple![Value::Null], tuple![1]];
        assert_eq!(fold(&SumBy::new("s"), &values), tuple![4]);
        assert_eq!(fold(&CountBy::new("c"), &values), tuple![3]);
        assert_eq!(fold(&AverageBy::new("a"), &values), tuple![4, 2]);
    }

    #[test]
    fn partial_extremes_skip_nulls() {
        let values = [tuple![Value::Null], tuple![5], tuple![2], tuple![9]];
        assert_eq!(fold(&MinBy::new("lo"), &values), tuple![2]);
        assert_eq!(fold(&MaxBy::new("hi"), &values), tuple![9]);
        assert_eq!(
            fold(&FirstBy::new(Fields::names(["v"])), &values),
            tuple![Value::Null]
        );
    }
}
