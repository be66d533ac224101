//! Built-in value and group assertions.

use super::{GroupAssertion, ValueAssertion};
use crate::tuple::{Tuple, TupleLike, Value, values};

/// Fails tuples with a null argument.
#[derive(Clone, Copy, Debug, Default)]
pub struct AssertNotNull;

impl ValueAssertion for AssertNotNull {
    fn check(&self, arguments: &dyn TupleLike) -> Option<String> {
        values(arguments)
            .position(Value::is_null)
            .map(|pos| format!("argument {pos} is null"))
    }
}

/// Fails tuples whose argument count differs from the expected size.
#[derive(Clone, Copy, Debug)]
pub struct AssertSizeEquals(pub usize);

impl ValueAssertion for AssertSizeEquals {
    fn check(&self, arguments: &dyn TupleLike) -> Option<String> {
        (arguments.size() != self.0)
            .then(|| format!("expected {} arguments, found {}", self.0, arguments.size()))
    }
}

/// Fails tuples for which a predicate does not hold.
pub struct AssertExpression<F> {
    description: String,
    predicate: F,
}

impl<F> AssertExpression<F>
where
    F: Fn(&dyn TupleLike) -> bool + Send + Sync,
{
    pub fn new(description: impl Into<String>, predicate: F) -> Self {
        Self {
            description: description.into(),
            predicate,
        }
    }
}

impl<F> ValueAssertion for AssertExpression<F>
where
    F: Fn(&dyn TupleLike) -> bool + Send + Sync,
{
    fn check(&self, arguments: &dyn TupleLike) -> Option<String> {
        (!(self.predicate)(arguments)).then(|| format!("expression failed: {}", self.description))
    }
}

fn start_count() -> Tuple {
    Tuple::from(vec![Value::Int(0)])
}

fn bump(context: &mut Tuple) {
    let count = context[0].as_i64().unwrap_or(0);
    context.set(0, count + 1);
}

fn count(context: &Tuple) -> i64 {
    context[0].as_i64().unwrap_or(0)
}

/// Fails groups whose size differs from the expected size.
#[derive(Clone, Copy, Debug)]
pub struct AssertGroupSizeEquals(pub i64);

impl GroupAssertion for AssertGroupSizeEquals {
    fn start(&self, _key: &dyn TupleLike) -> Tuple {
        start_count()
    }

    fn aggregate(&self, context: &mut Tuple, _arguments: &dyn TupleLike) {
        bump(context);
    }

    fn check(&self, key: &dyn TupleLike, context: &Tuple) -> Option<String> {
        let size = count(context);
        (size != self.0).then(|| {
            format!(
                "group {} has {size} values, expected {}",
                key.to_tuple(),
                self.0
            )
        })
    }
}

/// Fails groups with at least the given number of values.
#[derive(Clone, Copy, Debug)]
pub struct AssertGroupSizeLessThan(pub i64);

impl GroupAssertion for AssertGroupSizeLessThan {
    fn start(&self, _key: &dyn TupleLike) -> Tuple {
        start_count()
    }

    fn aggregate(&self, context: &mut Tuple, _arguments: &dyn TupleLike) {
        bump(context);
    }

    fn check(&self, key: &dyn TupleLike, context: &Tuple) -> Option<String> {
        let size = count(context);
        (size >= self.0).then(|| {
            format!(
                "group {} has {size} values, expected fewer than {}",
                key.to_tuple(),
                self.0
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple;

    #[test]
    fn value_assertions() {
        assert_eq!(AssertNotNull.check(&tuple![1, 2]), None);
        assert!(AssertNotNull.check(&tuple![1, Value::Null]).is_some());
        assert!(AssertSizeEquals(3).check(&tuple![1, 2]).is_some());
        let positive = AssertExpression::new("v > 0", |t: &dyn TupleLike| {
            t.get(0).as_i64().is_some_and(|v| v > 0)
        });
        assert_eq!(positive.check(&tuple![1]), None);
        assert!(positive.check(&tuple![-1]).is_some());
    }

    #[test]
    fn group_size_assertions() {
        let key = tuple!["k"];
        let mut ctx = AssertGroupSizeLessThan(2).start(&key);
        AssertGroupSizeLessThan(2).aggregate(&mut ctx, &tuple![1]);
        assert_eq!(AssertGroupSizeLessThan(2).check(&key, &ctx), None);
        AssertGroupSizeLessThan(2).aggregate(&mut ctx, &tuple![2]);
        assert!(AssertGroupSizeLessThan(2).check(&key, &ctx).is_some());
        assert_eq!(AssertGroupSizeEquals(2).check(&key, &ctx), None);
    }
}
