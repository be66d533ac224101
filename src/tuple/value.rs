//! Dynamically typed tuple slots.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter, Result as FormatResult};

/// One slot of a [`Tuple`](crate::Tuple).
///
/// Values are totally ordered so tuples can be used as grouping and sorting keys:
/// `Null` sorts before everything, then booleans, then numbers, then strings.
/// Integers and floats compare numerically; when numerically equal, `Int` sorts first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of the value; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(f.0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric addition treating `Null` as absent.
    ///
    /// Integer sums stay integers unless they overflow; any float operand promotes the
    /// result to a float. Returns `None` when either operand is non-numeric.
    pub fn numeric_add(&self, other: &Value) -> Option<Value> {
        match (self, other) {
            (Value::Null, v) | (v, Value::Null) if v.is_null() || v.as_f64().is_some() => {
                Some(v.clone())
            }
            (Value::Int(a), Value::Int(b)) => Some(
                a.checked_add(*b)
                    .map_or_else(|| Value::from(*a as f64 + *b as f64), Value::Int),
            ),
            (a, b) => Some(Value::from(a.as_f64()? + b.as_f64()?)),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Str(_) => 3,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.cmp(b),
            (Value::Int(a), Value::Float(b)) => {
                OrderedFloat(*a as f64).cmp(b).then(Ordering::Less)
            }
            (Value::Float(a), Value::Int(b)) => {
                a.cmp(&OrderedFloat(*b as f64)).then(Ordering::Greater)
            }
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{}", x.0),
            Value::Str(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        i64::try_from(value).map_or(Value::Float(OrderedFloat(value as f64)), Value::Int)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(OrderedFloat(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nulls_sort_first_and_numbers_mix() {
        let mut values = vec![
            Value::from("b"),
            Value::from(2.5),
            Value::Null,
            Value::from(2),
            Value::from(true),
            Value::from(3),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::from(true),
                Value::from(2),
                Value::from(2.5),
                Value::from(3),
                Value::from("b"),
            ]
        );
    }

    #[test]
    fn int_and_float_ties_are_ordered_not_equal() {
        assert_eq!(Value::from(1).cmp(&Value::from(1.0)), Ordering::Less);
        assert_ne!(Value::from(1), Value::from(1.0));
    }

    #[test]
    fn json_round_trip_is_untagged() {
        let json = serde_json::to_string(&vec![Value::from(1), Value::Null, Value::from("x")])
            .expect("serialize");
        assert_eq!(json, r#"[1,null,"x"]"#);
        let back: Vec<Value> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back[0], Value::Int(1));
        assert!(back[1].is_null());
    }

    #[test]
    fn numeric_add_promotes_and_skips_nulls() {
        assert_eq!(Value::from(1).numeric_add(&Value::from(2)), Some(Value::from(3)));
        assert_eq!(Value::from(1).numeric_add(&Value::from(0.5)), Some(Value::from(1.5)));
        assert_eq!(Value::Null.numeric_add(&Value::from(4)), Some(Value::from(4)));
        assert_eq!(Value::from(4).numeric_add(&Value::Null), Some(Value::from(4)));
        assert_eq!(Value::from("x").numeric_add(&Value::from(1)), None);
    }
}
