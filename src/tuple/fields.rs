//! Field declarations and selectors.
//!
//! A [`Fields`] value plays two roles:
//!
//! - a **declaration** (`Fields::Select`) names every position of the tuples flowing
//!   on an edge;
//! - a **selector** picks positions out of a declaration, either explicitly
//!   (`Select` by name or position) or through one of the special modes `All`,
//!   `Results`, `Replace` and `Swap` used as output selectors.

use crate::error::FieldsError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{Display, Formatter, Result as FormatResult};

/// A single field reference: a name or a position (negative counts from the end).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Name(String),
    Pos(isize),
}

impl From<&str> for Field {
    fn from(name: &str) -> Self {
        Field::Name(name.to_string())
    }
}

impl From<String> for Field {
    fn from(name: String) -> Self {
        Field::Name(name)
    }
}

impl From<isize> for Field {
    fn from(pos: isize) -> Self {
        Field::Pos(pos)
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Field::Name(n) => write!(f, "'{n}'"),
            Field::Pos(p) => write!(f, "{p}"),
        }
    }
}

/// A field declaration or selector.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fields {
    /// Every incoming field; as an output selector, incoming followed by results.
    #[default]
    All,
    /// Only the operator results.
    Results,
    /// Incoming fields with the argument positions overwritten by the results.
    Replace,
    /// Incoming fields that were not arguments, followed by the results.
    Swap,
    /// An explicit list of fields.
    Select(Vec<Field>),
}

impl Fields {
    /// Declares or selects fields by name.
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Fields::Select(names.into_iter().map(|n| Field::Name(n.into())).collect())
    }

    /// Selects fields by position.
    pub fn positions<I: IntoIterator<Item = isize>>(positions: I) -> Self {
        Fields::Select(positions.into_iter().map(Field::Pos).collect())
    }

    /// The empty selection.
    pub fn none() -> Self {
        Fields::Select(Vec::new())
    }

    /// Number of fields of an explicit selection; `0` for the special modes.
    pub fn size(&self) -> usize {
        match self {
            Fields::Select(fields) => fields.len(),
            _ => 0,
        }
    }

    pub fn is_select(&self) -> bool {
        matches!(self, Fields::Select(_))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Field> {
        match self {
            Fields::Select(fields) => fields.iter(),
            _ => [].iter(),
        }
    }

    /// Concatenation of two explicit selections.
    pub fn append(&self, other: &Fields) -> Fields {
        Fields::Select(self.iter().chain(other.iter()).cloned().collect())
    }

    /// The declared fields at `positions`.
    pub fn select(&self, positions: &[usize]) -> Fields {
        let fields = match self {
            Fields::Select(fields) => fields,
            _ => return Fields::none(),
        };
        Fields::Select(positions.iter().map(|&p| fields[p].clone()).collect())
    }

    /// Replaces the declared fields at `positions` with `replacements`, in order.
    pub fn replace(&self, positions: &[usize], replacements: &Fields) -> Fields {
        let mut fields: Vec<Field> = self.iter().cloned().collect();
        for (&pos, field) in positions.iter().zip(replacements.iter()) {
            fields[pos] = field.clone();
        }
        Fields::Select(fields)
    }

    /// Resolves this selector against a declaration, producing positions.
    ///
    /// `All` selects every declared position; the output-only modes are rejected.
    pub fn resolve(&self, declared: &Fields) -> Result<Vec<usize>, FieldsError> {
        let width = declared.size();
        match self {
            Fields::All => Ok((0..width).collect()),
            Fields::Select(fields) => fields
                .iter()
                .map(|field| declared.position_of(field))
                .collect(),
            other => Err(FieldsError::InvalidSelector(
                other.to_string(),
                "as an argument or key selector",
            )),
        }
    }

    /// Position of a single field within this declaration.
    pub fn position_of(&self, field: &Field) -> Result<usize, FieldsError> {
        let width = self.size();
        match field {
            Field::Name(name) => self
                .iter()
                .position(|f| matches!(f, Field::Name(n) if n == name))
                .ok_or_else(|| FieldsError::NotFound(name.clone(), self.to_string())),
            Field::Pos(pos) => {
                let resolved = if *pos < 0 {
                    width as isize + *pos
                } else {
                    *pos
                };
                if resolved < 0 || resolved as usize >= width {
                    Err(FieldsError::OutOfRange { pos: *pos, width })
                } else {
                    Ok(resolved as usize)
                }
            }
        }
    }

    /// Fails if a name is declared twice.
    pub fn ensure_unique(&self) -> Result<(), FieldsError> {
        let mut seen = HashSet::new();
        for field in self.iter() {
            let Field::Name(name) = field else {
                continue;
            };
            if !seen.insert(name.as_str()) {
                return Err(FieldsError::Duplicate(name.clone(), self.to_string()));
            }
        }
        Ok(())
    }
}

impl Display for Fields {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Fields::All => write!(f, "ALL"),
            Fields::Results => write!(f, "RESULTS"),
            Fields::Replace => write!(f, "REPLACE"),
            Fields::Swap => write!(f, "SWAP"),
            Fields::Select(fields) => {
                write!(f, "[")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_names_and_negative_positions() {
        let declared = Fields::names(["a", "b", "c", "d"]);
        assert_eq!(Fields::names(["c", "a"]).resolve(&declared), Ok(vec![2, 0]));
        assert_eq!(Fields::positions([-1, 1]).resolve(&declared), Ok(vec![3, 1]));
        assert_eq!(Fields::All.resolve(&declared), Ok(vec![0, 1, 2, 3]));
    }

    #[test]
    fn rejects_unknown_and_out_of_range() {
        let declared = Fields::names(["a", "b"]);
        assert!(matches!(
            Fields::names(["z"]).resolve(&declared),
            Err(FieldsError::NotFound(..))
        ));
        assert_eq!(
            Fields::positions([2]).resolve(&declared),
            Err(FieldsError::OutOfRange { pos: 2, width: 2 })
        );
        assert!(Fields::Swap.resolve(&declared).is_err());
    }

    #[test]
    fn detects_duplicates() {
        assert!(Fields::names(["a", "b", "a"]).ensure_unique().is_err());
        assert!(Fields::names(["a", "b"]).ensure_unique().is_ok());
    }
}
