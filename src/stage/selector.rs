//! Output composition: how a stage builds its outgoing tuple.

use crate::error::FieldsError;
use crate::tuple::{Composite, Field, Fields, Narrow, Override, Selected, Slot, TupleLike};

/// Index layout composing an outgoing tuple from the incoming tuple and a result.
///
/// Resolved once when the stage is built; [`compose`](OutputLayout::compose) only
/// constructs a view over the two backings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum OutputLayout {
    /// The result alone.
    Results,
    /// Incoming followed by result.
    All,
    /// Incoming with the argument positions remapped onto the result.
    Replace(Vec<Option<usize>>),
    /// The non-argument incoming positions followed by the result.
    Swap(Vec<usize>),
    /// An explicit selection over incoming and result.
    Select(Vec<Slot>),
}

impl OutputLayout {
    /// Resolves `selector` for a stage whose incoming tuples are declared by
    /// `incoming`, whose arguments sit at `arguments` and whose results are declared by
    /// `declared`. Returns the layout with the declaration of the outgoing tuples.
    pub(crate) fn resolve(
        selector: &Fields,
        incoming: &Fields,
        arguments: &[usize],
        declared: &Fields,
    ) -> Result<(OutputLayout, Fields), FieldsError> {
        let (layout, fields) = match selector {
            Fields::Results => (OutputLayout::Results, declared.clone()),
            Fields::All => (OutputLayout::All, incoming.append(declared)),
            Fields::Replace => {
                if arguments.len() != declared.size() {
                    return Err(FieldsError::WidthMismatch {
                        expected: arguments.len(),
                        actual: declared.size(),
                    });
                }
                let mut remap = vec![None; incoming.size()];
                for (j, &pos) in arguments.iter().enumerate() {
                    remap[pos] = Some(j);
                }
                (
                    OutputLayout::Replace(remap),
                    incoming.replace(arguments, declared),
                )
            }
            Fields::Swap => {
                let remainder: Vec<usize> = (0..incoming.size())
                    .filter(|p| !arguments.contains(p))
                    .collect();
                let fields = incoming.select(&remainder).append(declared);
                (OutputLayout::Swap(remainder), fields)
            }
            Fields::Select(selected) => {
                let combined = incoming.append(declared);
                let width = incoming.size();
                let mut slots = Vec::with_capacity(selected.len());
                let mut fields: Vec<Field> = Vec::with_capacity(selected.len());
                for field in selected {
                    let pos = combined.position_of(field)?;
                    slots.push(if pos < width {
                        Slot::Incoming(pos)
                    } else {
                        Slot::Result(pos - width)
                    });
                    fields.extend(combined.select(&[pos]).iter().cloned());
                }
                (OutputLayout::Select(slots), Fields::Select(fields))
            }
        };
        fields.ensure_unique()?;
        Ok((layout, fields))
    }

    /// Hands the outgoing view over `incoming` and `result` to `f`.
    pub(crate) fn compose<R>(
        &self,
        incoming: &dyn TupleLike,
        result: &dyn TupleLike,
        f: impl FnOnce(&dyn TupleLike) -> R,
    ) -> R {
        match self {
            OutputLayout::Results => f(result),
            OutputLayout::All => f(&Composite::pair(incoming, result)),
            OutputLayout::Replace(remap) => f(&Override::new(incoming, result, remap)),
            OutputLayout::Swap(remainder) => {
                let rest = Narrow::new(incoming, remainder);
                f(&Composite::pair(&rest, result))
            }
            OutputLayout::Select(slots) => f(&Selected::new(incoming, result, slots)),
        }
    }

    /// Whether this layout reads the argument positions of the incoming tuple.
    pub(crate) fn uses_arguments(selector: &Fields) -> bool {
        matches!(selector, Fields::Replace | Fields::Swap)
    }
}
