//! Edge metadata between two elements.
//!
//! A [`Scope`] travels on every edge of an [`ElementGraph`](crate::element::ElementGraph).
//! The planner fills in the selectors; the compiler fills in `name` (the branch name a
//! gate uses to order its inputs) and `fields` (the declaration of the tuples on the
//! edge).
//!
//! Which selectors matter depends on the element the edge leads into:
//!
//! | target                       | used                                                 |
//! |------------------------------|------------------------------------------------------|
//! | function / aggregator / buffer | `arguments`, `output`                              |
//! | filter / assertion           | `arguments`                                          |
//! | group-by / co-group          | `ordinal`, `grouping`, `sorting`, `reverse`, `blocking` |
//! | merge / sink                 | nothing                                              |

use crate::tuple::Fields;
use serde::{Deserialize, Serialize};

/// Metadata carried by one edge.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    /// Branch name; set by the compiler to the name of the edge's source element.
    pub name: String,
    /// Position of this branch among the inputs of a grouping element.
    pub ordinal: usize,
    /// Whether the edge is a full materialisation boundary.
    pub blocking: bool,
    /// Declaration of the tuples flowing on this edge; set by the compiler.
    pub fields: Fields,
    /// Argument selector handed to the target operation.
    pub arguments: Fields,
    /// Output selector of the target operation; `None` means the operation's default.
    pub output: Option<Fields>,
    /// Grouping key selector for grouping targets.
    pub grouping: Option<Fields>,
    /// Secondary sort selector applied within each group.
    pub sorting: Option<Fields>,
    /// Replay keys in descending order.
    pub reverse: bool,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope for one branch of a grouping element.
    pub fn grouping(ordinal: usize, key: Fields) -> Self {
        Self {
            ordinal,
            blocking: true,
            grouping: Some(key),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_arguments(mut self, arguments: Fields) -> Self {
        self.arguments = arguments;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: Fields) -> Self {
        self.output = Some(output);
        self
    }

    #[must_use]
    pub fn with_ordinal(mut self, ordinal: usize) -> Self {
        self.ordinal = ordinal;
        self
    }

    #[must_use]
    pub fn with_sorting(mut self, sorting: Fields) -> Self {
        self.sorting = Some(sorting);
        self
    }

    #[must_use]
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    #[must_use]
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    /// Output selector, defaulting to `default` when the planner left it unset.
    pub fn output_or<'a>(&'a self, default: &'a Fields) -> &'a Fields {
        self.output.as_ref().unwrap_or(default)
    }
}
