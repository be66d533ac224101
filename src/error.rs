//! Error taxonomy for flow construction and execution.
//!
//! Errors fall into four classes:
//!
//! 1. **Per-record failures** ([`FlowError::Operator`], [`FlowError::Assertion`]) are
//!    raised by user logic, wrapped with the operator identity and the offending tuple,
//!    and handed to the branch's [`TrapHandler`](crate::trap::TrapHandler).
//! 2. **Resource exhaustion** ([`FlowError::ResourceExhausted`]) is always fatal and
//!    never reaches a trap. User code signals it by returning a [`ResourceExhaustion`]
//!    anywhere in its error chain.
//! 3. **Construction failures** ([`FlowError::Topology`], [`FlowError::Fields`]) are
//!    raised while compiling and binding, before any record flows.
//! 4. **Cache invariant violations** are programming errors and are guarded with
//!    `debug_assert!` inside the partial-aggregation cache.

use crate::tuple::Tuple;
use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T, E = FlowError> = std::result::Result<T, E>;

/// Errors raised while compiling or running a flow.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The element graph cannot be turned into a valid duct graph.
    #[error("topology error: {0}")]
    Topology(String),

    /// A field selector could not be resolved for an element.
    #[error("field resolution failed in '{element}'")]
    Fields {
        element: String,
        #[source]
        source: FieldsError,
    },

    /// User logic failed for a single record.
    #[error("operator '{operator}' failed on {}", describe(.tuple))]
    Operator {
        operator: String,
        tuple: Option<Tuple>,
        #[source]
        source: anyhow::Error,
    },

    /// A value or group assertion did not hold.
    #[error("assertion failed in '{operator}' on {}: {message}", describe(.tuple))]
    Assertion {
        operator: String,
        message: String,
        tuple: Option<Tuple>,
    },

    /// User logic ran out of a resource it cannot recover from.
    #[error("resource exhausted in '{operator}'")]
    ResourceExhausted {
        operator: String,
        #[source]
        source: anyhow::Error,
    },

    /// A source or sink tap failed to open, read, write or close.
    #[error("tap '{tap}' failed to {operation}")]
    Tap {
        tap: String,
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A duct received a call it cannot handle in its current position.
    #[error("protocol violation in '{duct}': {message}")]
    Protocol { duct: String, message: String },

    /// Invalid runtime configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl FlowError {
    /// Whether this error is a per-record failure eligible for trapping.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FlowError::Operator { .. } | FlowError::Assertion { .. })
    }

    /// The tuple attached to a per-record failure, if any.
    pub fn tuple(&self) -> Option<&Tuple> {
        match self {
            FlowError::Operator { tuple, .. } | FlowError::Assertion { tuple, .. } => {
                tuple.as_ref()
            }
            _ => None,
        }
    }

    /// The operator identity attached to the error, if any.
    pub fn operator(&self) -> Option<&str> {
        match self {
            FlowError::Operator { operator, .. }
            | FlowError::Assertion { operator, .. }
            | FlowError::ResourceExhausted { operator, .. } => Some(operator),
            _ => None,
        }
    }

    pub(crate) fn protocol(duct: &str, message: impl Into<String>) -> Self {
        FlowError::Protocol {
            duct: duct.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn fields(element: &str, source: FieldsError) -> Self {
        FlowError::Fields {
            element: element.to_string(),
            source,
        }
    }
}

fn describe(tuple: &Option<Tuple>) -> String {
    match tuple {
        Some(t) => format!("tuple {t}"),
        None => "<no tuple>".to_string(),
    }
}

/// Failure to resolve a [`Fields`](crate::tuple::Fields) selector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldsError {
    #[error("field '{0}' not found in {1}")]
    NotFound(String, String),

    #[error("position {pos} out of range for width {width}")]
    OutOfRange { pos: isize, width: usize },

    #[error("duplicate field '{0}' in {1}")]
    Duplicate(String, String),

    #[error("expected {expected} fields, found {actual}")]
    WidthMismatch { expected: usize, actual: usize },

    #[error("selector {0} cannot be used {1}")]
    InvalidSelector(String, &'static str),
}

/// Marker error signalling that user logic exhausted a resource.
///
/// Any operator returning an error whose chain contains this type aborts the run
/// instead of being routed to a trap.
#[derive(Debug, Error)]
#[error("resource exhausted: {0}")]
pub struct ResourceExhaustion(pub String);
