//! User-logic interfaces driven by operator stages.
//!
//! Stages own the plumbing (argument views, output composition, failure routing);
//! operations only see their argument tuple and a [`Collector`] to push results into.
//!
//! - [`Function`]: zero or more results per incoming tuple.
//! - [`Filter`]: drop or keep an incoming tuple.
//! - [`Aggregator`]: fold the values of one group into a context, then emit results.
//! - [`Buffer`]: pull the values of one group through an iterator and emit freely.
//! - [`ValueAssertion`] / [`GroupAssertion`]: checks that fail the record or the group.
//!
//! All methods take `&self`: a stage may be invoked from several source threads at
//! once, so operations that keep state between calls guard it themselves.
//!
//! User errors are plain [`anyhow::Error`]s. The stage wraps them with the operator
//! name and the offending tuple before handing them to the branch's trap. Return a
//! [`ResourceExhaustion`](crate::error::ResourceExhaustion) to abort the run instead.

mod aggregators;
mod assertions;
mod buffers;
mod filters;
mod functions;

pub use aggregators::{Average, Count, First, Last, Max, Min, Sum};
pub use assertions::{
    AssertExpression, AssertGroupSizeEquals, AssertGroupSizeLessThan, AssertNotNull,
    AssertSizeEquals,
};
pub use buffers::{FirstN, buffer_fn};
pub use filters::{FilterNotNull, FilterNull, filter_fn};
pub use functions::{Identity, Insert, function_fn};

use crate::error::Result;
use crate::process::FlowProcess;
use crate::tuple::{Fields, Tuple, TupleLike};

/// Per-stage context handed to every operation call.
pub struct OperationContext<'a> {
    /// Name of the element the operation runs in.
    pub name: &'a str,
    /// Declaration of the argument tuples the operation receives.
    pub arguments: &'a Fields,
    pub process: &'a FlowProcess,
}

/// Push-through output handle.
///
/// Every [`emit`](Collector::emit) composes the outgoing tuple and pushes it down the
/// graph before returning, so the emitted value may be a temporary.
pub struct Collector<'a> {
    sink: &'a mut dyn FnMut(&dyn TupleLike) -> Result<()>,
    rejects: Option<&'a mut dyn FnMut(anyhow::Error, Tuple) -> Result<()>>,
    emitted: u64,
}

impl<'a> Collector<'a> {
    pub fn new(sink: &'a mut dyn FnMut(&dyn TupleLike) -> Result<()>) -> Self {
        Self {
            sink,
            rejects: None,
            emitted: 0,
        }
    }

    /// A collector that can also hand failed records to the stage's trap.
    pub fn with_rejects(
        sink: &'a mut dyn FnMut(&dyn TupleLike) -> Result<()>,
        rejects: &'a mut dyn FnMut(anyhow::Error, Tuple) -> Result<()>,
    ) -> Self {
        Self {
            sink,
            rejects: Some(rejects),
            emitted: 0,
        }
    }

    /// Settles the failure of one record on its own, with `tuple` as the offending
    /// record.
    ///
    /// Returns `Ok` when the trap lets the run continue. Without a trap behind this
    /// collector the failure is returned unchanged.
    pub fn reject(&mut self, error: anyhow::Error, tuple: Tuple) -> anyhow::Result<()> {
        match self.rejects.as_mut() {
            Some(rejects) => Ok(rejects(error, tuple)?),
            None => Err(error),
        }
    }

    /// Pushes one result downstream.
    ///
    /// Errors raised downstream come back wrapped in [`anyhow::Error`]; returning them
    /// unchanged lets the stage propagate them without trapping.
    pub fn emit(&mut self, result: &dyn TupleLike) -> anyhow::Result<()> {
        (self.sink)(result)?;
        self.emitted += 1;
        Ok(())
    }

    /// Number of results emitted through this collector.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

/// A per-tuple transformation.
pub trait Function: Send + Sync {
    /// Fields of the results, given the declaration of the arguments.
    fn declared_fields(&self, arguments: &Fields) -> Fields;

    fn prepare(&self, _ctx: &OperationContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn operate(
        &self,
        ctx: &OperationContext<'_>,
        arguments: &dyn TupleLike,
        out: &mut Collector<'_>,
    ) -> anyhow::Result<()>;

    /// Called once per run when every predecessor has completed.
    fn flush(&self, _ctx: &OperationContext<'_>, _out: &mut Collector<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn cleanup(&self, _ctx: &OperationContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A predicate removing tuples from the stream.
pub trait Filter: Send + Sync {
    fn prepare(&self, _ctx: &OperationContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// `true` drops the tuple.
    fn is_remove(&self, ctx: &OperationContext<'_>, arguments: &dyn TupleLike)
    -> anyhow::Result<bool>;

    fn cleanup(&self, _ctx: &OperationContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A fold over the values of one group.
///
/// The context is an owned tuple created by [`start`](Aggregator::start) for each
/// group and consumed by [`complete`](Aggregator::complete).
pub trait Aggregator: Send + Sync {
    fn declared_fields(&self, arguments: &Fields) -> Fields;

    fn prepare(&self, _ctx: &OperationContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn start(&self, ctx: &OperationContext<'_>, key: &dyn TupleLike) -> anyhow::Result<Tuple>;

    fn aggregate(
        &self,
        ctx: &OperationContext<'_>,
        context: &mut Tuple,
        arguments: &dyn TupleLike,
    ) -> anyhow::Result<()>;

    fn complete(
        &self,
        ctx: &OperationContext<'_>,
        context: Tuple,
        out: &mut Collector<'_>,
    ) -> anyhow::Result<()>;

    fn cleanup(&self, _ctx: &OperationContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Free-form processing of one group through an iterator of argument tuples.
pub trait Buffer: Send + Sync {
    fn declared_fields(&self, arguments: &Fields) -> Fields;

    fn prepare(&self, _ctx: &OperationContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Keep the last iterated values visible in results emitted after the iterator is
    /// exhausted, instead of nulling every non-key field.
    fn retain_values(&self) -> bool {
        false
    }

    fn operate(
        &self,
        ctx: &OperationContext<'_>,
        key: &dyn TupleLike,
        values: &mut dyn Iterator<Item = Tuple>,
        out: &mut Collector<'_>,
    ) -> anyhow::Result<()>;

    fn cleanup(&self, _ctx: &OperationContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A check on every tuple; `Some(message)` fails the tuple.
pub trait ValueAssertion: Send + Sync {
    fn check(&self, arguments: &dyn TupleLike) -> Option<String>;
}

/// A check on every group; `Some(message)` fails the group.
pub trait GroupAssertion: Send + Sync {
    fn start(&self, key: &dyn TupleLike) -> Tuple;

    fn aggregate(&self, context: &mut Tuple, arguments: &dyn TupleLike);

    fn check(&self, key: &dyn TupleLike, context: &Tuple) -> Option<String>;
}
