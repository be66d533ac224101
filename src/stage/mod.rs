//! Operator stages: the ducts that run user logic.
//!
//! A stage owns the layouts that turn an incoming tuple into the argument view its
//! operation sees, and the operation's results into the outgoing tuple. Layouts are
//! resolved once at construction; per record a stage only builds borrow views.
//!
//! - [`EachStage`]: functions, filters and value assertions, one tuple at a time;
//! - [`AggregatorStage`], [`GroupAssertionStage`], [`BufferStage`]: the Every stages,
//!   driven group by group through [`Reducing`](crate::duct::Reducing);
//! - [`SourceStage`] / [`SinkStage`]: the bridges to taps.
//!
//! Failures of user logic go through a [`FailureRouter`].

mod each;
mod every;
mod selector;
mod tap;

pub(crate) use each::{EachOp, EachStage};
pub(crate) use every::{AggregatorStage, BufferStage, GroupAssertionStage};
pub(crate) use selector::OutputLayout;
pub(crate) use tap::{SinkStage, SourceStage};

use crate::error::{FlowError, ResourceExhaustion, Result};
use crate::process::{FlowProcess, counters};
use crate::trap::TrapHandler;
use crate::tuple::Tuple;
use log::warn;
use std::sync::Arc;

/// Routes the failures of one operator.
///
/// Classification, in order:
/// 1. a [`FlowError`] raised downstream and passed back through a collector is
///    returned unchanged;
/// 2. an error with a [`ResourceExhaustion`] in its chain aborts the run;
/// 3. anything else is a per-record failure for the branch's trap.
pub(crate) struct FailureRouter {
    operator: String,
    trap: Arc<dyn TrapHandler>,
    process: Arc<FlowProcess>,
}

impl FailureRouter {
    pub(crate) fn new(operator: &str, trap: Arc<dyn TrapHandler>, process: Arc<FlowProcess>) -> Self {
        Self {
            operator: operator.to_string(),
            trap,
            process,
        }
    }

    /// Settles the outcome of one user call on the record built by `tuple`.
    pub(crate) fn settle(
        &self,
        result: anyhow::Result<()>,
        tuple: impl FnOnce() -> Option<Tuple>,
    ) -> Result<()> {
        let Err(error) = result else {
            return Ok(());
        };
        let error = match error.downcast::<FlowError>() {
            Ok(downstream) => return Err(downstream),
            Err(error) => error,
        };
        if error.chain().any(|cause| cause.is::<ResourceExhaustion>()) {
            return Err(FlowError::ResourceExhausted {
                operator: self.operator.clone(),
                source: error,
            });
        }
        self.trap(FlowError::Operator {
            operator: self.operator.clone(),
            tuple: tuple(),
            source: error,
        })
    }

    /// Routes a failed assertion.
    pub(crate) fn assertion(&self, message: String, tuple: Option<Tuple>) -> Result<()> {
        self.trap(FlowError::Assertion {
            operator: self.operator.clone(),
            message,
            tuple,
        })
    }

    /// Maps a failure outside record processing (prepare, cleanup); always fatal.
    pub(crate) fn lifecycle(&self, result: anyhow::Result<()>) -> Result<()> {
        result.map_err(|source| {
            match source.downcast::<FlowError>() {
                Ok(flow) => flow,
                Err(source) => FlowError::Operator {
                    operator: self.operator.clone(),
                    tuple: None,
                    source,
                },
            }
        })
    }

    fn trap(&self, error: FlowError) -> Result<()> {
        warn!("'{}' failed: {error}", self.operator);
        self.trap.handle_exception(error)?;
        self.process.increment_engine(counters::TUPLES_TRAPPED, 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowConfig;
    use crate::trap::{CollectingTrap, FailFast};
    use crate::tuple;
    use anyhow::{Context, anyhow};

    fn router(trap: Arc<dyn TrapHandler>) -> (FailureRouter, Arc<FlowProcess>) {
        let process = Arc::new(FlowProcess::new("test", FlowConfig::sequential()));
        (FailureRouter::new("op", trap, Arc::clone(&process)), process)
    }

    #[test]
    fn user_errors_reach_the_trap_with_their_tuple() {
        let trap = CollectingTrap::new();
        let (router, process) = router(Arc::new(trap.clone()));
        router
            .settle(Err(anyhow!("boom")), || Some(tuple![7]))
            .unwrap();
        assert_eq!(trap.tuples(), vec![tuple![7]]);
        assert_eq!(
            process.counter(crate::process::ENGINE_GROUP, counters::TUPLES_TRAPPED),
            1
        );
    }

    #[test]
    fn exhaustion_bypasses_the_trap() {
        let trap = CollectingTrap::new();
        let (router, _) = router(Arc::new(trap.clone()));
        let err = router
            .settle(
                Err(anyhow::Error::new(ResourceExhaustion("heap".into())).context("while caching")),
                || Some(tuple![1]),
            )
            .unwrap_err();
        assert!(matches!(err, FlowError::ResourceExhausted { .. }));
        assert!(trap.is_empty());
    }

    #[test]
    fn downstream_errors_propagate_unchanged() {
        let trap = CollectingTrap::new();
        let (router, _) = router(Arc::new(trap.clone()));
        let downstream: anyhow::Result<()> =
            Err(FlowError::Topology("later".into())).context("emitting");
        let err = router.settle(downstream, || None).unwrap_err();
        assert!(matches!(err, FlowError::Topology(_)));
        assert!(trap.is_empty());
    }

    #[test]
    fn fail_fast_aborts() {
        let (router, _) = router(Arc::new(FailFast));
        let err = router.assertion("nope".into(), Some(tuple![1])).unwrap_err();
        assert!(matches!(err, FlowError::Assertion { .. }));
    }
}
