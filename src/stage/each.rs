//! The per-tuple stage.

use super::{FailureRouter, OutputLayout};
use crate::duct::{Duct, DuctId, Incoming, Link, StreamGraph};
use crate::error::{FlowError, Result};
use crate::operation::{Collector, Filter, Function, OperationContext, ValueAssertion};
use crate::process::FlowProcess;
use crate::scope::Scope;
use crate::tuple::{Fields, Narrow, Tuple, TupleLike};
use std::sync::Arc;

/// The operation run by an [`EachStage`].
pub(crate) enum EachOp {
    Function(Arc<dyn Function>),
    Filter(Arc<dyn Filter>),
    Assertion(Arc<dyn ValueAssertion>),
}

enum Step {
    Function {
        function: Arc<dyn Function>,
        layout: OutputLayout,
        // stands in for the incoming tuple of results emitted at flush
        flush_base: Tuple,
    },
    Filter(Arc<dyn Filter>),
    Assertion(Arc<dyn ValueAssertion>),
}

/// Runs a function, filter or value assertion on every incoming tuple.
pub(crate) struct EachStage {
    name: String,
    step: Step,
    arguments: Vec<usize>,
    argument_fields: Fields,
    next: Link,
    failures: FailureRouter,
    process: Arc<FlowProcess>,
}

impl EachStage {
    /// Builds the stage for tuples declared by `incoming`; returns it with the
    /// declaration of its outgoing tuples.
    pub(crate) fn new(
        name: &str,
        op: EachOp,
        incoming: &Fields,
        scope: &Scope,
        failures: FailureRouter,
        process: Arc<FlowProcess>,
    ) -> Result<(Self, Fields)> {
        let fields_error = |e| FlowError::fields(name, e);
        let arguments = scope.arguments.resolve(incoming).map_err(fields_error)?;
        let argument_fields = incoming.select(&arguments);
        let (step, outgoing) = match op {
            EachOp::Function(function) => {
                let declared = function.declared_fields(&argument_fields);
                let selector = scope.output_or(&Fields::Results);
                let (layout, outgoing) =
                    OutputLayout::resolve(selector, incoming, &arguments, &declared)
                        .map_err(fields_error)?;
                let step = Step::Function {
                    function,
                    layout,
                    flush_base: Tuple::nulls(incoming.size()),
                };
                (step, outgoing)
            }
            EachOp::Filter(filter) => (Step::Filter(filter), incoming.clone()),
            EachOp::Assertion(assertion) => (Step::Assertion(assertion), incoming.clone()),
        };
        let stage = Self {
            name: name.to_string(),
            step,
            arguments,
            argument_fields,
            next: Link::new(name),
            failures,
            process,
        };
        Ok((stage, outgoing))
    }

    fn context(&self) -> OperationContext<'_> {
        OperationContext {
            name: &self.name,
            arguments: &self.argument_fields,
            process: &self.process,
        }
    }

    fn call_function(
        &self,
        layout: &OutputLayout,
        incoming: &dyn TupleLike,
        call: impl FnOnce(&mut Collector<'_>) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let mut sink =
            |result: &dyn TupleLike| layout.compose(incoming, result, |out| self.next.receive_tuple(out));
        let mut rejects =
            |error: anyhow::Error, tuple: Tuple| self.failures.settle(Err(error), || Some(tuple));
        let mut out = Collector::with_rejects(&mut sink, &mut rejects);
        call(&mut out)
    }
}

impl Duct for EachStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, id: DuctId, graph: &StreamGraph) -> Result<()> {
        self.next.bind(id, graph)
    }

    fn prepare(&self) -> Result<()> {
        let ctx = self.context();
        let prepared = match &self.step {
            Step::Function { function, .. } => function.prepare(&ctx),
            Step::Filter(filter) => filter.prepare(&ctx),
            Step::Assertion(_) => Ok(()),
        };
        self.failures.lifecycle(prepared)
    }

    fn start(&self, _from: DuctId) -> Result<()> {
        self.next.start()
    }

    fn receive(&self, _from: DuctId, incoming: Incoming<'_>) -> Result<()> {
        let Incoming::Tuple(tuple) = incoming else {
            return Err(FlowError::protocol(&self.name, "cannot process a grouping"));
        };
        let arguments = Narrow::new(tuple, &self.arguments);
        let ctx = self.context();
        match &self.step {
            Step::Function {
                function, layout, ..
            } => {
                let outcome = self.call_function(layout, tuple, |out| {
                    function.operate(&ctx, &arguments, out)
                });
                self.failures.settle(outcome, || Some(tuple.to_tuple()))
            }
            Step::Filter(filter) => match filter.is_remove(&ctx, &arguments) {
                Ok(true) => Ok(()),
                Ok(false) => self.next.receive(incoming),
                Err(e) => self.failures.settle(Err(e), || Some(tuple.to_tuple())),
            },
            Step::Assertion(assertion) => match assertion.check(&arguments) {
                None => self.next.receive(incoming),
                Some(message) => self.failures.assertion(message, Some(tuple.to_tuple())),
            },
        }
    }

    fn complete(&self, _from: DuctId) -> Result<()> {
        if let Step::Function {
            function,
            layout,
            flush_base,
        } = &self.step
        {
            let ctx = self.context();
            let outcome = self.call_function(layout, flush_base, |out| function.flush(&ctx, out));
            self.failures.settle(outcome, || None)?;
        }
        self.next.complete()
    }

    fn cleanup(&self) -> Result<()> {
        let ctx = self.context();
        let cleaned = match &self.step {
            Step::Function { function, .. } => function.cleanup(&ctx),
            Step::Filter(filter) => filter.cleanup(&ctx),
            Step::Assertion(_) => Ok(()),
        };
        self.failures.lifecycle(cleaned)
    }
}
