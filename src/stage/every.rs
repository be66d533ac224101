//! The per-group stages.
//!
//! Every stages sit behind a gate and are driven key by key through
//! [`Reducing`]. Each group is a bracket:
//!
//! ```text
//! start_group(key)  receive(row)*  complete_group(key ++ results so far)
//! ```
//!
//! Aggregators and group assertions forward the bracket to the next reducer of the
//! chain, so a chain of aggregators extends the group result one stage at a time.
//! Buffers consume the whole grouping instead and emit plain tuples.
//!
//! Gates replay groups from a single thread, so the per-group state below is only
//! ever touched by one caller at a time.

use super::{FailureRouter, OutputLayout};
use crate::duct::{Duct, DuctId, Incoming, Link, Reducing, StreamGraph};
use crate::error::{FieldsError, FlowError, Result};
use crate::operation::{Aggregator, Buffer, Collector, GroupAssertion, OperationContext};
use crate::process::FlowProcess;
use crate::scope::Scope;
use crate::tuple::{Composite, Fields, Narrow, Tuple, TupleLike};
use crate::utils::lock;
use std::cell::RefCell;
use std::sync::{Arc, Mutex};

/// Resolves the argument positions of an Every stage against the group values.
fn resolve_arguments(name: &str, values: &Fields, scope: &Scope) -> Result<(Vec<usize>, Fields)> {
    let arguments = scope
        .arguments
        .resolve(values)
        .map_err(|e| FlowError::fields(name, e))?;
    let fields = values.select(&arguments);
    Ok((arguments, fields))
}

/// Folds the rows of each group into one context and appends its results to the
/// group result.
pub(crate) struct AggregatorStage {
    name: String,
    aggregator: Arc<dyn Aggregator>,
    arguments: Vec<usize>,
    argument_fields: Fields,
    layout: OutputLayout,
    context: Mutex<Option<Tuple>>,
    next: Link,
    failures: FailureRouter,
    process: Arc<FlowProcess>,
}

impl AggregatorStage {
    /// `values` declares the rows of a group, `result` the group result reaching
    /// this stage. Returns the stage with the declaration of the extended result.
    pub(crate) fn new(
        name: &str,
        aggregator: Arc<dyn Aggregator>,
        values: &Fields,
        result: &Fields,
        scope: &Scope,
        failures: FailureRouter,
        process: Arc<FlowProcess>,
    ) -> Result<(Self, Fields)> {
        let (arguments, argument_fields) = resolve_arguments(name, values, scope)?;
        let declared = aggregator.declared_fields(&argument_fields);
        let selector = scope.output_or(&Fields::All);
        if OutputLayout::uses_arguments(selector) {
            return Err(FlowError::fields(
                name,
                FieldsError::InvalidSelector(selector.to_string(), "on an aggregator"),
            ));
        }
        let (layout, outgoing) = OutputLayout::resolve(selector, result, &[], &declared)
            .map_err(|e| FlowError::fields(name, e))?;
        let stage = Self {
            name: name.to_string(),
            aggregator,
            arguments,
            argument_fields,
            layout,
            context: Mutex::new(None),
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
}

impl Duct for AggregatorStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, id: DuctId, graph: &StreamGraph) -> Result<()> {
        self.next.bind(id, graph)
    }

    fn prepare(&self) -> Result<()> {
        self.failures.lifecycle(self.aggregator.prepare(&self.context()))
    }

    fn start(&self, _from: DuctId) -> Result<()> {
        self.next.start()
    }

    fn receive(&self, _from: DuctId, incoming: Incoming<'_>) -> Result<()> {
        let Incoming::Tuple(row) = incoming else {
            return Err(FlowError::protocol(&self.name, "expected group rows"));
        };
        let outcome = match lock(&self.context).as_mut() {
            Some(context) => {
                let arguments = Narrow::new(row, &self.arguments);
                self.aggregator.aggregate(&self.context(), context, &arguments)
            }
            None => Ok(()),
        };
        self.failures.settle(outcome, || Some(row.to_tuple()))?;
        if self.next.reducing().is_some() {
            self.next.receive(incoming)?;
        }
        Ok(())
    }

    fn complete(&self, _from: DuctId) -> Result<()> {
        self.next.complete()
    }

    fn cleanup(&self) -> Result<()> {
        *lock(&self.context) = None;
        self.failures.lifecycle(self.aggregator.cleanup(&self.context()))
    }

    fn as_reducing(&self) -> Option<&dyn Reducing> {
        Some(self)
    }
}

impl Reducing for AggregatorStage {
    fn start_group(&self, _from: DuctId, key: &dyn TupleLike) -> Result<()> {
        let started = self.aggregator.start(&self.context(), key);
        let outcome = match started {
            Ok(context) => {
                *lock(&self.context) = Some(context);
                Ok(())
            }
            Err(e) => {
                *lock(&self.context) = None;
                Err(e)
            }
        };
        self.failures.settle(outcome, || Some(key.to_tuple()))?;
        self.next.start_group(key)
    }

    fn complete_group(&self, _from: DuctId, result: &dyn TupleLike) -> Result<()> {
        // a group whose start failed was trapped; nothing follows it downstream
        let Some(context) = lock(&self.context).take() else {
            return Ok(());
        };
        let mut sink = |values: &dyn TupleLike| {
            self.layout
                .compose(result, values, |out| self.next.emit_group_result(out))
        };
        let mut out = Collector::new(&mut sink);
        let outcome = self.aggregator.complete(&self.context(), context, &mut out);
        self.failures.settle(outcome, || Some(result.to_tuple()))
    }
}

/// Checks each group; a failing group is trapped and not passed on.
pub(crate) struct GroupAssertionStage {
    name: String,
    assertion: Arc<dyn GroupAssertion>,
    arguments: Vec<usize>,
    key_positions: Vec<usize>,
    context: Mutex<Option<Tuple>>,
    next: Link,
    failures: FailureRouter,
}

impl GroupAssertionStage {
    /// The group result passes through unchanged, so the outgoing declaration is
    /// `result`.
    pub(crate) fn new(
        name: &str,
        assertion: Arc<dyn GroupAssertion>,
        values: &Fields,
        key_width: usize,
        scope: &Scope,
        failures: FailureRouter,
    ) -> Result<Self> {
        let (arguments, _) = resolve_arguments(name, values, scope)?;
        Ok(Self {
            name: name.to_string(),
            assertion,
            arguments,
            key_positions: (0..key_width).collect(),
            context: Mutex::new(None),
            next: Link::new(name),
            failures,
        })
    }
}

impl Duct for GroupAssertionStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, id: DuctId, graph: &StreamGraph) -> Result<()> {
        self.next.bind(id, graph)
    }

    fn start(&self, _from: DuctId) -> Result<()> {
        self.next.start()
    }

    fn receive(&self, _from: DuctId, incoming: Incoming<'_>) -> Result<()> {
        let Incoming::Tuple(row) = incoming else {
            return Err(FlowError::protocol(&self.name, "expected group rows"));
        };
        if let Some(context) = lock(&self.context).as_mut() {
            self.assertion
                .aggregate(context, &Narrow::new(row, &self.arguments));
        }
        if self.next.reducing().is_some() {
            self.next.receive(incoming)?;
        }
        Ok(())
    }

    fn complete(&self, _from: DuctId) -> Result<()> {
        self.next.complete()
    }

    fn cleanup(&self) -> Result<()> {
        *lock(&self.context) = None;
        Ok(())
    }

    fn as_reducing(&self) -> Option<&dyn Reducing> {
        Some(self)
    }
}

impl Reducing for GroupAssertionStage {
    fn start_group(&self, _from: DuctId, key: &dyn TupleLike) -> Result<()> {
        *lock(&self.context) = Some(self.assertion.start(key));
        self.next.start_group(key)
    }

    fn complete_group(&self, _from: DuctId, result: &dyn TupleLike) -> Result<()> {
        let Some(context) = lock(&self.context).take() else {
            return Ok(());
        };
        let key = Narrow::new(result, &self.key_positions);
        match self.assertion.check(&key, &context) {
            None => self.next.emit_group_result(result),
            Some(message) => self.failures.assertion(message, Some(result.to_tuple())),
        }
    }
}

/// Hands each grouping to a [`Buffer`] as an iterator over its rows.
///
/// Results are composed with the "current" row: the row last pulled from the
/// iterator. Before the first pull and after the iterator is exhausted the current
/// row carries the key values only, every other position null, unless the buffer
/// retains values.
pub(crate) struct BufferStage {
    name: String,
    buffer: Arc<dyn Buffer>,
    arguments: Vec<usize>,
    argument_fields: Fields,
    key_positions: Vec<usize>,
    values_width: usize,
    layout: OutputLayout,
    next: Link,
    failures: FailureRouter,
    process: Arc<FlowProcess>,
}

impl BufferStage {
    /// `key_positions` locate the grouping key within the `values` declaration.
    pub(crate) fn new(
        name: &str,
        buffer: Arc<dyn Buffer>,
        values: &Fields,
        key_positions: Vec<usize>,
        scope: &Scope,
        failures: FailureRouter,
        process: Arc<FlowProcess>,
    ) -> Result<(Self, Fields)> {
        let (arguments, argument_fields) = resolve_arguments(name, values, scope)?;
        let declared = buffer.declared_fields(&argument_fields);
        let selector = scope.output_or(&Fields::Results);
        let (layout, outgoing) = OutputLayout::resolve(selector, values, &arguments, &declared)
            .map_err(|e| FlowError::fields(name, e))?;
        let stage = Self {
            name: name.to_string(),
            buffer,
            arguments,
            argument_fields,
            key_positions,
            values_width: values.size(),
            layout,
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

    fn header(&self, key: &dyn TupleLike) -> Tuple {
        let mut header = Tuple::nulls(self.values_width);
        for (i, &pos) in self.key_positions.iter().enumerate() {
            header.set(pos, key.get(i).clone());
        }
        header
    }
}

struct GroupValues<'g, 'c> {
    rows: Box<dyn Iterator<Item = Composite<'g>> + 'g>,
    current: &'c RefCell<Tuple>,
    header: &'c Tuple,
    arguments: &'c [usize],
    retain: bool,
    exhausted: bool,
}

impl Iterator for GroupValues<'_, '_> {
    type Item = Tuple;

    fn next(&mut self) -> Option<Tuple> {
        if self.exhausted {
            return None;
        }
        match self.rows.next() {
            Some(row) => {
                let mut current = self.current.borrow_mut();
                row.copy_into(&mut current);
                Some(current.select(self.arguments))
            }
            None => {
                self.exhausted = true;
                if !self.retain {
                    self.header.copy_into(&mut self.current.borrow_mut());
                }
                None
            }
        }
    }
}

impl Duct for BufferStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, id: DuctId, graph: &StreamGraph) -> Result<()> {
        self.next.bind(id, graph)
    }

    fn prepare(&self) -> Result<()> {
        self.failures.lifecycle(self.buffer.prepare(&self.context()))
    }

    fn start(&self, _from: DuctId) -> Result<()> {
        self.next.start()
    }

    fn receive(&self, _from: DuctId, incoming: Incoming<'_>) -> Result<()> {
        let Incoming::Grouping(grouping) = incoming else {
            return Err(FlowError::protocol(&self.name, "expected a whole grouping"));
        };
        let key = grouping.key();
        let header = self.header(key);
        let current = RefCell::new(header.clone());
        let mut values = GroupValues {
            rows: grouping.iter(),
            current: &current,
            header: &header,
            arguments: &self.arguments,
            retain: self.buffer.retain_values(),
            exhausted: false,
        };
        let mut sink = |result: &dyn TupleLike| {
            let current = current.borrow();
            self.layout
                .compose(&*current, result, |out| self.next.receive_tuple(out))
        };
        let mut out = Collector::new(&mut sink);
        let outcome = self
            .buffer
            .operate(&self.context(), key, &mut values, &mut out);
        self.failures.settle(outcome, || Some(key.clone()))
    }

    fn complete(&self, _from: DuctId) -> Result<()> {
        self.next.complete()
    }

    fn cleanup(&self) -> Result<()> {
        self.failures.lifecycle(self.buffer.cleanup(&self.context()))
    }

    fn as_reducing(&self) -> Option<&dyn Reducing> {
        Some(self)
    }

    fn accepts_grouping(&self) -> bool {
        true
    }
}

impl Reducing for BufferStage {
    fn start_group(&self, _from: DuctId, _key: &dyn TupleLike) -> Result<()> {
        Ok(())
    }

    fn complete_group(&self, _from: DuctId, _result: &dyn TupleLike) -> Result<()> {
        Ok(())
    }
}
