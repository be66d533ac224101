//! Bridges between taps and the duct graph.

use crate::duct::{Duct, DuctId, Incoming, Link, StreamGraph};
use crate::error::{FlowError, Result};
use crate::process::{FlowProcess, counters};
use crate::tap::{SinkTap, SourceTap, TupleOutput};
use crate::utils::lock;
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

fn tap_error(tap: &str, operation: &'static str, source: anyhow::Error) -> FlowError {
    FlowError::Tap {
        tap: tap.to_string(),
        operation,
        source,
    }
}

/// Drives one source tap into the graph.
///
/// Sources have no predecessors: the flow calls [`start_run`](SourceStage::start_run),
/// [`run`](SourceStage::run) and [`complete_run`](SourceStage::complete_run) directly.
pub(crate) struct SourceStage {
    name: String,
    tap: Arc<dyn SourceTap>,
    next: Link,
    process: Arc<FlowProcess>,
}

impl SourceStage {
    pub(crate) fn new(name: &str, tap: Arc<dyn SourceTap>, process: Arc<FlowProcess>) -> Self {
        Self {
            name: name.to_string(),
            tap,
            next: Link::new(name),
            process,
        }
    }

    pub(crate) fn start_run(&self) -> Result<()> {
        self.next.start()
    }

    /// Reads the tap to the end, pushing every tuple downstream.
    ///
    /// The input is closed exactly once, also when reading or a downstream stage
    /// fails; the first failure is returned.
    pub(crate) fn run(&self) -> Result<()> {
        let identifier = self.tap.identifier();
        let mut input = self
            .tap
            .open_input()
            .map_err(|e| tap_error(identifier, "open", e))?;
        let mut read = 0u64;
        let outcome = input.by_ref().try_for_each(|item| {
            let tuple = item.map_err(|e| tap_error(identifier, "read", e))?;
            read += 1;
            self.next.receive_tuple(&tuple)
        });
        self.process.increment_engine(counters::TUPLES_READ, read);
        debug!("source '{}' read {read} tuples", self.name);
        let closed = input.close().map_err(|e| tap_error(identifier, "close", e));
        outcome?;
        closed
    }

    pub(crate) fn complete_run(&self) -> Result<()> {
        self.next.complete()
    }
}

impl Duct for SourceStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, id: DuctId, graph: &StreamGraph) -> Result<()> {
        self.next.bind(id, graph)
    }

    fn start(&self, _from: DuctId) -> Result<()> {
        Err(FlowError::protocol(&self.name, "a source has no predecessors"))
    }

    fn receive(&self, _from: DuctId, _incoming: Incoming<'_>) -> Result<()> {
        Err(FlowError::protocol(&self.name, "a source has no predecessors"))
    }

    fn complete(&self, _from: DuctId) -> Result<()> {
        Err(FlowError::protocol(&self.name, "a source has no predecessors"))
    }
}

/// Writes every incoming tuple to a sink tap.
///
/// The output is opened at prepare and closed once at cleanup.
pub(crate) struct SinkStage {
    name: String,
    tap: Arc<dyn SinkTap>,
    output: Mutex<Option<Box<dyn TupleOutput>>>,
    written: AtomicU64,
    process: Arc<FlowProcess>,
}

impl SinkStage {
    pub(crate) fn new(name: &str, tap: Arc<dyn SinkTap>, process: Arc<FlowProcess>) -> Self {
        Self {
            name: name.to_string(),
            tap,
            output: Mutex::new(None),
            written: AtomicU64::new(0),
            process,
        }
    }
}

impl Duct for SinkStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&self) -> Result<()> {
        let opened = self
            .tap
            .open_output()
            .map_err(|e| tap_error(self.tap.identifier(), "open", e))?;
        *lock(&self.output) = Some(opened);
        Ok(())
    }

    fn start(&self, _from: DuctId) -> Result<()> {
        Ok(())
    }

    fn receive(&self, _from: DuctId, incoming: Incoming<'_>) -> Result<()> {
        let Incoming::Tuple(tuple) = incoming else {
            return Err(FlowError::protocol(&self.name, "cannot write a grouping"));
        };
        let mut output = lock(&self.output);
        let Some(out) = output.as_mut() else {
            return Err(FlowError::protocol(&self.name, "write before prepare"));
        };
        out.write(tuple)
            .map_err(|e| tap_error(self.tap.identifier(), "write", e))?;
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn complete(&self, _from: DuctId) -> Result<()> {
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        let written = self.written.swap(0, Ordering::AcqRel);
        self.process
            .increment_engine(counters::TUPLES_WRITTEN, written);
        match lock(&self.output).take() {
            Some(mut out) => out
                .close()
                .map_err(|e| tap_error(self.tap.identifier(), "close", e)),
            None => Ok(()),
        }
    }
}
