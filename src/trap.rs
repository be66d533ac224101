//! Per-branch handling of failed records.
//!
//! When user logic fails on a record, the stage wraps the failure into a
//! [`FlowError::Operator`] or [`FlowError::Assertion`] and hands it to the
//! [`TrapHandler`] of its branch. Returning `Ok` drops the record and continues the
//! run; returning `Err` aborts it.
//!
//! Traps are registered by branch name on the
//! [`ElementGraph`](crate::element::ElementGraph); branches without one use
//! [`FailFast`].

use crate::error::{FlowError, Result};
use crate::tap::{SinkTap, TupleOutput};
use crate::tuple::Tuple;
use crate::utils::lock;
use log::warn;
use std::sync::{Arc, Mutex};

/// Receives the per-record failures of one or more branches.
pub trait TrapHandler: Send + Sync {
    /// `Ok` continues the run without the failed record; `Err` aborts it.
    fn handle_exception(&self, error: FlowError) -> Result<()>;

    /// Called once after every run.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Aborts the run on the first failure.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailFast;

impl TrapHandler for FailFast {
    fn handle_exception(&self, error: FlowError) -> Result<()> {
        Err(error)
    }
}

/// Keeps every failure in memory and continues.
///
/// Clones share the same storage.
#[derive(Clone, Default)]
pub struct CollectingTrap {
    errors: Arc<Mutex<Vec<FlowError>>>,
}

impl CollectingTrap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.errors).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rendered messages of the collected failures.
    pub fn messages(&self) -> Vec<String> {
        lock(&self.errors).iter().map(ToString::to_string).collect()
    }

    /// Tuples attached to the collected failures.
    pub fn tuples(&self) -> Vec<Tuple> {
        lock(&self.errors)
            .iter()
            .filter_map(|e| e.tuple().cloned())
            .collect()
    }

    /// Removes and returns every collected failure.
    pub fn take(&self) -> Vec<FlowError> {
        std::mem::take(&mut *lock(&self.errors))
    }
}

impl TrapHandler for CollectingTrap {
    fn handle_exception(&self, error: FlowError) -> Result<()> {
        lock(&self.errors).push(error);
        Ok(())
    }
}

/// Writes the tuple of every failure to a sink tap.
///
/// The sink is opened on the first failure of a run and closed when the run ends.
/// Failures without a tuple are logged and dropped.
pub struct SinkTrap {
    tap: Box<dyn SinkTap>,
    output: Mutex<Option<Box<dyn TupleOutput>>>,
}

impl SinkTrap {
    pub fn new(tap: impl SinkTap + 'static) -> Self {
        Self {
            tap: Box::new(tap),
            output: Mutex::new(None),
        }
    }

    fn tap_error(&self, operation: &'static str, source: anyhow::Error) -> FlowError {
        FlowError::Tap {
            tap: self.tap.identifier().to_string(),
            operation,
            source,
        }
    }
}

impl TrapHandler for SinkTrap {
    fn handle_exception(&self, error: FlowError) -> Result<()> {
        let Some(tuple) = error.tuple() else {
            warn!("trap '{}' dropping failure without a tuple: {error}", self.tap.identifier());
            return Ok(());
        };
        let mut output = lock(&self.output);
        if output.is_none() {
            let opened = self
                .tap
                .open_output()
                .map_err(|e| self.tap_error("open", e))?;
            *output = Some(opened);
        }
        match output.as_mut() {
            Some(out) => out.write(tuple).map_err(|e| self.tap_error("write", e)),
            None => Ok(()),
        }
    }

    fn close(&self) -> Result<()> {
        match lock(&self.output).take() {
            Some(mut out) => out.close().map_err(|e| self.tap_error("close", e)),
            None => Ok(()),
        }
    }
}
