//! Fan-in.

use super::{Countdown, Duct, DuctId, Incoming, Link, StreamGraph};
use crate::error::{FlowError, Result};
use std::sync::OnceLock;

/// Funnels several predecessors into one successor.
///
/// Tuples pass through as they arrive; `start` and `complete` are forwarded once,
/// after every predecessor has reported.
pub struct Merge {
    name: String,
    starts: OnceLock<Countdown>,
    completes: OnceLock<Countdown>,
    next: Link,
}

impl Merge {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            next: Link::new(&name),
            name,
            starts: OnceLock::new(),
            completes: OnceLock::new(),
        }
    }

    fn countdown<'a>(&self, countdown: &'a OnceLock<Countdown>) -> Result<&'a Countdown> {
        countdown
            .get()
            .ok_or_else(|| FlowError::protocol(&self.name, "used before bind"))
    }
}

impl Duct for Merge {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, id: DuctId, graph: &StreamGraph) -> Result<()> {
        let arity = graph.predecessors(id).len();
        if arity == 0 {
            return Err(FlowError::Topology(format!("merge '{}' has no predecessors", self.name)));
        }
        // a second bind keeps the first countdowns; Link::bind reports it
        let _ = self.starts.set(Countdown::new(arity));
        let _ = self.completes.set(Countdown::new(arity));
        self.next.bind(id, graph)
    }

    fn prepare(&self) -> Result<()> {
        self.countdown(&self.starts)?.reset();
        self.countdown(&self.completes)?.reset();
        Ok(())
    }

    fn start(&self, _from: DuctId) -> Result<()> {
        if self.countdown(&self.starts)?.arrive() {
            self.next.start()?;
        }
        Ok(())
    }

    fn receive(&self, _from: DuctId, incoming: Incoming<'_>) -> Result<()> {
        self.next.receive(incoming)
    }

    fn complete(&self, _from: DuctId) -> Result<()> {
        if self.countdown(&self.completes)?.arrive() {
            self.next.complete()?;
        }
        Ok(())
    }
}
