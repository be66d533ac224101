//! Fan-out.

use super::{Duct, DuctId, Incoming, Reducing, StreamGraph};
use crate::error::{FlowError, Result};
use crate::tuple::TupleLike;
use std::sync::{Arc, OnceLock};

/// Broadcasts every call to all successors, in order, without buffering.
///
/// A reducing fork sits behind a reducer with several consumers and also broadcasts
/// `start_group`/`complete_group`; each successor must then be reducing too
/// (normally a [`CloseWindow`](super::CloseWindow)).
pub struct Fork {
    name: String,
    reducing: bool,
    nexts: OnceLock<(DuctId, Vec<Arc<dyn Duct>>)>,
}

impl Fork {
    pub fn new(name: impl Into<String>, reducing: bool) -> Self {
        Self {
            name: name.into(),
            reducing,
            nexts: OnceLock::new(),
        }
    }

    fn nexts(&self) -> Result<(DuctId, &[Arc<dyn Duct>])> {
        self.nexts
            .get()
            .map(|(id, nexts)| (*id, nexts.as_slice()))
            .ok_or_else(|| FlowError::protocol(&self.name, "used before bind"))
    }
}

impl Duct for Fork {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, id: DuctId, graph: &StreamGraph) -> Result<()> {
        let nexts: Vec<Arc<dyn Duct>> = graph
            .successors(id)
            .iter()
            .map(|&s| Arc::clone(graph.duct(s)))
            .collect();
        if nexts.is_empty() {
            return Err(FlowError::Topology(format!("fork '{}' has no successors", self.name)));
        }
        if self.reducing
            && let Some(plain) = nexts.iter().find(|n| n.as_reducing().is_none())
        {
            return Err(FlowError::Topology(format!(
                "reducing fork '{}' feeds non-reducing '{}'",
                self.name,
                plain.name()
            )));
        }
        self.nexts
            .set((id, nexts))
            .map_err(|_| FlowError::protocol(&self.name, "bound twice"))
    }

    fn start(&self, _from: DuctId) -> Result<()> {
        let (id, nexts) = self.nexts()?;
        nexts.iter().try_for_each(|n| n.start(id))
    }

    fn receive(&self, _from: DuctId, incoming: Incoming<'_>) -> Result<()> {
        let (id, nexts) = self.nexts()?;
        nexts.iter().try_for_each(|n| n.receive(id, incoming))
    }

    fn complete(&self, _from: DuctId) -> Result<()> {
        let (id, nexts) = self.nexts()?;
        nexts.iter().try_for_each(|n| n.complete(id))
    }

    fn as_reducing(&self) -> Option<&dyn Reducing> {
        self.reducing.then_some(self as &dyn Reducing)
    }
}

impl Reducing for Fork {
    fn start_group(&self, _from: DuctId, key: &dyn TupleLike) -> Result<()> {
        let (id, nexts) = self.nexts()?;
        for next in nexts {
            if let Some(reducing) = next.as_reducing() {
                reducing.start_group(id, key)?;
            }
        }
        Ok(())
    }

    fn complete_group(&self, _from: DuctId, result: &dyn TupleLike) -> Result<()> {
        let (id, nexts) = self.nexts()?;
        for next in nexts {
            if let Some(reducing) = next.as_reducing() {
                reducing.complete_group(id, result)?;
            }
        }
        Ok(())
    }
}
