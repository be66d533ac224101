//! The duct arena and its lifecycle passes.

use super::{Duct, DuctId};
use crate::error::{FlowError, Result};
use crate::stage::SourceStage;
use log::debug;
use std::collections::VecDeque;
use std::sync::Arc;

/// A compiled graph of live ducts.
///
/// Ducts are stored in an arena indexed by [`DuctId`]; edges are kept as successor
/// and predecessor lists. Sources are also kept with their concrete type so the flow
/// can drive them.
#[derive(Default)]
pub struct StreamGraph {
    ducts: Vec<Arc<dyn Duct>>,
    successors: Vec<Vec<DuctId>>,
    predecessors: Vec<Vec<DuctId>>,
    sources: Vec<Arc<SourceStage>>,
    order: Vec<DuctId>,
}

impl StreamGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, duct: Arc<dyn Duct>) -> DuctId {
        let id = DuctId::new(self.ducts.len());
        self.ducts.push(duct);
        self.successors.push(Vec::new());
        self.predecessors.push(Vec::new());
        id
    }

    pub(crate) fn add_source(&mut self, source: Arc<SourceStage>) -> DuctId {
        self.sources.push(Arc::clone(&source));
        self.add(source)
    }

    pub(crate) fn connect(&mut self, from: DuctId, to: DuctId) {
        self.successors[from.index()].push(to);
        self.predecessors[to.index()].push(from);
    }

    pub fn len(&self) -> usize {
        self.ducts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ducts.is_empty()
    }

    pub fn duct(&self, id: DuctId) -> &Arc<dyn Duct> {
        &self.ducts[id.index()]
    }

    pub fn successors(&self, id: DuctId) -> &[DuctId] {
        &self.successors[id.index()]
    }

    pub fn predecessors(&self, id: DuctId) -> &[DuctId] {
        &self.predecessors[id.index()]
    }

    pub fn name(&self, id: DuctId) -> &str {
        self.ducts[id.index()].name()
    }

    /// Ids whose duct is named `name`.
    pub fn find(&self, name: &str) -> Vec<DuctId> {
        (0..self.ducts.len())
            .map(DuctId::new)
            .filter(|&id| self.name(id) == name)
            .collect()
    }

    pub(crate) fn sources(&self) -> &[Arc<SourceStage>] {
        &self.sources
    }

    /// Forward topological order, computed by [`seal`](StreamGraph::seal).
    pub fn order(&self) -> &[DuctId] {
        &self.order
    }

    /// Computes the topological order; fails on a cycle.
    pub(crate) fn seal(&mut self) -> Result<()> {
        let mut indegree: Vec<usize> = self.predecessors.iter().map(Vec::len).collect();
        let mut ready: VecDeque<DuctId> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| DuctId::new(i))
            .collect();
        let mut order = Vec::with_capacity(self.ducts.len());
        while let Some(id) = ready.pop_front() {
            order.push(id);
            for &next in &self.successors[id.index()] {
                indegree[next.index()] -= 1;
                if indegree[next.index()] == 0 {
                    ready.push_back(next);
                }
            }
        }
        if order.len() != self.ducts.len() {
            return Err(FlowError::Topology("duct graph contains a cycle".to_string()));
        }
        self.order = order;
        Ok(())
    }

    pub(crate) fn bind(&self) -> Result<()> {
        for &id in &self.order {
            self.duct(id).bind(id, self)?;
        }
        debug!("bound {} ducts", self.ducts.len());
        Ok(())
    }

    pub(crate) fn initialize(&self) -> Result<()> {
        self.order
            .iter()
            .try_for_each(|&id| self.duct(id).initialize())
    }

    /// Prepares ducts sinks-first, so every consumer is ready before its producers.
    pub(crate) fn prepare(&self) -> Result<()> {
        self.order
            .iter()
            .rev()
            .try_for_each(|&id| self.duct(id).prepare())
    }

    /// Cleans every duct up, collecting failures instead of stopping at the first.
    pub(crate) fn cleanup(&self) -> Vec<FlowError> {
        self.order
            .iter()
            .filter_map(|&id| self.duct(id).cleanup().err())
            .collect()
    }

    /// One line per duct with its successors, for logs and debugging.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        for &id in &self.order {
            let successors: Vec<&str> = self.successors(id).iter().map(|&s| self.name(s)).collect();
            out.push_str(&format!("{id} {} -> [{}]\n", self.name(id), successors.join(", ")));
        }
        out
    }
}
