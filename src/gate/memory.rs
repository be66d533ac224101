//! The in-memory co-grouping gate.

use super::ordering::order_branches;
use super::{Grouping, Joiner, JoinerClosure};
use crate::duct::{Countdown, Duct, DuctId, Incoming, Link, StreamGraph};
use crate::error::{FlowError, Result};
use crate::process::{FlowProcess, counters};
use crate::tuple::{SparseComparator, Tuple};
use crate::utils::lock;
use log::debug;
use std::collections::{BTreeSet, HashMap};
use std::mem;
use std::sync::{Arc, Mutex, OnceLock};

/// Layout of one incoming branch.
#[derive(Clone, Debug)]
pub struct GateBranch {
    /// Name of the element the branch comes from.
    pub name: String,
    /// Key positions within the branch tuples.
    pub key: Vec<usize>,
    /// Secondary sort applied to the branch values of each key.
    pub sort: Option<SparseComparator>,
    /// Width of the branch tuples.
    pub width: usize,
}

struct Generation {
    keys: BTreeSet<Tuple>,
    maps: Vec<HashMap<Tuple, Vec<Tuple>>>,
}

impl Generation {
    fn new(branches: usize) -> Self {
        Self {
            keys: BTreeSet::new(),
            maps: (0..branches).map(|_| HashMap::new()).collect(),
        }
    }
}

/// Buffers every branch by key and replays one [`Grouping`] per key once the last
/// predecessor completes.
///
/// Inserts from different predecessors may race; the key set and the per-branch maps
/// share one lock. At replay both are swapped for a fresh generation, so the gate is
/// immediately ready for another run.
///
/// A self-join gate has one physical branch and `self_joins + 1` logical branches,
/// all backed by the values of the physical one.
pub struct MemoryGate {
    name: String,
    branches: Vec<GateBranch>,
    self_joins: usize,
    reverse: bool,
    joiner: Arc<dyn Joiner>,
    placeholders: Vec<Tuple>,
    ordinals: OnceLock<HashMap<DuctId, usize>>,
    starts: OnceLock<Countdown>,
    completes: OnceLock<Countdown>,
    state: Mutex<Generation>,
    next: Link,
    process: Arc<FlowProcess>,
}

impl MemoryGate {
    pub(crate) fn new(
        name: &str,
        branches: Vec<GateBranch>,
        self_joins: usize,
        reverse: bool,
        joiner: Arc<dyn Joiner>,
        process: Arc<FlowProcess>,
    ) -> Self {
        let logical = if self_joins > 0 {
            self_joins + 1
        } else {
            branches.len()
        };
        let placeholders = (0..logical)
            .map(|b| Tuple::nulls(branches[physical(b, self_joins)].width))
            .collect();
        Self {
            name: name.to_string(),
            state: Mutex::new(Generation::new(branches.len())),
            branches,
            self_joins,
            reverse,
            joiner,
            placeholders,
            ordinals: OnceLock::new(),
            starts: OnceLock::new(),
            completes: OnceLock::new(),
            next: Link::new(name),
            process,
        }
    }

    /// Number of logical branches exposed to the joiner.
    pub fn logical_branches(&self) -> usize {
        self.placeholders.len()
    }

    fn bound<'a, T>(&self, cell: &'a OnceLock<T>) -> Result<&'a T> {
        cell.get()
            .ok_or_else(|| FlowError::protocol(&self.name, "used before bind"))
    }

    fn replay(&self) -> Result<()> {
        let mut generation = mem::replace(
            &mut *lock(&self.state),
            Generation::new(self.branches.len()),
        );
        for (map, branch) in generation.maps.iter_mut().zip(&self.branches) {
            if let Some(cmp) = &branch.sort {
                for values in map.values_mut() {
                    values.sort_by(|a, b| cmp.compare(a, b));
                }
            }
        }
        debug!(
            "gate '{}' replaying {} keys over {} branches",
            self.name,
            generation.keys.len(),
            self.logical_branches()
        );

        let keys: Box<dyn Iterator<Item = &Tuple>> = if self.reverse {
            Box::new(generation.keys.iter().rev())
        } else {
            Box::new(generation.keys.iter())
        };
        let mut emitted = 0u64;
        for key in keys {
            let branches = (0..self.logical_branches())
                .map(|b| {
                    generation.maps[physical(b, self.self_joins)]
                        .get(key)
                        .map_or(&[][..], Vec::as_slice)
                })
                .collect();
            let closure = JoinerClosure::new(branches, &self.placeholders);
            if self.joiner.is_suppressed(&closure) {
                continue;
            }
            let grouping = Grouping::new(key, closure, self.joiner.as_ref());
            self.next.receive(Incoming::Grouping(&grouping))?;
            emitted += 1;
        }
        self.process
            .increment_engine(counters::GROUPS_EMITTED, emitted);
        Ok(())
    }
}

fn physical(logical: usize, self_joins: usize) -> usize {
    if self_joins > 0 { 0 } else { logical }
}

impl Duct for MemoryGate {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, id: DuctId, graph: &StreamGraph) -> Result<()> {
        let names: Vec<String> = self.branches.iter().map(|b| b.name.clone()).collect();
        let ordinals = order_branches(id, graph, &names)?;
        let arity = graph.predecessors(id).len();
        debug!("gate '{}' ordered {} predecessors", self.name, arity);
        let _ = self.starts.set(Countdown::new(arity));
        let _ = self.completes.set(Countdown::new(arity));
        self.ordinals
            .set(ordinals)
            .map_err(|_| FlowError::protocol(&self.name, "bound twice"))?;
        self.next.bind(id, graph)
    }

    fn prepare(&self) -> Result<()> {
        self.bound(&self.starts)?.reset();
        self.bound(&self.completes)?.reset();
        Ok(())
    }

    fn start(&self, _from: DuctId) -> Result<()> {
        if self.bound(&self.starts)?.arrive() {
            self.next.start()?;
        }
        Ok(())
    }

    fn receive(&self, from: DuctId, incoming: Incoming<'_>) -> Result<()> {
        let Incoming::Tuple(tuple) = incoming else {
            return Err(FlowError::protocol(&self.name, "cannot group a grouping"));
        };
        let Some(&ordinal) = self.bound(&self.ordinals)?.get(&from) else {
            return Err(FlowError::protocol(
                &self.name,
                format!("receive from unknown predecessor {from}"),
            ));
        };
        let branch = &self.branches[ordinal];
        let key: Tuple = branch.key.iter().map(|&p| tuple.get(p).clone()).collect();
        let value = tuple.to_tuple();

        let mut state = lock(&self.state);
        if !state.keys.contains(&key) {
            state.keys.insert(key.clone());
        }
        state.maps[ordinal].entry(key).or_default().push(value);
        Ok(())
    }

    fn complete(&self, _from: DuctId) -> Result<()> {
        if self.bound(&self.completes)?.arrive() {
            self.replay()?;
            self.next.complete()?;
        }
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        // drop anything left by a failed run
        *lock(&self.state) = Generation::new(self.branches.len());
        Ok(())
    }
}
