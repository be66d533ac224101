//! The push-duct graph.
//!
//! A [`Duct`] is one live execution unit. Ducts are connected into a [`StreamGraph`]
//! and driven through a strict lifecycle, each step applied to the whole graph
//! before the next one begins:
//!
//! 1. `bind`: resolve successors (and, for gates, branch ordering);
//! 2. `initialize`: allocate per-duct state, once per flow;
//! 3. `prepare`: acquire external resources, reverse-topological;
//! 4. `start`: announce a run, forward;
//! 5. `receive`: push data, zero or more times;
//! 6. `complete`: announce the end of a run, forward; caches drain here;
//! 7. `cleanup`: release resources, forward; always runs, even after a failure.
//!
//! Every call takes the [`DuctId`] of the calling predecessor. Ducts with several
//! predecessors ([`Merge`], [`MemoryGate`](crate::gate::MemoryGate)) count arrivals
//! with a [`Countdown`] and forward `start`/`complete` only once all have reported.
//!
//! Key-scoped consumers additionally implement [`Reducing`], bracketing the values of
//! one group between `start_group` and `complete_group`.

pub(crate) mod compile;
mod fork;
mod graph;
mod merge;
mod window;

pub use fork::Fork;
pub use graph::StreamGraph;
pub use merge::Merge;
pub use window::{CloseWindow, OpenReducingWindow, OpenWindow};

use crate::error::{FlowError, Result};
use crate::gate::Grouping;
use crate::tuple::TupleLike;
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Identifier of a duct within its [`StreamGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DuctId(usize);

impl DuctId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl Display for DuctId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "#{}", self.0)
    }
}

/// A value pushed into a duct.
#[derive(Clone, Copy)]
pub enum Incoming<'a> {
    Tuple(&'a dyn TupleLike),
    Grouping(&'a Grouping<'a>),
}

/// One push-model execution unit.
pub trait Duct: Send + Sync {
    fn name(&self) -> &str;

    fn bind(&self, _id: DuctId, _graph: &StreamGraph) -> Result<()> {
        Ok(())
    }

    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn prepare(&self) -> Result<()> {
        Ok(())
    }

    fn start(&self, from: DuctId) -> Result<()>;

    fn receive(&self, from: DuctId, incoming: Incoming<'_>) -> Result<()>;

    fn complete(&self, from: DuctId) -> Result<()>;

    fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    /// The key-scoped half of the protocol, if this duct implements it.
    fn as_reducing(&self) -> Option<&dyn Reducing> {
        None
    }

    /// Whether this duct consumes whole groupings rather than their rows.
    fn accepts_grouping(&self) -> bool {
        false
    }
}

/// The group bracketing protocol.
///
/// Between `start_group` and `complete_group` the duct receives the rows of one group
/// through [`Duct::receive`]. `complete_group` carries the group result built so far:
/// the key, followed by the results of any preceding reducers.
pub trait Reducing: Send + Sync {
    fn start_group(&self, from: DuctId, key: &dyn TupleLike) -> Result<()>;

    fn complete_group(&self, from: DuctId, result: &dyn TupleLike) -> Result<()>;
}

/// Atomic predecessor countdown.
///
/// [`arrive`](Countdown::arrive) returns `true` for exactly one caller per round of
/// `initial` arrivals, and resets the count so the next run starts from scratch.
#[derive(Debug)]
pub struct Countdown {
    initial: usize,
    remaining: AtomicUsize,
}

impl Countdown {
    pub fn new(initial: usize) -> Self {
        Self {
            initial: initial.max(1),
            remaining: AtomicUsize::new(initial.max(1)),
        }
    }

    pub fn initial(&self) -> usize {
        self.initial
    }

    /// Restores the initial count, abandoning a partially arrived round.
    pub fn reset(&self) {
        self.remaining.store(self.initial, Ordering::Release);
    }

    pub fn arrive(&self) -> bool {
        let before = self.remaining.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(before > 0, "countdown arrived more often than its initial count");
        if before == 1 {
            self.remaining.store(self.initial, Ordering::Release);
            true
        } else {
            false
        }
    }
}

struct Next {
    from: DuctId,
    duct: Arc<dyn Duct>,
}

/// The single successor of a duct, resolved at bind.
pub(crate) struct Link {
    owner: String,
    next: OnceLock<Next>,
}

impl Link {
    pub(crate) fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            next: OnceLock::new(),
        }
    }

    pub(crate) fn bind(&self, id: DuctId, graph: &StreamGraph) -> Result<()> {
        let successors = graph.successors(id);
        let [next] = successors else {
            return Err(FlowError::Topology(format!(
                "'{}' needs exactly one successor, found {}",
                self.owner,
                successors.len()
            )));
        };
        let duct = Arc::clone(graph.duct(*next));
        self.next
            .set(Next { from: id, duct })
            .map_err(|_| FlowError::protocol(&self.owner, "bound twice"))
    }

    fn get(&self) -> Result<&Next> {
        self.next
            .get()
            .ok_or_else(|| FlowError::protocol(&self.owner, "used before bind"))
    }

    pub(crate) fn duct(&self) -> Option<&dyn Duct> {
        self.next.get().map(|n| n.duct.as_ref())
    }

    pub(crate) fn start(&self) -> Result<()> {
        let next = self.get()?;
        next.duct.start(next.from)
    }

    pub(crate) fn receive(&self, incoming: Incoming<'_>) -> Result<()> {
        let next = self.get()?;
        next.duct.receive(next.from, incoming)
    }

    pub(crate) fn receive_tuple(&self, tuple: &dyn TupleLike) -> Result<()> {
        self.receive(Incoming::Tuple(tuple))
    }

    pub(crate) fn complete(&self) -> Result<()> {
        let next = self.get()?;
        next.duct.complete(next.from)
    }

    /// The successor's reducing half, with the id to call it under.
    pub(crate) fn reducing(&self) -> Option<(DuctId, &dyn Reducing)> {
        let next = self.next.get()?;
        next.duct.as_reducing().map(|r| (next.from, r))
    }

    pub(crate) fn start_group(&self, key: &dyn TupleLike) -> Result<()> {
        match self.reducing() {
            Some((from, reducing)) => reducing.start_group(from, key),
            None => Ok(()),
        }
    }

    /// Hands a group result on: to the next reducer, or as a plain tuple.
    pub(crate) fn emit_group_result(&self, result: &dyn TupleLike) -> Result<()> {
        match self.reducing() {
            Some((from, reducing)) => reducing.complete_group(from, result),
            None => self.receive_tuple(result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_fires_once_per_round_and_resets() {
        let countdown = Countdown::new(3);
        for _ in 0..2 {
            let fired: Vec<bool> = (0..3).map(|_| countdown.arrive()).collect();
            assert_eq!(fired, vec![false, false, true]);
        }
    }

    #[test]
    fn countdown_fires_once_under_contention() {
        let countdown = Arc::new(Countdown::new(8));
        let fired: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let c = Arc::clone(&countdown);
                    s.spawn(move || usize::from(c.arrive()))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(fired, 1);
        assert_eq!(countdown.remaining.load(Ordering::Acquire), 8);
    }
}
