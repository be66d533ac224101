//! Map-side partial aggregation.
//!
//! [`AggregateBy`] splits an aggregation in two. Ahead of the grouping, a
//! [`CompositeFunction`] folds values into per-key accumulators held in a bounded
//! [`PartialCache`]; when the cache is full, the evicted key is completed and emitted
//! as a partial result. After the grouping, one merger aggregator per part combines
//! the partial results of each key into the final value.
//!
//! Memory stays bounded by the cache capacity whatever the number of keys; the
//! grouping sees at most one partial row per key and eviction instead of one row per
//! input tuple.
//!
//! ```
//! use ductflow::element::{Element, ElementGraph};
//! use ductflow::partial::{AggregateBy, CountBy, SumBy};
//! use ductflow::tap::{MemorySink, MemorySource};
//! use ductflow::{Fields, Flow, FlowConfig, Scope, tuple};
//!
//! let source = MemorySource::new(
//!     "words",
//!     Fields::names(["word", "n"]),
//!     vec![tuple!["a", 1], tuple!["b", 2], tuple!["a", 3]],
//! );
//! let sink = MemorySink::new("out");
//!
//! let mut graph = ElementGraph::new();
//! let words = graph.add(Element::source("words", source));
//! let counted = AggregateBy::new("count", Fields::names(["word"]))
//!     .part(SumBy::new("total"), Fields::names(["n"]))
//!     .part(CountBy::new("rows"), Fields::names(["n"]))
//!     .capacity(1)
//!     .expand(&mut graph, words)?;
//! graph.pipe(counted, Element::sink("out", sink.clone()), Scope::new());
//!
//! Flow::new("word-count", graph, FlowConfig::sequential())?.complete()?;
//! assert_eq!(sink.rows(), vec![tuple!["a", 4, 2], tuple!["b", 2, 1]]);
//! # Ok::<(), ductflow::FlowError>(())
//! ```

mod cache;
mod functors;

pub use cache::{CacheEntry, CacheFactory, DirectMappedCacheFactory, LruCacheFactory, PartialCache};
pub use functors::{AverageBy, CountBy, FirstBy, MaxBy, MinBy, SumBy};

use crate::element::{Element, ElementGraph, NodeId};
use crate::error::{FlowError, Result};
use crate::operation::{Aggregator, Collector, Function, OperationContext};
use crate::process::{FlowProcess, counters};
use crate::scope::Scope;
use crate::tuple::{Composite, Fields, Narrow, Tuple, TupleLike};
use crate::utils::lock;
use anyhow::anyhow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// One part of a partial aggregation.
///
/// `aggregate` must not mutate `prior`: it returns the next accumulator, so a
/// failing part leaves every accumulator of the key untouched.
pub trait Functor: Send + Sync {
    /// Fields of the partial results produced by [`complete`](Functor::complete).
    fn declared_fields(&self) -> Fields;

    /// Folds `arguments` into `prior`; `prior` is `None` for the first value of a
    /// key since it entered the cache.
    fn aggregate(&self, arguments: &dyn TupleLike, prior: Option<&Tuple>) -> anyhow::Result<Tuple>;

    /// Turns an accumulator into the partial result.
    fn complete(&self, accumulator: Tuple) -> anyhow::Result<Tuple>;

    /// The aggregator merging partial results after the grouping.
    fn merger(&self) -> Arc<dyn Aggregator>;
}

#[derive(Clone)]
struct Part {
    functor: Arc<dyn Functor>,
    arguments: Fields,
}

struct CacheState {
    key: Vec<usize>,
    arguments: Vec<Vec<usize>>,
    cache: Box<dyn PartialCache>,
    // keys currently cached; each must be completed exactly once per residency
    #[cfg(debug_assertions)]
    live: std::collections::HashSet<Tuple>,
}

#[derive(Default)]
struct CacheCounters {
    hit: AtomicU64,
    missed: AtomicU64,
    evicted: AtomicU64,
    flushed: AtomicU64,
}

impl CacheCounters {
    fn publish(&self, process: &FlowProcess) {
        for (counter, value) in [
            (counters::KEYS_HIT, &self.hit),
            (counters::KEYS_MISSED, &self.missed),
            (counters::KEYS_EVICTED, &self.evicted),
            (counters::KEYS_FLUSHED, &self.flushed),
        ] {
            process.increment_engine(counter, value.swap(0, Ordering::AcqRel));
        }
    }
}

/// A [`Function`] caching per-key accumulators for several [`Functor`]s.
///
/// Emits `key ++ partial results` whenever a key is evicted and, at flush, for every
/// key still cached. Eviction and flush complete entries the same way.
pub struct CompositeFunction {
    key: Fields,
    parts: Vec<Part>,
    capacity: Option<usize>,
    factory: Arc<dyn CacheFactory>,
    state: Mutex<Option<CacheState>>,
    counters: CacheCounters,
}

impl CompositeFunction {
    fn new(
        key: Fields,
        parts: Vec<Part>,
        capacity: Option<usize>,
        factory: Arc<dyn CacheFactory>,
    ) -> Self {
        Self {
            key,
            parts,
            capacity,
            factory,
            state: Mutex::new(None),
            counters: CacheCounters::default(),
        }
    }

    fn fold(
        &self,
        positions: &[Vec<usize>],
        arguments: &dyn TupleLike,
        prior: Option<&[Tuple]>,
    ) -> anyhow::Result<Vec<Tuple>> {
        self.parts
            .iter()
            .zip(positions)
            .enumerate()
            .map(|(i, (part, positions))| {
                part.functor
                    .aggregate(&Narrow::new(arguments, positions), prior.map(|p| &p[i]))
            })
            .collect()
    }

    fn complete_entry(
        &self,
        key: &Tuple,
        accumulators: Vec<Tuple>,
        out: &mut Collector<'_>,
    ) -> anyhow::Result<()> {
        let results = self
            .parts
            .iter()
            .zip(accumulators)
            .map(|(part, accumulator)| part.functor.complete(accumulator))
            .collect::<anyhow::Result<Vec<Tuple>>>()?;
        let mut row: Vec<&dyn TupleLike> = Vec::with_capacity(results.len() + 1);
        row.push(key);
        row.extend(results.iter().map(|r| r as &dyn TupleLike));
        out.emit(&Composite::new(row))
    }

    /// Completes one evicted or drained entry; a failure is settled against its key
    /// alone so the remaining entries still complete.
    fn settle_entry(
        &self,
        key: Tuple,
        accumulators: Vec<Tuple>,
        out: &mut Collector<'_>,
    ) -> anyhow::Result<()> {
        match self.complete_entry(&key, accumulators, out) {
            Ok(()) => Ok(()),
            Err(error) if error.downcast_ref::<FlowError>().is_some() => Err(error),
            Err(error) => out.reject(error, key),
        }
    }
}

impl Function for CompositeFunction {
    fn declared_fields(&self, arguments: &Fields) -> Fields {
        let key = match self.key.resolve(arguments) {
            Ok(positions) => arguments.select(&positions),
            Err(_) => self.key.clone(),
        };
        self.parts
            .iter()
            .fold(key, |fields, part| fields.append(&part.functor.declared_fields()))
    }

    fn prepare(&self, ctx: &OperationContext<'_>) -> anyhow::Result<()> {
        let key = self.key.resolve(ctx.arguments)?;
        let arguments = self
            .parts
            .iter()
            .map(|part| part.arguments.resolve(ctx.arguments))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let capacity = self
            .capacity
            .unwrap_or(ctx.process.config().aggregate_by_capacity);
        *lock(&self.state) = Some(CacheState {
            key,
            arguments,
            cache: self.factory.create(capacity),
            #[cfg(debug_assertions)]
            live: std::collections::HashSet::new(),
        });
        Ok(())
    }

    fn operate(
        &self,
        ctx: &OperationContext<'_>,
        arguments: &dyn TupleLike,
        out: &mut Collector<'_>,
    ) -> anyhow::Result<()> {
        let evicted = {
            let mut guard = lock(&self.state);
            let state = guard
                .as_mut()
                .ok_or_else(|| anyhow!("'{}' used before prepare", ctx.name))?;
            let key: Tuple = state.key.iter().map(|&p| arguments.get(p).clone()).collect();
            match state.cache.get_mut(&key) {
                Some(accumulators) => {
                    let next = self.fold(&state.arguments, arguments, Some(accumulators))?;
                    *accumulators = next;
                    self.counters.hit.fetch_add(1, Ordering::Relaxed);
                    None
                }
                None => {
                    let fresh = self.fold(&state.arguments, arguments, None)?;
                    self.counters.missed.fetch_add(1, Ordering::Relaxed);
                    #[cfg(debug_assertions)]
                    debug_assert!(state.live.insert(key.clone()), "key {key} cached twice");
                    let evicted = state.cache.insert(key, fresh);
                    if let Some((_old, _)) = &evicted {
                        self.counters.evicted.fetch_add(1, Ordering::Relaxed);
                        #[cfg(debug_assertions)]
                        debug_assert!(state.live.remove(_old), "evicted key {_old} was not live");
                    }
                    evicted
                }
            }
        };
        match evicted {
            Some((key, accumulators)) => self.settle_entry(key, accumulators, out),
            None => Ok(()),
        }
    }

    fn flush(&self, ctx: &OperationContext<'_>, out: &mut Collector<'_>) -> anyhow::Result<()> {
        let drained = match lock(&self.state).as_mut() {
            Some(state) => {
                let drained = state.cache.drain();
                #[cfg(debug_assertions)]
                {
                    for (key, _) in &drained {
                        debug_assert!(state.live.remove(key), "flushed key {key} was not live");
                    }
                    debug_assert!(state.live.is_empty(), "keys lost by the cache");
                }
                drained
            }
            None => Vec::new(),
        };
        self.counters
            .flushed
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        let completed = drained
            .into_iter()
            .try_for_each(|(key, accumulators)| self.settle_entry(key, accumulators, out));
        self.counters.publish(ctx.process);
        completed
    }

    fn cleanup(&self, _ctx: &OperationContext<'_>) -> anyhow::Result<()> {
        *lock(&self.state) = None;
        Ok(())
    }
}

/// Builder expanding a partial aggregation into elements.
///
/// `expand` appends three kinds of elements after `upstream`:
///
/// - `{name}:partial`: the [`CompositeFunction`] emitting `key ++ partial results`;
/// - `{name}`: a group-by on the key;
/// - `{name}:{i}`: one merger aggregator per part, in part order.
///
/// The last element emits `key ++ final results`. Failures of the partial stage go to
/// the upstream branch's trap; those of the mergers to the trap named `{name}`.
pub struct AggregateBy {
    name: String,
    group: Fields,
    parts: Vec<Part>,
    capacity: Option<usize>,
    factory: Arc<dyn CacheFactory>,
}

impl AggregateBy {
    /// Aggregates by the explicit key selector `group`.
    pub fn new(name: impl Into<String>, group: Fields) -> Self {
        Self {
            name: name.into(),
            group,
            parts: Vec::new(),
            capacity: None,
            factory: Arc::new(LruCacheFactory),
        }
    }

    #[must_use]
    pub fn part(mut self, functor: impl Functor + 'static, arguments: Fields) -> Self {
        self.parts.push(Part {
            functor: Arc::new(functor),
            arguments,
        });
        self
    }

    /// Number of keys held in the cache; defaults to the flow's
    /// `aggregate_by_capacity`.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    #[must_use]
    pub fn cache_factory(mut self, factory: impl CacheFactory + 'static) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    /// Adds the elements to `graph` after `upstream`; returns the last one.
    pub fn expand(self, graph: &mut ElementGraph, upstream: NodeId) -> Result<NodeId> {
        if !self.group.is_select() || self.group.size() == 0 {
            return Err(FlowError::Config(format!(
                "aggregate-by '{}' needs an explicit, non-empty key selector",
                self.name
            )));
        }
        if self.parts.is_empty() {
            return Err(FlowError::Config(format!(
                "aggregate-by '{}' has no parts",
                self.name
            )));
        }
        let key_width = self.group.size();
        let widths: Vec<usize> = self
            .parts
            .iter()
            .map(|p| p.functor.declared_fields().size())
            .collect();
        let mergers: Vec<Arc<dyn Aggregator>> =
            self.parts.iter().map(|p| p.functor.merger()).collect();

        let partial = CompositeFunction::new(self.group, self.parts, self.capacity, self.factory);
        let partial = graph.pipe(
            upstream,
            Element::function(format!("{}:partial", self.name), partial),
            Scope::new()
                .with_arguments(Fields::All)
                .with_output(Fields::Results),
        );
        let key = Fields::positions((0..key_width).map(|p| p as isize));
        let mut last = graph.pipe(partial, Element::group_by(self.name.as_str()), Scope::grouping(0, key));

        let mut offset = key_width;
        for (i, (merger, width)) in mergers.into_iter().zip(widths).enumerate() {
            let positions = Fields::positions((offset..offset + width).map(|p| p as isize));
            last = graph.pipe(
                last,
                Element::Aggregator {
                    name: format!("{}:{i}", self.name),
                    aggregator: merger,
                },
                Scope::new().with_arguments(positions),
            );
            offset += width;
        }
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowConfig;
    use crate::tuple;

    fn run(function: &CompositeFunction, rows: &[Tuple]) -> Vec<Tuple> {
        let process = FlowProcess::new("test", FlowConfig::sequential());
        let arguments = Fields::names(["k", "v"]);
        let ctx = OperationContext {
            name: "partial",
            arguments: &arguments,
            process: &process,
        };
        let mut emitted = Vec::new();
        let mut sink = |t: &dyn TupleLike| -> Result<()> {
            emitted.push(t.to_tuple());
            Ok(())
        };
        function.prepare(&ctx).unwrap();
        {
            let mut out = Collector::new(&mut sink);
            for row in rows {
                function.operate(&ctx, row, &mut out).unwrap();
            }
            function.flush(&ctx, &mut out).unwrap();
        }
        function.cleanup(&ctx).unwrap();
        emitted
    }

    fn sum_by_key(capacity: usize) -> CompositeFunction {
        CompositeFunction::new(
            Fields::names(["k"]),
            vec![Part {
                functor: Arc::new(SumBy::new("s")),
                arguments: Fields::names(["v"]),
            }],
            Some(capacity),
            Arc::new(LruCacheFactory),
        )
    }

    #[test]
    fn every_value_reaches_exactly_one_partial_row() {
        let rows: Vec<Tuple> = (0..50).map(|i| tuple![i % 7, 1]).collect();
        for capacity in [1, 3, 100] {
            let emitted = run(&sum_by_key(capacity), &rows);
            let total: i64 = emitted.iter().map(|t| t[1].as_i64().unwrap()).sum();
            assert_eq!(total, 50, "capacity {capacity}");
            if capacity >= 7 {
                assert_eq!(emitted.len(), 7);
            }
        }
    }

    #[test]
    fn declares_key_then_parts() {
        let function = sum_by_key(4);
        assert_eq!(
            function.declared_fields(&Fields::names(["k", "v"])),
            Fields::names(["k", "s"])
        );
    }

    #[test]
    fn expand_rejects_missing_parts() {
        let mut graph = ElementGraph::new();
        let source = graph.add(Element::merge("m"));
        assert!(AggregateBy::new("agg", Fields::names(["k"]))
            .expand(&mut graph, source)
            .is_err());
    }
}
