//! # ductflow
//!
//! A **push-based dataflow engine** for tuple streams. A planner describes a job as a
//! graph of relational elements (functions, filters, groupings, joins, aggregations);
//! ductflow compiles it into a graph of *ducts* and pushes every record from the
//! sources through it, one call per hop, without materializing intermediate
//! collections.
//!
//! ## Key Features
//!
//! - **Zero-copy tuple views**: arguments and outputs are projections over the
//!   incoming tuple, borrowed for the duration of a call
//! - **Operator stages**: per-record functions, filters and assertions; per-group
//!   aggregators, buffers and group assertions
//! - **Grouping and joins**: in-memory gates grouping one or more branches by key,
//!   with inner, outer, left, right and mixed joins, self-joins and secondary sorts
//! - **Partial aggregation**: bounded map-side caches with LRU eviction in front of
//!   the grouping
//! - **Failure traps**: per-branch handlers that drop failed records and continue,
//!   or abort the run
//! - **Sequential and parallel execution**: sources driven on the calling thread or
//!   on a rayon pool
//!
//! ## Quick Start
//!
//! ```
//! use ductflow::element::{Element, ElementGraph};
//! use ductflow::operation::{Count, Sum};
//! use ductflow::tap::{MemorySink, MemorySource};
//! use ductflow::{Fields, Flow, FlowConfig, Scope, tuple};
//!
//! let sales = MemorySource::new(
//!     "sales",
//!     Fields::names(["region", "amount"]),
//!     vec![tuple!["eu", 3], tuple!["us", 2], tuple!["eu", 1]],
//! );
//! let totals = MemorySink::new("totals");
//!
//! let mut graph = ElementGraph::new();
//! let source = graph.add(Element::source("sales", sales));
//! let by_region = graph.pipe(
//!     source,
//!     Element::group_by("by-region"),
//!     Scope::grouping(0, Fields::names(["region"])),
//! );
//! let sum = graph.pipe(
//!     by_region,
//!     Element::aggregator("sum", Sum::new("total")),
//!     Scope::new().with_arguments(Fields::names(["amount"])),
//! );
//! let count = graph.pipe(sum, Element::aggregator("count", Count::new("n")), Scope::new());
//! graph.pipe(count, Element::sink("totals", totals.clone()), Scope::new());
//!
//! let stats = Flow::new("sales-by-region", graph, FlowConfig::sequential())?.complete()?;
//! assert_eq!(stats.read, 3);
//! assert_eq!(totals.rows(), vec![tuple!["eu", 4, 2], tuple!["us", 2, 1]]);
//! # Ok::<(), ductflow::FlowError>(())
//! ```
//!
//! ## Core Concepts
//!
//! ### Tuples, fields and views
//!
//! A [`Tuple`] is an ordered row of dynamically typed [`Value`]s. [`Fields`] both
//! declare the shape of a stream and select from it: names, positions (negative
//! counts from the end) or the special selectors `All`, `Results`, `Replace` and
//! `Swap`. Selectors are resolved to positions once, at compile time.
//!
//! Everything that reads a row does so through [`TupleLike`]. The
//! [`view`](tuple::view) types narrow, concatenate and override rows without copying
//! them, so an operation's arguments and its composed output are borrows of the
//! incoming tuple.
//!
//! ### Elements and scopes
//!
//! An [`ElementGraph`] holds the planned [`Element`]s. Each edge carries a [`Scope`]
//! naming the argument selector of the consumer, its output selector and, into a
//! grouping, the ordinal of the branch with its key and sort selectors.
//!
//! ### Ducts
//!
//! [`Flow::new`] compiles the element graph into a [`duct`] graph. Every duct
//! implements the same four-call protocol:
//!
//! - `start`: a predecessor begins a run
//! - `receive`: one tuple, or one grouping, is pushed through
//! - `complete`: a predecessor is done; the duct completes its own successors once
//!   every predecessor has
//! - `prepare` / `cleanup`: once per run, around the above
//!
//! Forks fan a stream out, merges fan it in, and windows adapt groupings to the
//! per-group protocol of aggregators.
//!
//! ### Operations
//!
//! User logic implements the traits in [`operation`]: [`Function`](operation::Function),
//! [`Filter`](operation::Filter), [`Aggregator`](operation::Aggregator),
//! [`Buffer`](operation::Buffer) and the assertion traits. Operations never see ducts:
//! they read their argument view and emit results through a
//! [`Collector`](operation::Collector).
//!
//! ### Gates
//!
//! A [`gate::MemoryGate`] accumulates every branch of a grouping in memory, then
//! replays it key by key when its last predecessor completes. A
//! [`Joiner`](gate::Joiner) turns the per-branch values of a key into joined rows.
//!
//! ### Partial aggregation
//!
//! [`partial::AggregateBy`] expands into a caching function ahead of a grouping and
//! merging aggregators after it, bounding memory by the cache capacity.
//!
//! ### Failures
//!
//! User failures on a record are routed to the [`trap::TrapHandler`] of the record's
//! branch, which drops the record and continues or aborts the run. A
//! [`ResourceExhaustion`] always aborts. Everything else is a [`FlowError`] returned
//! from [`Flow::new`] or [`Flow::complete`].
//!
//! ## Execution Modes
//!
//! - [`ExecMode::Sequential`]: sources are read one after another on the calling thread
//! - [`ExecMode::Parallel`]: sources are read concurrently on a dedicated rayon pool
//!
//! Both modes produce the same groups; the interleaving of ungrouped rows coming from
//! different sources may differ.
//!
//! ## Feature Flags
//!
//! - `io-jsonl` (default): JSON Lines source and sink taps
//!
//! ## Testing
//!
//! The [`testing`] module provides row assertions and input builders for flow tests.

pub mod config;
pub mod duct;
pub mod element;
pub mod error;
pub mod flow;
pub mod gate;
pub mod metrics;
pub mod operation;
pub mod partial;
pub mod process;
pub mod scope;
pub mod tap;
pub mod testing;
pub mod trap;
pub mod tuple;

mod stage;
mod utils;

pub use config::{AssertionLevel, ExecMode, FlowConfig};
pub use element::{Element, ElementGraph, NodeId};
pub use error::{FieldsError, FlowError, ResourceExhaustion, Result};
pub use flow::{Flow, FlowStats};
pub use scope::Scope;
pub use tuple::{Field, Fields, Tuple, TupleLike, Value};
