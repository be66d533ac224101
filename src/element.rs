//! The planned element graph a [`Flow`](crate::flow::Flow) is compiled from.
//!
//! An [`ElementGraph`] is what a planner produces: one [`Element`] per relational
//! operator, connected by edges carrying a [`Scope`]. It holds no runtime state and
//! can be compiled into any number of flows.
//!
//! ```
//! use ductflow::element::{Element, ElementGraph};
//! use ductflow::operation::Sum;
//! use ductflow::tap::{MemorySink, MemorySource};
//! use ductflow::{Fields, Scope, tuple};
//!
//! let source = MemorySource::new(
//!     "sales",
//!     Fields::names(["region", "amount"]),
//!     vec![tuple!["eu", 3], tuple!["us", 2], tuple!["eu", 1]],
//! );
//! let mut graph = ElementGraph::new();
//! let sales = graph.add(Element::source("sales", source));
//! let by_region = graph.pipe(
//!     sales,
//!     Element::group_by("by-region"),
//!     Scope::grouping(0, Fields::names(["region"])),
//! );
//! let total = graph.pipe(
//!     by_region,
//!     Element::aggregator("total", Sum::new("total")),
//!     Scope::new().with_arguments(Fields::names(["amount"])),
//! );
//! graph.pipe(total, Element::sink("out", MemorySink::new("out")), Scope::new());
//! assert_eq!(graph.len(), 4);
//! ```

use crate::config::AssertionLevel;
use crate::gate::Joiner;
use crate::operation::{Aggregator, Buffer, Filter, Function, GroupAssertion, ValueAssertion};
use crate::scope::Scope;
use crate::tap::{SinkTap, SourceTap};
use crate::trap::TrapHandler;
use crate::tuple::Fields;
use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::sync::Arc;

/// Handle of an element within its [`ElementGraph`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position of the element in insertion order.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "@{}", self.0)
    }
}

/// One planned operator.
#[derive(Clone)]
pub enum Element {
    Source {
        name: String,
        tap: Arc<dyn SourceTap>,
    },
    Sink {
        name: String,
        tap: Arc<dyn SinkTap>,
    },
    Function {
        name: String,
        function: Arc<dyn Function>,
    },
    Filter {
        name: String,
        filter: Arc<dyn Filter>,
    },
    ValueAssertion {
        name: String,
        level: AssertionLevel,
        assertion: Arc<dyn ValueAssertion>,
    },
    Aggregator {
        name: String,
        aggregator: Arc<dyn Aggregator>,
    },
    Buffer {
        name: String,
        buffer: Arc<dyn Buffer>,
    },
    GroupAssertion {
        name: String,
        level: AssertionLevel,
        assertion: Arc<dyn GroupAssertion>,
    },
    /// Groups one or more branches of equal width by key.
    GroupBy { name: String },
    /// Joins branches by key; `self_joins = n` joins a single branch with itself
    /// `n` times. `declared` renames the joined values, which must then match their
    /// width.
    CoGroup {
        name: String,
        joiner: Arc<dyn Joiner>,
        declared: Option<Fields>,
        self_joins: usize,
    },
    /// Interleaves branches of equal width without grouping them.
    Merge { name: String },
}

impl Element {
    pub fn source(name: impl Into<String>, tap: impl SourceTap + 'static) -> Self {
        Element::Source {
            name: name.into(),
            tap: Arc::new(tap),
        }
    }

    pub fn sink(name: impl Into<String>, tap: impl SinkTap + 'static) -> Self {
        Element::Sink {
            name: name.into(),
            tap: Arc::new(tap),
        }
    }

    pub fn function(name: impl Into<String>, function: impl Function + 'static) -> Self {
        Element::Function {
            name: name.into(),
            function: Arc::new(function),
        }
    }

    pub fn filter(name: impl Into<String>, filter: impl Filter + 'static) -> Self {
        Element::Filter {
            name: name.into(),
            filter: Arc::new(filter),
        }
    }

    pub fn value_assertion(
        name: impl Into<String>,
        level: AssertionLevel,
        assertion: impl ValueAssertion + 'static,
    ) -> Self {
        Element::ValueAssertion {
            name: name.into(),
            level,
            assertion: Arc::new(assertion),
        }
    }

    pub fn aggregator(name: impl Into<String>, aggregator: impl Aggregator + 'static) -> Self {
        Element::Aggregator {
            name: name.into(),
            aggregator: Arc::new(aggregator),
        }
    }

    pub fn buffer(name: impl Into<String>, buffer: impl Buffer + 'static) -> Self {
        Element::Buffer {
            name: name.into(),
            buffer: Arc::new(buffer),
        }
    }

    pub fn group_assertion(
        name: impl Into<String>,
        level: AssertionLevel,
        assertion: impl GroupAssertion + 'static,
    ) -> Self {
        Element::GroupAssertion {
            name: name.into(),
            level,
            assertion: Arc::new(assertion),
        }
    }

    pub fn group_by(name: impl Into<String>) -> Self {
        Element::GroupBy { name: name.into() }
    }

    pub fn co_group(name: impl Into<String>, joiner: impl Joiner + 'static) -> Self {
        Element::CoGroup {
            name: name.into(),
            joiner: Arc::new(joiner),
            declared: None,
            self_joins: 0,
        }
    }

    /// A co-group of a single branch with `self_joins` copies of itself.
    pub fn self_join(
        name: impl Into<String>,
        joiner: impl Joiner + 'static,
        self_joins: usize,
    ) -> Self {
        Element::CoGroup {
            name: name.into(),
            joiner: Arc::new(joiner),
            declared: None,
            self_joins,
        }
    }

    pub fn merge(name: impl Into<String>) -> Self {
        Element::Merge { name: name.into() }
    }

    /// Renames the joined values of a co-group; ignored by every other element.
    #[must_use]
    pub fn with_declared(mut self, fields: Fields) -> Self {
        if let Element::CoGroup { declared, .. } = &mut self {
            *declared = Some(fields);
        }
        self
    }

    pub fn name(&self) -> &str {
        match self {
            Element::Source { name, .. }
            | Element::Sink { name, .. }
            | Element::Function { name, .. }
            | Element::Filter { name, .. }
            | Element::ValueAssertion { name, .. }
            | Element::Aggregator { name, .. }
            | Element::Buffer { name, .. }
            | Element::GroupAssertion { name, .. }
            | Element::GroupBy { name }
            | Element::CoGroup { name, .. }
            | Element::Merge { name } => name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Element::Source { .. } => "source",
            Element::Sink { .. } => "sink",
            Element::Function { .. } => "function",
            Element::Filter { .. } => "filter",
            Element::ValueAssertion { .. } => "value-assertion",
            Element::Aggregator { .. } => "aggregator",
            Element::Buffer { .. } => "buffer",
            Element::GroupAssertion { .. } => "group-assertion",
            Element::GroupBy { .. } => "group-by",
            Element::CoGroup { .. } => "co-group",
            Element::Merge { .. } => "merge",
        }
    }

    /// Grouping elements: the gates.
    pub fn is_grouping(&self) -> bool {
        matches!(self, Element::GroupBy { .. } | Element::CoGroup { .. })
    }

    /// Elements driven group by group behind a gate.
    pub fn is_every(&self) -> bool {
        matches!(
            self,
            Element::Aggregator { .. } | Element::Buffer { .. } | Element::GroupAssertion { .. }
        )
    }

    /// Every elements that extend the group result and may be chained.
    pub(crate) fn is_reducer(&self) -> bool {
        matches!(
            self,
            Element::Aggregator { .. } | Element::GroupAssertion { .. }
        )
    }
}

/// A directed edge between two elements.
#[derive(Clone, Debug)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub scope: Scope,
}

/// The planner's output: elements, scoped edges and per-branch traps.
#[derive(Clone, Default)]
pub struct ElementGraph {
    nodes: Vec<Element>,
    edges: Vec<Edge>,
    traps: HashMap<String, Arc<dyn TrapHandler>>,
}

impl ElementGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, element: Element) -> NodeId {
        self.nodes.push(element);
        NodeId::new(self.nodes.len() - 1)
    }

    pub fn connect(&mut self, from: NodeId, to: NodeId, scope: Scope) {
        self.edges.push(Edge { from, to, scope });
    }

    /// Adds `element` fed by `from`.
    pub fn pipe(&mut self, from: NodeId, element: Element, scope: Scope) -> NodeId {
        let id = self.add(element);
        self.connect(from, id, scope);
        id
    }

    /// Registers the trap of the branch named `branch`.
    pub fn trap(&mut self, branch: impl Into<String>, handler: impl TrapHandler + 'static) {
        self.traps.insert(branch.into(), Arc::new(handler));
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Element {
        &self.nodes[id.index()]
    }

    pub fn nodes(&self) -> &[Element] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|e| e.name() == name)
            .map(NodeId::new)
    }

    pub(crate) fn traps(&self) -> &HashMap<String, Arc<dyn TrapHandler>> {
        &self.traps
    }
}
