//! Element graph to duct graph.
//!
//! Compilation runs in four steps:
//!
//! 1. **check**: unique names, valid and non-duplicate edges;
//! 2. **strip**: assertions above the configured level are removed and their
//!    predecessors wired straight to their successors;
//! 3. **build**: in topological order, every element becomes a duct and gets the
//!    [`Shape`] of what it emits; field declarations are resolved along the way;
//! 4. **wire**: edges become duct connections, inserting plumbing per the shape of
//!    the producer and the kind of its consumers:
//!
//! | producer emits | one consumer             | several consumers                        |
//! |----------------|--------------------------|------------------------------------------|
//! | tuples         | direct                   | `Fork`                                   |
//! | groupings      | `OpenWindow` / `OpenReducingWindow` | `Fork`, then a window per consumer |
//! | group results  | direct                   | reducing `Fork`, then `CloseWindow` each |
//!
//! Consumers other than gates and merges that have several inputs get a `Merge`
//! duct in front of them.

use super::{CloseWindow, Duct, DuctId, Fork, Merge, OpenReducingWindow, OpenWindow, StreamGraph};
use crate::config::AssertionLevel;
use crate::element::{Edge, Element, ElementGraph, NodeId};
use crate::error::{FieldsError, FlowError, Result};
use crate::gate::{GateBranch, Joiner, MemoryGate, Union};
use crate::process::FlowProcess;
use crate::scope::Scope;
use crate::stage::{
    AggregatorStage, BufferStage, EachOp, EachStage, FailureRouter, GroupAssertionStage,
    SinkStage, SourceStage,
};
use crate::trap::{FailFast, TrapHandler};
use crate::tuple::{Fields, SparseComparator};
use log::debug;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// The result of compiling an element graph.
pub(crate) struct Compiled {
    /// The sealed duct graph.
    pub(crate) graph: StreamGraph,
    /// The edges that survived stripping, with branch names and field declarations
    /// filled in.
    pub(crate) edges: Vec<Edge>,
}

/// The rows a gate groups and the key they are grouped by.
#[derive(Clone, Debug)]
struct GroupShape {
    values: Fields,
    key: Fields,
    /// Positions of the key within `values`.
    key_positions: Vec<usize>,
}

/// What an element emits.
#[derive(Clone, Debug)]
enum Shape {
    Plain(Fields),
    Grouped(GroupShape),
    Reduced { group: GroupShape, result: Fields },
    Terminal,
}

impl Shape {
    /// Declaration of the tuples a non-reducing consumer sees.
    fn fields(&self) -> Option<&Fields> {
        match self {
            Shape::Plain(fields) => Some(fields),
            Shape::Grouped(group) => Some(&group.values),
            Shape::Reduced { result, .. } => Some(result),
            Shape::Terminal => None,
        }
    }
}

pub(crate) fn compile(elements: &ElementGraph, process: &Arc<FlowProcess>) -> Result<Compiled> {
    check_names(elements)?;
    check_edges(elements)?;
    let (edges, live) = strip_assertions(elements, process.config().assertion_level);
    let mut compiler = Compiler::new(elements, edges, live, process)?;
    compiler.validate()?;
    compiler.build()?;
    compiler.wire();
    let edges = compiler.resolved_edges();
    let mut graph = compiler.graph;
    graph.seal()?;
    debug!(
        "compiled {} elements into {} ducts",
        elements.len(),
        graph.len()
    );
    Ok(Compiled { graph, edges })
}

fn check_names(elements: &ElementGraph) -> Result<()> {
    let mut seen = HashSet::new();
    for element in elements.nodes() {
        if !seen.insert(element.name()) {
            return Err(FlowError::Topology(format!(
                "element name '{}' is used twice",
                element.name()
            )));
        }
    }
    Ok(())
}

fn check_edges(elements: &ElementGraph) -> Result<()> {
    let len = elements.len();
    let mut seen = HashSet::new();
    for edge in elements.edges() {
        if edge.from.index() >= len || edge.to.index() >= len {
            return Err(FlowError::Topology(format!(
                "edge {} -> {} references an unknown element",
                edge.from, edge.to
            )));
        }
        let from = elements.node(edge.from).name();
        let to = elements.node(edge.to).name();
        if edge.from == edge.to {
            return Err(FlowError::Topology(format!("'{from}' feeds itself")));
        }
        if !seen.insert((edge.from, edge.to)) {
            return Err(FlowError::Topology(format!(
                "duplicate edge '{from}' -> '{to}'"
            )));
        }
    }
    Ok(())
}

/// Removes the assertions `level` does not permit, wiring each of their inputs to
/// each of their outputs with the scope of the outgoing edge.
fn strip_assertions(elements: &ElementGraph, level: AssertionLevel) -> (Vec<Edge>, Vec<bool>) {
    let mut edges = elements.edges().to_vec();
    let mut live = vec![true; elements.len()];
    for (index, element) in elements.nodes().iter().enumerate() {
        let tagged = match element {
            Element::ValueAssertion { level, .. } | Element::GroupAssertion { level, .. } => *level,
            _ => continue,
        };
        if level.permits(tagged) {
            continue;
        }
        let id = NodeId::new(index);
        let (touching, rest): (Vec<Edge>, Vec<Edge>) =
            edges.into_iter().partition(|e| e.from == id || e.to == id);
        edges = rest;
        for input in touching.iter().filter(|e| e.to == id) {
            for output in touching.iter().filter(|e| e.from == id) {
                edges.push(Edge {
                    from: input.from,
                    to: output.to,
                    scope: output.scope.clone(),
                });
            }
        }
        live[index] = false;
        debug!("stripped {} '{}'", element.kind(), element.name());
    }
    (edges, live)
}

struct Compiler<'g> {
    elements: &'g ElementGraph,
    process: Arc<FlowProcess>,
    edges: Vec<Edge>,
    incoming: Vec<Vec<usize>>,
    outgoing: Vec<Vec<usize>>,
    order: Vec<NodeId>,
    shapes: Vec<Option<Shape>>,
    entries: Vec<Option<DuctId>>,
    exits: Vec<Option<DuctId>>,
    branches: Vec<String>,
    fail_fast: Arc<dyn TrapHandler>,
    graph: StreamGraph,
}

impl<'g> Compiler<'g> {
    fn new(
        elements: &'g ElementGraph,
        edges: Vec<Edge>,
        live: Vec<bool>,
        process: &Arc<FlowProcess>,
    ) -> Result<Self> {
        let len = elements.len();
        let mut incoming = vec![Vec::new(); len];
        let mut outgoing = vec![Vec::new(); len];
        for (i, edge) in edges.iter().enumerate() {
            outgoing[edge.from.index()].push(i);
            incoming[edge.to.index()].push(i);
        }

        let mut indegree: Vec<usize> = incoming.iter().map(Vec::len).collect();
        let mut ready: VecDeque<NodeId> = (0..len)
            .filter(|&i| live[i] && indegree[i] == 0)
            .map(NodeId::new)
            .collect();
        let mut order = Vec::with_capacity(len);
        while let Some(id) = ready.pop_front() {
            order.push(id);
            for &e in &outgoing[id.index()] {
                let to = edges[e].to.index();
                indegree[to] -= 1;
                if indegree[to] == 0 {
                    ready.push_back(edges[e].to);
                }
            }
        }
        let live_count = live.iter().filter(|l| **l).count();
        if order.len() != live_count {
            return Err(FlowError::Topology(
                "element graph contains a cycle".to_string(),
            ));
        }

        Ok(Self {
            elements,
            process: Arc::clone(process),
            edges,
            incoming,
            outgoing,
            order,
            shapes: vec![None; len],
            entries: vec![None; len],
            exits: vec![None; len],
            branches: vec![String::new(); len],
            fail_fast: Arc::new(FailFast),
            graph: StreamGraph::new(),
        })
    }

    fn element(&self, id: NodeId) -> &'g Element {
        self.elements.node(id)
    }

    fn inputs(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.incoming[id.index()].iter().map(|&e| &self.edges[e])
    }

    fn targets(&self, id: NodeId) -> Vec<NodeId> {
        self.outgoing[id.index()]
            .iter()
            .map(|&e| self.edges[e].to)
            .collect()
    }

    fn validate(&self) -> Result<()> {
        for &id in &self.order {
            let element = self.element(id);
            let name = element.name();
            let inputs = self.incoming[id.index()].len();
            let outputs = self.outgoing[id.index()].len();
            let topology = |message: String| Err(FlowError::Topology(message));

            match element {
                Element::Source { .. } if inputs > 0 => {
                    return topology(format!("source '{name}' has inputs"));
                }
                Element::Sink { .. } if outputs > 0 => {
                    return topology(format!("sink '{name}' has outputs"));
                }
                Element::Source { .. } => {}
                _ if inputs == 0 => {
                    return topology(format!("{} '{name}' has no inputs", element.kind()));
                }
                _ => {}
            }
            if !matches!(element, Element::Sink { .. }) && outputs == 0 {
                return topology(format!("{} '{name}' has no consumers", element.kind()));
            }

            match element {
                Element::GroupBy { .. } | Element::CoGroup { .. } => {
                    let mut ordinals: Vec<usize> =
                        self.inputs(id).map(|e| e.scope.ordinal).collect();
                    ordinals.sort_unstable();
                    if ordinals.iter().enumerate().any(|(i, o)| i != *o) {
                        return topology(format!(
                            "branch ordinals of '{name}' must be dense and unique, found {ordinals:?}"
                        ));
                    }
                    if let Element::CoGroup { self_joins, .. } = element {
                        if *self_joins > 0 && inputs != 1 {
                            return topology(format!(
                                "self-join '{name}' needs exactly one input, found {inputs}"
                            ));
                        }
                        if *self_joins == 0 && inputs < 2 {
                            return topology(format!(
                                "co-group '{name}' needs at least two inputs"
                            ));
                        }
                    }
                }
                Element::Aggregator { .. } | Element::GroupAssertion { .. } | Element::Buffer { .. } => {
                    if inputs != 1 {
                        return topology(format!(
                            "{} '{name}' needs exactly one input, found {inputs}",
                            element.kind()
                        ));
                    }
                    let Some(edge) = self.inputs(id).next() else {
                        continue;
                    };
                    let before = self.element(edge.from);
                    let placed = if before.is_grouping() {
                        true
                    } else {
                        !matches!(element, Element::Buffer { .. })
                            && before.is_reducer()
                            && self.outgoing[edge.from.index()].len() == 1
                    };
                    if !placed {
                        return topology(format!(
                            "{} '{name}' must follow a grouping{}, not {} '{}'",
                            element.kind(),
                            if matches!(element, Element::Buffer { .. }) {
                                ""
                            } else {
                                " or a single-consumer aggregator"
                            },
                            before.kind(),
                            before.name()
                        ));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn trap_for(&mut self, id: NodeId) -> Arc<dyn TrapHandler> {
        let element = self.element(id);
        let name = element.name();
        let traps = self.elements.traps();
        let branch = if traps.contains_key(name)
            || element.is_grouping()
            || matches!(element, Element::Source { .. })
        {
            name.to_string()
        } else {
            self.inputs(id)
                .next()
                .map(|e| self.branches[e.from.index()].clone())
                .unwrap_or_else(|| name.to_string())
        };
        let trap = traps
            .get(&branch)
            .map_or_else(|| Arc::clone(&self.fail_fast), Arc::clone);
        self.branches[id.index()] = branch;
        trap
    }

    fn shape(&self, id: NodeId) -> Result<&Shape> {
        self.shapes[id.index()].as_ref().ok_or_else(|| {
            FlowError::Topology(format!("'{}' used before it was built", self.element(id).name()))
        })
    }

    /// Declaration of the tuples reaching a non-reducing element, with the scope of
    /// its first input. Several inputs must agree on width.
    fn plain_input(&self, id: NodeId) -> Result<(Fields, &Scope)> {
        let name = self.element(id).name();
        let mut declared: Option<(Fields, &Scope)> = None;
        for edge in self.inputs(id) {
            let fields = self.shape(edge.from)?.fields().cloned().ok_or_else(|| {
                FlowError::Topology(format!("'{name}' is fed by a sink"))
            })?;
            match &declared {
                None => declared = Some((fields, &edge.scope)),
                Some((first, _)) if first.size() != fields.size() => {
                    return Err(FlowError::fields(
                        name,
                        FieldsError::WidthMismatch {
                            expected: first.size(),
                            actual: fields.size(),
                        },
                    ));
                }
                Some(_) => {}
            }
        }
        declared.ok_or_else(|| FlowError::Topology(format!("'{name}' has no inputs")))
    }

    /// The group and the group result reaching an Every element.
    fn group_input(&self, id: NodeId) -> Result<(GroupShape, Fields, &Scope)> {
        let name = self.element(id).name();
        let Some(edge) = self.inputs(id).next() else {
            return Err(FlowError::Topology(format!("'{name}' has no inputs")));
        };
        match self.shape(edge.from)? {
            Shape::Grouped(group) => Ok((group.clone(), group.key.clone(), &edge.scope)),
            Shape::Reduced { group, result } => Ok((group.clone(), result.clone(), &edge.scope)),
            _ => Err(FlowError::Topology(format!(
                "'{name}' is not fed by a grouping"
            ))),
        }
    }

    fn add_stage(&mut self, id: NodeId, duct: Arc<dyn Duct>) {
        let stage = self.graph.add(duct);
        let entry = if self.incoming[id.index()].len() > 1 {
            let merge = self
                .graph
                .add(Arc::new(Merge::new(format!("merge:{}", self.element(id).name()))));
            self.graph.connect(merge, stage);
            merge
        } else {
            stage
        };
        self.entries[id.index()] = Some(entry);
        self.exits[id.index()] = Some(stage);
    }

    fn build(&mut self) -> Result<()> {
        for id in self.order.clone() {
            let element = self.element(id);
            let name = element.name();
            let trap = self.trap_for(id);
            let failures = FailureRouter::new(name, trap, Arc::clone(&self.process));
            let process = Arc::clone(&self.process);

            let shape = match element {
                Element::Source { tap, .. } => {
                    let source = Arc::new(SourceStage::new(name, Arc::clone(tap), process));
                    let duct = self.graph.add_source(source);
                    self.entries[id.index()] = Some(duct);
                    self.exits[id.index()] = Some(duct);
                    Shape::Plain(tap.fields())
                }
                Element::Sink { tap, .. } => {
                    self.plain_input(id)?;
                    self.add_stage(id, Arc::new(SinkStage::new(name, Arc::clone(tap), process)));
                    Shape::Terminal
                }
                Element::Function { function, .. } => {
                    self.each(id, EachOp::Function(Arc::clone(function)), failures)?
                }
                Element::Filter { filter, .. } => {
                    self.each(id, EachOp::Filter(Arc::clone(filter)), failures)?
                }
                Element::ValueAssertion { assertion, .. } => {
                    self.each(id, EachOp::Assertion(Arc::clone(assertion)), failures)?
                }
                Element::Merge { .. } => {
                    let (fields, _) = self.plain_input(id)?;
                    let duct = self.graph.add(Arc::new(Merge::new(name)));
                    self.entries[id.index()] = Some(duct);
                    self.exits[id.index()] = Some(duct);
                    Shape::Plain(fields)
                }
                Element::GroupBy { .. } => self.gate(id, Arc::new(Union), None, 0)?,
                Element::CoGroup {
                    joiner,
                    declared,
                    self_joins,
                    ..
                } => self.gate(id, Arc::clone(joiner), declared.as_ref(), *self_joins)?,
                Element::Aggregator { aggregator, .. } => {
                    let (group, result, scope) = self.group_input(id)?;
                    let (stage, result) = AggregatorStage::new(
                        name,
                        Arc::clone(aggregator),
                        &group.values,
                        &result,
                        scope,
                        failures,
                        process,
                    )?;
                    self.add_stage(id, Arc::new(stage));
                    Shape::Reduced { group, result }
                }
                Element::GroupAssertion { assertion, .. } => {
                    let (group, result, scope) = self.group_input(id)?;
                    let stage = GroupAssertionStage::new(
                        name,
                        Arc::clone(assertion),
                        &group.values,
                        group.key.size(),
                        scope,
                        failures,
                    )?;
                    self.add_stage(id, Arc::new(stage));
                    Shape::Reduced { group, result }
                }
                Element::Buffer { buffer, .. } => {
                    let (group, _, scope) = self.group_input(id)?;
                    let (stage, fields) = BufferStage::new(
                        name,
                        Arc::clone(buffer),
                        &group.values,
                        group.key_positions.clone(),
                        scope,
                        failures,
                        process,
                    )?;
                    self.add_stage(id, Arc::new(stage));
                    Shape::Plain(fields)
                }
            };
            debug!("built {} '{name}' emitting {shape:?}", element.kind());
            self.shapes[id.index()] = Some(shape);
        }
        Ok(())
    }

    fn each(&mut self, id: NodeId, op: EachOp, failures: FailureRouter) -> Result<Shape> {
        let name = self.element(id).name();
        let (incoming, scope) = self.plain_input(id)?;
        let (stage, fields) = EachStage::new(
            name,
            op,
            &incoming,
            scope,
            failures,
            Arc::clone(&self.process),
        )?;
        self.add_stage(id, Arc::new(stage));
        Ok(Shape::Plain(fields))
    }

    fn gate(
        &mut self,
        id: NodeId,
        joiner: Arc<dyn Joiner>,
        declared: Option<&Fields>,
        self_joins: usize,
    ) -> Result<Shape> {
        let name = self.element(id).name();
        let fields_error = |e| FlowError::fields(name, e);

        let mut inputs: Vec<&Edge> = self.inputs(id).collect();
        inputs.sort_by_key(|e| e.scope.ordinal);
        let mut branches = Vec::with_capacity(inputs.len());
        let mut branch_fields = Vec::with_capacity(inputs.len());
        for edge in &inputs {
            let fields = self.shape(edge.from)?.fields().cloned().ok_or_else(|| {
                FlowError::Topology(format!("'{name}' is fed by a sink"))
            })?;
            let scope = &edge.scope;
            let key = scope
                .grouping
                .as_ref()
                .unwrap_or(&Fields::All)
                .resolve(&fields)
                .map_err(fields_error)?;
            let sort = match &scope.sorting {
                Some(sorting) => Some(SparseComparator::new(
                    sorting.resolve(&fields).map_err(fields_error)?,
                )),
                None => None,
            };
            branches.push(GateBranch {
                name: self.element(edge.from).name().to_string(),
                key,
                sort,
                width: fields.size(),
            });
            branch_fields.push(fields);
        }
        let (Some(first), Some(first_fields)) = (branches.first(), branch_fields.first()) else {
            return Err(FlowError::Topology(format!("'{name}' has no inputs")));
        };
        if let Some(other) = branches.iter().find(|b| b.key.len() != first.key.len()) {
            return Err(fields_error(FieldsError::WidthMismatch {
                expected: first.key.len(),
                actual: other.key.len(),
            }));
        }
        let key = first_fields.select(&first.key);
        let key_positions = first.key.clone();
        let reverse = inputs.first().is_some_and(|e| e.scope.reverse);

        let values = if self_joins == 0 && !matches!(self.element(id), Element::CoGroup { .. }) {
            if let Some(other) = branch_fields.iter().find(|f| f.size() != first_fields.size()) {
                return Err(fields_error(FieldsError::WidthMismatch {
                    expected: first_fields.size(),
                    actual: other.size(),
                }));
            }
            first_fields.clone()
        } else {
            let joined = if self_joins > 0 {
                (0..=self_joins).fold(Fields::none(), |acc, _| acc.append(first_fields))
            } else {
                branch_fields
                    .iter()
                    .fold(Fields::none(), |acc, f| acc.append(f))
            };
            match declared {
                Some(declared) if declared.size() != joined.size() => {
                    return Err(fields_error(FieldsError::WidthMismatch {
                        expected: joined.size(),
                        actual: declared.size(),
                    }));
                }
                Some(declared) => declared.clone(),
                None => joined,
            }
        };
        values.ensure_unique().map_err(fields_error)?;

        let logical = if self_joins > 0 {
            self_joins + 1
        } else {
            branches.len()
        };
        joiner
            .validate(logical)
            .map_err(|message| FlowError::Topology(format!("'{name}': {message}")))?;

        let gate = MemoryGate::new(
            name,
            branches,
            self_joins,
            reverse,
            joiner,
            Arc::clone(&self.process),
        );
        let duct = self.graph.add(Arc::new(gate));
        self.entries[id.index()] = Some(duct);
        self.exits[id.index()] = Some(duct);
        Ok(Shape::Grouped(GroupShape {
            values,
            key,
            key_positions,
        }))
    }

    fn entry(&self, id: NodeId) -> Option<DuctId> {
        self.entries[id.index()]
    }

    fn wire(&mut self) {
        for id in self.order.clone() {
            let (Some(exit), Some(shape)) = (self.exits[id.index()], self.shapes[id.index()].clone())
            else {
                continue;
            };
            let name = self.element(id).name();
            let targets: Vec<(NodeId, DuctId)> = self
                .targets(id)
                .into_iter()
                .filter_map(|t| self.entry(t).map(|entry| (t, entry)))
                .collect();

            match (&shape, targets.as_slice()) {
                (Shape::Terminal, _) => {}
                (Shape::Plain(_) | Shape::Reduced { .. }, [(_, entry)]) => {
                    self.graph.connect(exit, *entry);
                }
                (Shape::Plain(_), many) => {
                    let fork = self.graph.add(Arc::new(Fork::new(format!("fork:{name}"), false)));
                    self.graph.connect(exit, fork);
                    for (_, entry) in many {
                        self.graph.connect(fork, *entry);
                    }
                }
                (Shape::Reduced { .. }, many) => {
                    let fork = self.graph.add(Arc::new(Fork::new(format!("fork:{name}"), true)));
                    self.graph.connect(exit, fork);
                    for (target, entry) in many {
                        let close_name = format!("close-window:{}", self.element(*target).name());
                        let close = self.graph.add(Arc::new(CloseWindow::new(close_name)));
                        self.graph.connect(fork, close);
                        self.graph.connect(close, *entry);
                    }
                }
                (Shape::Grouped(_), many) => {
                    let from = if many.len() == 1 {
                        exit
                    } else {
                        let fork =
                            self.graph.add(Arc::new(Fork::new(format!("fork:{name}"), false)));
                        self.graph.connect(exit, fork);
                        fork
                    };
                    for (target, entry) in many {
                        let target = self.element(*target);
                        let window: Arc<dyn Duct> = if target.is_every() {
                            Arc::new(OpenReducingWindow::new(format!(
                                "open-reducing-window:{}",
                                target.name()
                            )))
                        } else {
                            Arc::new(OpenWindow::new(format!("open-window:{}", target.name())))
                        };
                        let window = self.graph.add(window);
                        self.graph.connect(from, window);
                        self.graph.connect(window, *entry);
                    }
                }
            }
        }
    }

    fn resolved_edges(&self) -> Vec<Edge> {
        self.edges
            .iter()
            .map(|edge| {
                let mut scope = edge.scope.clone();
                scope.name = self.element(edge.from).name().to_string();
                if let Some(fields) = self.shapes[edge.from.index()]
                    .as_ref()
                    .and_then(Shape::fields)
                {
                    scope.fields = fields.clone();
                }
                Edge {
                    from: edge.from,
                    to: edge.to,
                    scope,
                }
            })
            .collect()
    }
}
