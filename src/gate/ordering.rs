//! Mapping a gate's physical predecessors onto its logical branches.

use crate::duct::{DuctId, StreamGraph};
use crate::error::{FlowError, Result};
use std::collections::{HashMap, HashSet, VecDeque};

/// Assigns each predecessor of `gate` to the branch whose name it leads back to.
///
/// For every branch name, each predecessor is walked backward breadth-first until a
/// duct with that name is found; the predecessor at the shortest distance owns the
/// branch. Two predecessors at the same shortest distance, a branch no predecessor
/// reaches, or a predecessor left without a branch are topology errors.
pub(crate) fn order_branches(
    gate: DuctId,
    graph: &StreamGraph,
    names: &[String],
) -> Result<HashMap<DuctId, usize>> {
    let gate_name = graph.name(gate);
    let predecessors = graph.predecessors(gate);
    let mut ordinals = HashMap::with_capacity(predecessors.len());

    for (ordinal, name) in names.iter().enumerate() {
        let mut best: Option<(usize, DuctId)> = None;
        let mut tied = false;
        for &pred in predecessors {
            let Some(distance) = distance_to(graph, pred, name) else {
                continue;
            };
            match best {
                Some((shortest, _)) if distance == shortest => tied = true,
                Some((shortest, _)) if distance > shortest => {}
                _ => {
                    best = Some((distance, pred));
                    tied = false;
                }
            }
        }
        let Some((_, pred)) = best else {
            return Err(FlowError::Topology(format!(
                "no predecessor of '{gate_name}' leads back to branch '{name}'"
            )));
        };
        if tied {
            return Err(FlowError::Topology(format!(
                "branch '{name}' of '{gate_name}' is reachable at equal depth from several predecessors"
            )));
        }
        if let Some(previous) = ordinals.insert(pred, ordinal) {
            return Err(FlowError::Topology(format!(
                "predecessor '{}' of '{gate_name}' feeds both branch '{}' and branch '{name}'",
                graph.name(pred),
                names[previous]
            )));
        }
    }

    if let Some(&orphan) = predecessors.iter().find(|p| !ordinals.contains_key(p)) {
        return Err(FlowError::Topology(format!(
            "predecessor '{}' of '{gate_name}' matches no branch",
            graph.name(orphan)
        )));
    }
    Ok(ordinals)
}

fn distance_to(graph: &StreamGraph, from: DuctId, name: &str) -> Option<usize> {
    let mut queue = VecDeque::from([(from, 0)]);
    let mut seen = HashSet::from([from]);
    while let Some((id, distance)) = queue.pop_front() {
        if graph.name(id) == name {
            return Some(distance);
        }
        for &pred in graph.predecessors(id) {
            if seen.insert(pred) {
                queue.push_back((pred, distance + 1));
            }
        }
    }
    None
}
