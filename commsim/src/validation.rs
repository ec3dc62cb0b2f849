//! Structural checks run once before a sweep starts.
//!
//! Besides rejecting malformed graphs, validation classifies every edge as forward or feedback and
//! partitions the blocks taking part in feedback loops into groups (strongly connected components).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::graph::{BlockId, Graph, GraphError, PortDirection};
use crate::signal::{PortIndex, SignalDomain};
use crate::topology::{adjacency, stable_topological_order, tarjan_scc};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("Input port {port} ({port_name}) of block {block_name} is not connected")]
    UnconnectedInput {
        block_id: BlockId,
        block_name: String,
        port: PortIndex,
        port_name: String,
    },
    #[error("Cycle without a feedback edge through blocks {}", block_names.join(", "))]
    IllegalCycle {
        block_ids: Vec<BlockId>,
        block_names: Vec<String>,
    },
    #[error("Input port {port} of block {block_name} has {count} incoming edges")]
    DuplicateInputEdge {
        block_id: BlockId,
        block_name: String,
        port: PortIndex,
        count: usize,
    },
    #[error("Edge {edge_idx} links a {from} output to a {to} input")]
    DomainMismatch {
        edge_idx: usize,
        from: SignalDomain,
        to: SignalDomain,
    },
    #[error("Block {block_name} has zero feedback segments")]
    ZeroSegments { block_id: BlockId, block_name: String },
}

pub type Result<T> = std::result::Result<T, ValidationError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Forward,
    Feedback,
}

/// Blocks forming one strongly connected component of the full edge set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedbackGroup {
    /// Creation order.
    pub members: Vec<BlockId>,
    /// Order of execution within one segment pass.
    pub internal_order: Vec<BlockId>,
    pub segment_count: usize,
    pub feedback_enabled: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Indexed like `Graph::edges`.
    pub edge_kinds: Vec<EdgeKind>,
    /// Ordered by the creation index of each group's earliest member.
    pub groups: Vec<FeedbackGroup>,
    /// Edges declared as feedback that close no cycle and were treated as forward.
    pub reclassified: Vec<usize>,
    group_by_block: Vec<Option<usize>>,
}

/// A graph that passed validation together with its edge classification.
#[derive(Clone, Debug)]
pub struct ValidatedGraph<'a> {
    graph: &'a Graph,
    report: ValidationReport,
}

impl ValidationReport {
    /// Group containing the block at `creation_index`, if any.
    pub fn group_of_index(&self, creation_index: usize) -> Option<usize> {
        self.group_by_block.get(creation_index).copied().flatten()
    }

    pub fn feedback_edges(&self) -> impl Iterator<Item = usize> + '_ {
        self.edge_kinds
            .iter()
            .enumerate()
            .filter(|(_, kind)| **kind == EdgeKind::Feedback)
            .map(|(idx, _)| idx)
    }
}

impl<'a> ValidatedGraph<'a> {
    pub fn graph(&self) -> &'a Graph {
        self.graph
    }

    pub fn report(&self) -> &ValidationReport {
        &self.report
    }

    pub fn edge_kind(&self, edge_idx: usize) -> EdgeKind {
        self.report.edge_kinds[edge_idx]
    }

    pub fn group_of(&self, block_id: &BlockId) -> Option<usize> {
        let idx = self.graph.creation_index(block_id)?;
        self.report.group_of_index(idx)
    }
}

pub fn validate(graph: &Graph) -> Result<ValidatedGraph<'_>> {
    check_structure(graph)?;
    check_inputs_connected(graph)?;

    // (source, destination) by creation index
    let links: Vec<(usize, usize)> = graph
        .edges
        .iter()
        .map(|edge| {
            let from = graph.creation_index(&edge.from.block_id);
            let to = graph.creation_index(&edge.to.block_id);
            match (from, to) {
                (Some(from), Some(to)) => Ok((from, to)),
                (None, _) => Err(GraphError::UnknownBlock(edge.from.block_id)),
                (_, None) => Err(GraphError::UnknownBlock(edge.to.block_id)),
            }
        })
        .collect::<std::result::Result<Vec<_>, GraphError>>()?;

    let (edge_kinds, reclassified) = classify_edges(graph, &links)?;
    for &edge_idx in &reclassified {
        let edge = &graph.edges[edge_idx];
        warn!(
            edge = edge_idx,
            from = %block_name(graph, &edge.from.block_id),
            to = %block_name(graph, &edge.to.block_id),
            "Edge is marked as feedback but closes no cycle, treating it as forward"
        );
    }

    let forward_links: Vec<(usize, usize)> = links
        .iter()
        .zip(edge_kinds.iter())
        .filter(|(_, kind)| **kind == EdgeKind::Forward)
        .map(|(link, _)| *link)
        .collect();

    let (groups, group_by_block) = find_groups(graph, &links, &forward_links)?;

    debug!(
        blocks = graph.blocks.len(),
        edges = graph.edges.len(),
        groups = groups.len(),
        "Graph validated"
    );

    Ok(ValidatedGraph {
        graph,
        report: ValidationReport {
            edge_kinds,
            groups,
            reclassified,
            group_by_block,
        },
    })
}

// === Structure ===

fn check_structure(graph: &Graph) -> Result<()> {
    for block in graph.blocks.iter() {
        if block.segment_count == 0 {
            return Err(ValidationError::ZeroSegments {
                block_id: block.id,
                block_name: block.name.clone(),
            });
        }
    }

    for (edge_idx, edge) in graph.edges.iter().enumerate() {
        let from = graph.check_port(&edge.from, PortDirection::Output)?;
        let to = graph.check_port(&edge.to, PortDirection::Input)?;

        if !from.domain.accepts(to.domain) {
            return Err(ValidationError::DomainMismatch {
                edge_idx,
                from: from.domain,
                to: to.domain,
            });
        }
    }

    for block in graph.blocks.iter() {
        for port in block.inputs.iter() {
            let count = graph
                .edges
                .iter()
                .filter(|edge| edge.to.block_id == block.id && edge.to.port == port.index)
                .count();
            if count > 1 {
                return Err(ValidationError::DuplicateInputEdge {
                    block_id: block.id,
                    block_name: block.name.clone(),
                    port: port.index,
                    count,
                });
            }
        }
    }

    Ok(())
}

fn check_inputs_connected(graph: &Graph) -> Result<()> {
    for block in graph.blocks.iter() {
        for port in block.inputs.iter().filter(|port| !port.optional) {
            if graph.incoming(&(block.id, port.index).into()).is_none() {
                return Err(ValidationError::UnconnectedInput {
                    block_id: block.id,
                    block_name: block.name.clone(),
                    port: port.index,
                    port_name: port.name.clone(),
                });
            }
        }
    }

    Ok(())
}

// === Classification ===

/// Unmarked edges must be acyclic. A marked edge is feedback when both its ends lie in the same
/// strongly connected component of the full graph, otherwise it joins the forward set.
fn classify_edges(
    graph: &Graph,
    links: &[(usize, usize)],
) -> Result<(Vec<EdgeKind>, Vec<usize>)> {
    let block_count = graph.blocks.len();

    let mut forward: Vec<Vec<usize>> = vec![Vec::new(); block_count];
    for (edge, &(from, to)) in graph.edges.iter().zip(links) {
        if !edge.feedback {
            forward[from].push(to);
        }
    }
    check_acyclic(graph, &forward)?;

    let all_edges = adjacency(block_count, links);
    let mut component_of: Vec<Option<usize>> = vec![None; block_count];
    for (component_idx, component) in tarjan_scc(&all_edges)
        .into_iter()
        .filter(|component| is_cyclic(component, &all_edges))
        .enumerate()
    {
        for idx in component {
            component_of[idx] = Some(component_idx);
        }
    }

    let mut kinds = vec![EdgeKind::Forward; links.len()];
    let mut reclassified = Vec::new();
    for (edge_idx, (edge, &(from, to))) in graph.edges.iter().zip(links).enumerate() {
        if !edge.feedback {
            continue;
        }
        match (component_of[from], component_of[to]) {
            (Some(a), Some(b)) if a == b => kinds[edge_idx] = EdgeKind::Feedback,
            _ => reclassified.push(edge_idx),
        }
    }

    Ok((kinds, reclassified))
}

fn check_acyclic(graph: &Graph, forward: &[Vec<usize>]) -> Result<()> {
    let cycle = tarjan_scc(forward)
        .into_iter()
        .filter(|component| is_cyclic(component, forward))
        .min_by_key(|component| component[0]);

    match cycle {
        None => Ok(()),
        Some(component) => {
            let blocks: Vec<_> = component.iter().map(|&idx| &graph.blocks[idx]).collect();
            Err(ValidationError::IllegalCycle {
                block_ids: blocks.iter().map(|block| block.id).collect(),
                block_names: blocks.iter().map(|block| block.name.clone()).collect(),
            })
        }
    }
}

fn is_cyclic(component: &[usize], adjacency: &[Vec<usize>]) -> bool {
    match component {
        [single] => adjacency[*single].contains(single),
        _ => true,
    }
}

// === Groups ===

fn find_groups(
    graph: &Graph,
    links: &[(usize, usize)],
    forward_links: &[(usize, usize)],
) -> Result<(Vec<FeedbackGroup>, Vec<Option<usize>>)> {
    let block_count = graph.blocks.len();
    let all_edges = adjacency(block_count, links);

    let mut components: Vec<Vec<usize>> = tarjan_scc(&all_edges)
        .into_iter()
        .filter(|component| is_cyclic(component, &all_edges))
        .collect();
    components.sort_by_key(|component| component[0]);

    let mut groups = Vec::with_capacity(components.len());
    let mut group_by_block = vec![None; block_count];

    for (group_idx, component) in components.into_iter().enumerate() {
        let internal = stable_topological_order(&component, forward_links, |idx| idx).ok_or_else(
            || ValidationError::IllegalCycle {
                block_ids: component.iter().map(|&idx| graph.blocks[idx].id).collect(),
                block_names: component
                    .iter()
                    .map(|&idx| graph.blocks[idx].name.clone())
                    .collect(),
            },
        )?;

        for &idx in &component {
            group_by_block[idx] = Some(group_idx);
        }

        let (segment_count, feedback_enabled) = group_segment_count(graph, &component);
        debug!(
            group = group_idx,
            members = component.len(),
            segment_count,
            "Feedback group found"
        );

        groups.push(FeedbackGroup {
            members: component.iter().map(|&idx| graph.blocks[idx].id).collect(),
            internal_order: internal.iter().map(|&idx| graph.blocks[idx].id).collect(),
            segment_count,
            feedback_enabled,
        });
    }

    for (idx, block) in graph.blocks.iter().enumerate() {
        if block.feedback_enabled && group_by_block[idx].is_none() {
            debug!(
                block = %block.name,
                "Feedback enabled on a block outside any feedback loop, ignored"
            );
        }
    }

    Ok((groups, group_by_block))
}

/// Largest `segment_count` among members that enable feedback, or a single segment when none do.
fn group_segment_count(graph: &Graph, component: &[usize]) -> (usize, bool) {
    let counts: Vec<usize> = component
        .iter()
        .map(|&idx| &graph.blocks[idx])
        .filter(|block| block.feedback_enabled)
        .map(|block| block.segment_count)
        .collect();

    let Some(&max) = counts.iter().max() else {
        return (1, false);
    };
    if counts.iter().any(|&count| count != max) {
        warn!(
            segment_counts = ?counts,
            used = max,
            "Feedback group members disagree on the segment count"
        );
    }

    (max, max > 1)
}

fn block_name(graph: &Graph, id: &BlockId) -> String {
    graph
        .by_id(id)
        .map_or_else(|| id.to_string(), |block| block.name.clone())
}
