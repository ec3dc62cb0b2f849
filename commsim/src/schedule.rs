use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::graph::BlockId;
use crate::topology::stable_topological_order;
use crate::validation::{EdgeKind, FeedbackGroup, ValidatedGraph};

/// One block execution. Feedback-group members with more than one segment appear once per pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub block_id: BlockId,
    /// 1-based pass index, set only for multi-segment feedback groups.
    pub segment: Option<usize>,
    pub group: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct ExecutionPlan {
    pub entries: Vec<ScheduleEntry>,
    pub groups: Vec<FeedbackGroup>,
    /// Indexed like `Graph::edges`.
    pub edge_kinds: Vec<EdgeKind>,
    /// Forward predecessors of each block.
    dependencies: HashMap<BlockId, Vec<BlockId>>,
    /// Blocks in first-execution order.
    order: Vec<BlockId>,
}

impl ScheduleEntry {
    fn plain(block_id: BlockId) -> Self {
        ScheduleEntry {
            block_id,
            segment: None,
            group: None,
        }
    }
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dependencies(&self, block_id: &BlockId) -> &[BlockId] {
        self.dependencies
            .get(block_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Position of the first execution of `block_id`.
    pub fn position(&self, block_id: &BlockId) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.block_id == *block_id)
    }

    pub fn is_feedback_edge(&self, edge_idx: usize) -> bool {
        self.edge_kinds
            .get(edge_idx)
            .is_some_and(|kind| *kind == EdgeKind::Feedback)
    }

    /// Wavefronts of the forward subgraph: every block depends only on blocks of earlier levels.
    ///
    /// Blocks of one level may run concurrently. Members of a multi-segment feedback group still
    /// have to run pass by pass as the entries list them.
    pub fn levels(&self) -> Vec<Vec<BlockId>> {
        let mut level_of: HashMap<BlockId, usize> = HashMap::with_capacity(self.order.len());
        let mut levels: Vec<Vec<BlockId>> = Vec::new();

        for block_id in self.order.iter() {
            let level = self
                .dependencies(block_id)
                .iter()
                .filter_map(|dependency| level_of.get(dependency))
                .map(|level| level + 1)
                .max()
                .unwrap_or(0);

            level_of.insert(*block_id, level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(*block_id);
        }

        levels
    }
}

/// Orders the graph for execution.
///
/// Forward edges are sorted topologically, ties broken by creation order. Each feedback group
/// takes a single slot, placed by its earliest member, that expands into `segment_count` passes
/// over the group's internal order. A single-segment group yields plain entries.
pub fn build_plan(validated: &ValidatedGraph<'_>) -> ExecutionPlan {
    let graph = validated.graph();
    let report = validated.report();
    let block_count = graph.blocks.len();

    // blocks of a group collapse onto the group's earliest member
    let representative: Vec<usize> = (0..block_count)
        .map(|idx| match report.group_of_index(idx) {
            Some(group_idx) => report.groups[group_idx]
                .members
                .first()
                .and_then(|id| graph.creation_index(id))
                .unwrap_or(idx),
            None => idx,
        })
        .collect();

    let mut dependencies: HashMap<BlockId, Vec<BlockId>> = HashMap::with_capacity(block_count);
    let mut condensed_links: Vec<(usize, usize)> = Vec::new();

    for (edge, kind) in graph.edges.iter().zip(report.edge_kinds.iter()) {
        if *kind != EdgeKind::Forward {
            continue;
        }
        dependencies
            .entry(edge.to.block_id)
            .or_default()
            .push(edge.from.block_id);

        let from = graph.creation_index(&edge.from.block_id);
        let to = graph.creation_index(&edge.to.block_id);
        if let (Some(from), Some(to)) = (from, to) {
            let (from, to) = (representative[from], representative[to]);
            if from != to {
                condensed_links.push((from, to));
            }
        }
    }

    let nodes: Vec<usize> = (0..block_count)
        .filter(|&idx| representative[idx] == idx)
        .collect();
    // forward edges are acyclic after validation and the condensation of an acyclic graph stays so
    let slots = stable_topological_order(&nodes, &condensed_links, |idx| idx).unwrap_or(nodes);

    let mut entries = Vec::with_capacity(block_count);
    let mut order = Vec::with_capacity(block_count);

    for slot in slots {
        let Some(group_idx) = report.group_of_index(slot) else {
            let block_id = graph.blocks[slot].id;
            entries.push(ScheduleEntry::plain(block_id));
            order.push(block_id);
            continue;
        };

        let group = &report.groups[group_idx];
        order.extend(group.internal_order.iter().copied());

        if group.segment_count == 1 {
            entries.extend(group.internal_order.iter().copied().map(ScheduleEntry::plain));
            continue;
        }
        for segment in 1..=group.segment_count {
            entries.extend(group.internal_order.iter().map(|&block_id| ScheduleEntry {
                block_id,
                segment: Some(segment),
                group: Some(group_idx),
            }));
        }
    }

    debug!(
        entries = entries.len(),
        blocks = block_count,
        groups = report.groups.len(),
        "Execution plan built"
    );

    ExecutionPlan {
        entries,
        groups: report.groups.clone(),
        edge_kinds: report.edge_kinds.clone(),
        dependencies,
        order,
    }
}
