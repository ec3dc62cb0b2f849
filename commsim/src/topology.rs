//! Index-based graph algorithms shared by the validator and the scheduler.
//!
//! Nodes are dense indices; for blocks the index is the creation order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

pub(crate) fn adjacency(node_count: usize, edges: &[(usize, usize)]) -> Vec<Vec<usize>> {
    let mut adjacency = vec![Vec::new(); node_count];
    for &(from, to) in edges {
        adjacency[from].push(to);
    }
    adjacency
}

/// Strongly connected components, iterative Tarjan. Members of each component are sorted.
pub(crate) fn tarjan_scc(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;

    let node_count = adjacency.len();
    let mut index = vec![UNVISITED; node_count];
    let mut lowlink = vec![0; node_count];
    let mut on_stack = vec![false; node_count];
    let mut stack: Vec<usize> = Vec::new();
    let mut frames: Vec<(usize, usize)> = Vec::new();
    let mut components: Vec<Vec<usize>> = Vec::new();
    let mut next_index = 0;

    for root in 0..node_count {
        if index[root] != UNVISITED {
            continue;
        }

        index[root] = next_index;
        lowlink[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;
        frames.push((root, 0));

        while let Some(frame) = frames.last_mut() {
            let node = frame.0;
            if let Some(&next) = adjacency[node].get(frame.1) {
                frame.1 += 1;
                if index[next] == UNVISITED {
                    index[next] = next_index;
                    lowlink[next] = next_index;
                    next_index += 1;
                    stack.push(next);
                    on_stack[next] = true;
                    frames.push((next, 0));
                } else if on_stack[next] {
                    lowlink[node] = lowlink[node].min(index[next]);
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[node]);
            }

            if lowlink[node] == index[node] {
                let mut component = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack[member] = false;
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                component.sort_unstable();
                components.push(component);
            }
        }
    }

    components
}

/// Kahn's algorithm restricted to `nodes`; among ready nodes the lowest `priority` goes first.
///
/// Edges with an endpoint outside `nodes` are ignored. Returns `None` if the subgraph has a cycle.
pub(crate) fn stable_topological_order(
    nodes: &[usize],
    edges: &[(usize, usize)],
    priority: impl Fn(usize) -> usize,
) -> Option<Vec<usize>> {
    let max_node = nodes.iter().copied().max().map_or(0, |max| max + 1);
    let mut member = vec![false; max_node];
    for &node in nodes {
        member[node] = true;
    }
    let inside = |node: usize| node < max_node && member[node];

    let mut in_degree = vec![0_usize; max_node];
    let mut successors = vec![Vec::new(); max_node];
    for &(from, to) in edges {
        if inside(from) && inside(to) {
            in_degree[to] += 1;
            successors[from].push(to);
        }
    }

    let mut ready: BinaryHeap<Reverse<(usize, usize)>> = nodes
        .iter()
        .filter(|&&node| in_degree[node] == 0)
        .map(|&node| Reverse((priority(node), node)))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse((_, node))) = ready.pop() {
        order.push(node);
        for &next in &successors[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse((priority(next), next)));
            }
        }
    }

    (order.len() == nodes.len()).then_some(order)
}
