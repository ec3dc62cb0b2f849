//! Iteration controller: runs the execution plan once per sweep iteration.

use hashbrown::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapter::{execute, ExecutionError};
use crate::context::SimulationContext;
use crate::feedback::{merge_pass_output, ConvergenceError, ConvergenceTracker};
use crate::graph::{Block, BlockId, Graph, PortRef};
use crate::param::{ParamTable, ResultRecord};
use crate::results::{IterationResultSet, NumericFault, ResultsCollector};
use crate::schedule::{ExecutionPlan, ScheduleEntry};
use crate::settings::{ConfigError, FailurePolicy, RunSettings};
use crate::signal::{SignalDomain, SignalEnvelope};
use crate::transform::{TransformId, TransformLib};

#[cfg(test)]
mod tests;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SweepError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Block {0} is scheduled but not part of the graph")]
    UnknownBlock(BlockId),
    #[error("Block {block_name} uses unregistered transform {transform_id}")]
    UnknownTransform {
        block_id: BlockId,
        block_name: String,
        transform_id: TransformId,
    },
    #[error("Execution plan does not match the graph: {0}")]
    PlanMismatch(String),
    #[error("Feedback group {group}: {source}")]
    Convergence {
        group: usize,
        source: ConvergenceError,
    },
}

pub type Result<T> = std::result::Result<T, SweepError>;

// === Iteration bookkeeping ===

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IterationState {
    #[default]
    Pending,
    Executing,
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IterationRecord {
    pub iteration: usize,
    pub state: IterationState,
    pub failure: Option<ExecutionError>,
}

#[derive(Clone, Debug, Default)]
pub struct SweepReport {
    pub results: IterationResultSet,
    pub iterations: Vec<IterationRecord>,
    pub faults: Vec<NumericFault>,
    /// A fatal failure stopped the sweep before all iterations ran.
    pub aborted: bool,
    pub cancelled: bool,
    /// Output envelopes of the last completed iteration.
    pub signals: HashMap<PortRef, SignalEnvelope>,
}

impl IterationRecord {
    fn new(iteration: usize) -> Self {
        IterationRecord {
            iteration,
            state: IterationState::Pending,
            failure: None,
        }
    }
}

impl SweepReport {
    pub fn completed(&self) -> usize {
        self.iterations
            .iter()
            .filter(|record| record.state == IterationState::Completed)
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &IterationRecord> {
        self.iterations
            .iter()
            .filter(|record| record.state == IterationState::Failed)
    }

    pub fn signal(&self, block_id: BlockId, port: usize) -> Option<&SignalEnvelope> {
        self.signals.get(&PortRef { block_id, port })
    }
}

// === Input wiring ===

#[derive(Clone, Copy, Debug)]
struct InputSource {
    from: PortRef,
    feedback: bool,
    domain: SignalDomain,
}

/// Everything staged by one iteration, committed only when it completes.
#[derive(Debug, Default)]
struct Staged {
    params: HashMap<BlockId, ParamTable>,
    /// First-execution order; a block executed again replaces its earlier results.
    results: Vec<(BlockId, Vec<ResultRecord>)>,
    signals: HashMap<PortRef, SignalEnvelope>,
}

/// Input sources per block, fixed for the whole sweep.
#[derive(Debug, Default)]
struct Wiring {
    inputs: HashMap<BlockId, Vec<Option<InputSource>>>,
    /// Multi-segment groups only.
    group_of: HashMap<BlockId, usize>,
}

struct Sweep<'a> {
    graph: &'a Graph,
    lib: &'a TransformLib,
    plan: &'a ExecutionPlan,
    ctx: &'a SimulationContext,
    wiring: &'a Wiring,
    total_iterations: usize,
}

impl Staged {
    fn params_of<'b>(&'b self, block: &'b Block) -> &'b ParamTable {
        self.params.get(&block.id).unwrap_or(&block.params)
    }

    fn stage_results(&mut self, block_id: BlockId, results: Vec<ResultRecord>) {
        match self.results.iter_mut().find(|(id, _)| *id == block_id) {
            Some((_, staged)) => *staged = results,
            None => self.results.push((block_id, results)),
        }
    }
}

/// Runs `total_iterations` iterations of `plan` over `graph`.
///
/// Parameter tables updated by completed iterations are written back to `graph` and persist into
/// the next iteration. Signal buffers start empty every iteration. A missing output or input
/// aborts the sweep; a block failure skips the iteration unless the failure policy says otherwise.
pub fn run_sweep(
    graph: &mut Graph,
    lib: &TransformLib,
    plan: &ExecutionPlan,
    ctx: &SimulationContext,
    total_iterations: usize,
) -> Result<SweepReport> {
    ctx.config.validate()?;
    check_plan(graph, lib, plan)?;

    info!(
        blocks = graph.blocks.len(),
        entries = plan.len(),
        iterations = total_iterations,
        "Starting sweep"
    );

    let wiring = Wiring::new(graph, plan);
    let mut collector = ResultsCollector::default();
    let mut report = SweepReport::default();

    for iteration in 1..=total_iterations {
        if ctx.cancel.is_cancelled() {
            info!(iteration, "Sweep cancelled");
            report.cancelled = true;
            break;
        }

        let mut record = IterationRecord::new(iteration);
        record.state = IterationState::Executing;
        debug!(iteration, "Iteration started");

        let sweep = Sweep {
            graph,
            lib,
            plan,
            ctx,
            wiring: &wiring,
            total_iterations,
        };
        match sweep.run_iteration(iteration) {
            Ok(staged) => {
                commit(graph, ctx, &mut collector, iteration, &staged);
                report.signals = staged.signals;
                record.state = IterationState::Completed;
                report.iterations.push(record);
            }
            Err(err) => {
                warn!(iteration, %err, "Iteration failed");

                let fatal = match &err {
                    ExecutionError::Block(_) => {
                        ctx.config.failure_policy == FailurePolicy::AbortOnBlockError
                    }
                    ExecutionError::MissingOutput { .. } | ExecutionError::MissingInput { .. } => {
                        true
                    }
                };
                record.state = IterationState::Failed;
                record.failure = Some(err);
                report.iterations.push(record);

                if fatal {
                    report.aborted = true;
                    break;
                }
            }
        }
    }

    let (results, faults) = collector.finish();
    report.results = results;
    report.faults = faults;

    info!(
        completed = report.completed(),
        failed = report.failures().count(),
        aborted = report.aborted,
        cancelled = report.cancelled,
        "Sweep finished"
    );

    Ok(report)
}

/// Rejects plans that do not fit the graph, including feedback passes out of order.
fn check_plan(graph: &Graph, lib: &TransformLib, plan: &ExecutionPlan) -> Result<()> {
    if plan.edge_kinds.len() != graph.edges.len() {
        return Err(SweepError::PlanMismatch(format!(
            "{} edge kinds for {} edges",
            plan.edge_kinds.len(),
            graph.edges.len()
        )));
    }

    for entry in plan.entries.iter() {
        let block = graph
            .by_id(&entry.block_id)
            .ok_or(SweepError::UnknownBlock(entry.block_id))?;
        if lib.by_id(&block.transform_id).is_none() {
            return Err(SweepError::UnknownTransform {
                block_id: block.id,
                block_name: block.name.clone(),
                transform_id: block.transform_id,
            });
        }
    }

    for block in graph.blocks.iter() {
        if plan.position(&block.id).is_none() {
            return Err(SweepError::PlanMismatch(format!(
                "block {} is never scheduled",
                block.name
            )));
        }
    }

    let mut trackers: Vec<ConvergenceTracker> = plan
        .groups
        .iter()
        .map(|group| ConvergenceTracker::new(group.segment_count))
        .collect();
    for entry in plan.entries.iter() {
        if let Some((group, segment)) = pass_of(entry) {
            let tracker = trackers.get_mut(group).ok_or_else(|| {
                SweepError::PlanMismatch(format!("entry refers to missing group {group}"))
            })?;
            advance(tracker, plan, group, entry, segment)
                .map_err(|source| SweepError::Convergence { group, source })?;
        }
    }
    for (group, tracker) in trackers.iter().enumerate() {
        let scheduled = plan.entries.iter().any(|entry| entry.group == Some(group));
        if scheduled && !tracker.is_converged() {
            return Err(SweepError::Convergence {
                group,
                source: ConvergenceError::Incomplete {
                    completed: tracker.completed(),
                    segment_count: tracker.segment_count(),
                },
            });
        }
    }

    Ok(())
}

fn pass_of(entry: &ScheduleEntry) -> Option<(usize, usize)> {
    match (entry.group, entry.segment) {
        (Some(group), Some(segment)) => Some((group, segment)),
        _ => None,
    }
}

/// Opens the pass at the group's first member and closes it after the last.
fn advance(
    tracker: &mut ConvergenceTracker,
    plan: &ExecutionPlan,
    group: usize,
    entry: &ScheduleEntry,
    segment: usize,
) -> std::result::Result<(), ConvergenceError> {
    let order = &plan.groups[group].internal_order;
    if order.first() == Some(&entry.block_id) {
        tracker.begin_pass(segment)?;
    }
    if order.last() == Some(&entry.block_id) {
        tracker.complete_pass(segment)?;
    }
    Ok(())
}

fn commit(
    graph: &mut Graph,
    ctx: &SimulationContext,
    collector: &mut ResultsCollector,
    iteration: usize,
    staged: &Staged,
) {
    for (block_id, params) in staged.params.iter() {
        if let Some(block) = graph.by_id_mut(block_id) {
            block.params = params.clone();
        }
    }

    for (block_id, results) in staged.results.iter() {
        if results.is_empty() {
            continue;
        }
        collector.record(*block_id, iteration, results.clone());

        let rows: Vec<ResultRecord> = results
            .iter()
            .filter(|record| record.display)
            .cloned()
            .collect();
        if rows.is_empty() {
            continue;
        }
        if let Some(block) = graph.by_id(block_id) {
            ctx.panel.publish(&block.name, iteration, &rows);
        }
    }

    debug!(iteration, "Iteration committed");
}

impl Wiring {
    fn new(graph: &Graph, plan: &ExecutionPlan) -> Self {
        let mut inputs: HashMap<BlockId, Vec<Option<InputSource>>> = graph
            .blocks
            .iter()
            .map(|block| (block.id, vec![None; block.inputs.len()]))
            .collect();

        for (edge_idx, edge) in graph.edges.iter().enumerate() {
            let domain = graph
                .by_id(&edge.from.block_id)
                .and_then(|block| block.outputs.get(edge.from.port))
                .map_or(SignalDomain::Any, |port| port.domain);
            let slot = inputs
                .get_mut(&edge.to.block_id)
                .and_then(|ports| ports.get_mut(edge.to.port));
            if let Some(slot) = slot {
                *slot = Some(InputSource {
                    from: edge.from,
                    feedback: plan.is_feedback_edge(edge_idx),
                    domain,
                });
            }
        }

        let group_of = plan
            .entries
            .iter()
            .filter_map(|entry| entry.group.map(|group| (entry.block_id, group)))
            .collect();

        Wiring { inputs, group_of }
    }
}

impl Sweep<'_> {
    fn run_iteration(&self, iteration: usize) -> std::result::Result<Staged, ExecutionError> {
        let mut base = self.ctx.config.run_settings(iteration);
        base.iterations = self.total_iterations;

        let mut staged = Staged::default();
        let mut trackers: Vec<ConvergenceTracker> = self
            .plan
            .groups
            .iter()
            .map(|group| ConvergenceTracker::new(group.segment_count))
            .collect();

        for entry in self.plan.entries.iter() {
            let settings = match entry.segment {
                Some(segment) => {
                    let segment_count = entry
                        .group
                        .map_or(1, |group| self.plan.groups[group].segment_count);
                    base.for_segment(segment, segment_count)
                }
                None => base.clone(),
            };

            if let Some((group, segment)) = pass_of(entry) {
                let first = self.plan.groups[group].internal_order.first();
                if first == Some(&entry.block_id) {
                    trackers[group]
                        .begin_pass(segment)
                        .expect("pass order checked before the sweep");
                }
            }

            self.run_entry(entry, &settings, &trackers, &mut staged)?;

            if let Some((group, segment)) = pass_of(entry) {
                let last = self.plan.groups[group].internal_order.last();
                if last == Some(&entry.block_id) {
                    trackers[group]
                        .complete_pass(segment)
                        .expect("pass order checked before the sweep");
                }
            }
        }

        Ok(staged)
    }

    fn run_entry(
        &self,
        entry: &ScheduleEntry,
        settings: &RunSettings,
        trackers: &[ConvergenceTracker],
        staged: &mut Staged,
    ) -> std::result::Result<(), ExecutionError> {
        let block = self
            .graph
            .by_id(&entry.block_id)
            .expect("scheduled blocks checked before the sweep");
        let def = self
            .lib
            .by_id(&block.transform_id)
            .expect("transforms checked before the sweep");

        let inputs = self.gather_inputs(block, entry, settings, trackers, staged);

        let outcome = if staged.params.contains_key(&block.id) {
            let current = Block {
                params: staged.params_of(block).clone(),
                ..block.clone()
            };
            execute(&current, def, &inputs, settings, self.ctx)?
        } else {
            execute(block, def, &inputs, settings, self.ctx)?
        };

        for (port, envelope) in outcome.outputs.into_iter().enumerate() {
            let Some(mut envelope) = envelope else {
                continue;
            };
            let key = PortRef {
                block_id: block.id,
                port,
            };
            if entry.segment.is_some() {
                merge_pass_output(&block.name, &mut envelope, staged.signals.get(&key), settings);
            }
            staged.signals.insert(key, envelope);
        }

        if let Some(params) = outcome.params {
            staged.params.insert(block.id, params);
        }
        staged.stage_results(block.id, outcome.results);

        Ok(())
    }

    fn gather_inputs(
        &self,
        block: &Block,
        entry: &ScheduleEntry,
        settings: &RunSettings,
        trackers: &[ConvergenceTracker],
        staged: &Staged,
    ) -> Vec<Option<SignalEnvelope>> {
        let Some(sources) = self.wiring.inputs.get(&block.id) else {
            return Vec::new();
        };

        sources
            .iter()
            .map(|source| {
                let source = source.as_ref()?;

                if let Some(&group) = self.wiring.group_of.get(&source.from.block_id) {
                    if entry.group != Some(group) {
                        assert!(
                            trackers[group].is_converged(),
                            "block {} reads feedback group {group} before it converged",
                            block.name
                        );
                    }
                }

                match staged.signals.get(&source.from) {
                    Some(envelope) => Some(envelope.clone()),
                    None if source.feedback => Some(SignalEnvelope::zero(
                        source.domain,
                        source.from.port,
                        settings,
                    )),
                    None => None,
                }
            })
            .collect()
    }
}
