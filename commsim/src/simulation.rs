use thiserror::Error;
use tracing::info;

use crate::context::SimulationContext;
use crate::graph::Graph;
use crate::schedule::{build_plan, ExecutionPlan};
use crate::sweep::{run_sweep, SweepError, SweepReport};
use crate::transform::TransformLib;
use crate::validation::{validate, ValidationError};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimulationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Sweep(#[from] SweepError),
}

pub type Result<T> = std::result::Result<T, SimulationError>;

/// Validates `graph` and schedules it. Nothing executes.
pub fn prepare(graph: &Graph) -> Result<ExecutionPlan> {
    let validated = validate(graph)?;
    let plan = build_plan(&validated);

    info!(
        blocks = graph.blocks.len(),
        entries = plan.len(),
        groups = plan.groups.len(),
        "Graph prepared"
    );

    Ok(plan)
}

/// Runs `ctx.config.iterations` iterations of `graph`.
///
/// Validation failures are returned before any block executes. Parameter tables updated by the
/// sweep are left in `graph`.
pub fn run_simulation(
    graph: &mut Graph,
    lib: &TransformLib,
    ctx: &SimulationContext,
) -> Result<SweepReport> {
    let plan = prepare(graph)?;
    let report = run_sweep(graph, lib, &plan, ctx, ctx.config.iterations)?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::context::MemoryLogSink;
    use crate::elements::{test_chain_graph, test_feedback_graph, test_lib};
    use crate::graph::Block;
    use crate::settings::SweepConfig;
    use crate::signal::{SignalDomain, SignalEnvelope};
    use crate::transform::{PortSpec, TransformDef, TransformOutput};

    #[test]
    fn runs_configured_iterations() -> anyhow::Result<()> {
        let mut graph = test_chain_graph(&[1.0, 2.0, 3.0, 4.0]);
        let negate = graph.by_name("negate").unwrap().id;
        let ctx = SimulationContext::new(SweepConfig {
            num_samples: 4,
            iterations: 3,
            ..Default::default()
        });

        let report = run_simulation(&mut graph, &test_lib(), &ctx)?;

        assert_eq!(report.completed(), 3);
        assert_eq!(
            report.signal(negate, 0).unwrap().as_electrical().unwrap().amplitude,
            vec![-1.0, -2.0, -3.0, -4.0]
        );

        Ok(())
    }

    #[test]
    fn unconnected_input_rejected_before_execution() -> anyhow::Result<()> {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let counting = TransformDef::new("counting", "test")
            .output(PortSpec::required("out", SignalDomain::Electrical))
            .lambda(move |_inputs, _params, settings| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(TransformOutput {
                    outputs: vec![SignalEnvelope::zero(SignalDomain::Electrical, 0, settings)],
                    messages: vec!["counting ran".to_string()],
                    ..Default::default()
                })
            });

        let mut lib = test_lib();
        let mut graph = Graph::default();
        graph.add(Block::from(&counting).named("counting"))?;
        let negate = graph.add(Block::from(lib.by_name("negate").unwrap()).named("negate"))?;
        lib.add(counting)?;

        let log = Arc::new(MemoryLogSink::default());
        let ctx = SimulationContext::default().with_log(log.clone());

        let err = run_simulation(&mut graph, &lib, &ctx).unwrap_err();

        assert!(matches!(
            err,
            SimulationError::Validation(ValidationError::UnconnectedInput { block_id, port: 0, .. })
                if block_id == negate
        ));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(log.lines().is_empty());

        Ok(())
    }

    #[test]
    fn prepare_expands_feedback_passes() -> anyhow::Result<()> {
        let graph = test_feedback_graph(&[1.0], 3);

        let plan = prepare(&graph)?;

        // source, 3 x (adder, gain), output
        assert_eq!(plan.len(), 8);
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].segment_count, 3);

        Ok(())
    }

    #[test]
    fn unknown_transform_surfaces_as_sweep_error() {
        let mut graph = test_chain_graph(&[1.0]);

        let err = run_simulation(
            &mut graph,
            &TransformLib::default(),
            &SimulationContext::default(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            SimulationError::Sweep(SweepError::UnknownTransform { .. })
        ));
    }
}
