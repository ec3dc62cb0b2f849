use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::*;
use crate::context::MemoryPanelSink;
use crate::elements::{test_chain_graph, test_feedback_graph, test_lib};
use crate::param::{ParamRecord, ParamTable};
use crate::schedule::build_plan;
use crate::settings::SweepConfig;
use crate::transform::{PortSpec, TransformDef, TransformOutput};
use crate::validation::validate;

fn context(num_samples: usize) -> SimulationContext {
    SimulationContext::new(SweepConfig {
        num_samples,
        ..Default::default()
    })
}

fn run(
    graph: &mut Graph,
    lib: &TransformLib,
    ctx: &SimulationContext,
    iterations: usize,
) -> anyhow::Result<SweepReport> {
    let plan = build_plan(&validate(graph)?);
    Ok(run_sweep(graph, lib, &plan, ctx, iterations)?)
}

fn amplitude(report: &SweepReport, block_id: BlockId) -> Vec<f64> {
    report
        .signal(block_id, 0)
        .unwrap()
        .as_electrical()
        .unwrap()
        .amplitude
        .clone()
}

fn states(report: &SweepReport) -> Vec<IterationState> {
    report.iterations.iter().map(|record| record.state).collect()
}

/// Electrical source that counts its runs in the `runs` parameter and fails in `fail_at`.
fn counting_source(fail_at: Option<usize>) -> TransformDef {
    TransformDef::new("counting_source", "test")
        .output(PortSpec::required("out", SignalDomain::Electrical))
        .params(ParamTable::new(vec![ParamRecord::new("runs", 0_i64, "")]))
        .lambda(move |_inputs, params, settings| {
            if fail_at == Some(settings.current_iteration) {
                anyhow::bail!("unstable in iteration {}", settings.current_iteration);
            }
            let mut params = params.clone();
            params.set("runs", params.i64_or("runs", 0) + 1);

            Ok(TransformOutput {
                outputs: vec![SignalEnvelope::zero(SignalDomain::Electrical, 0, settings)],
                params,
                results: vec![ResultRecord::number(
                    "iteration",
                    settings.current_iteration as f64,
                    "",
                )],
                ..Default::default()
            })
        })
}

/// `counting_source` (never fails) followed by a `counting_source` failing in `fail_at`.
fn flaky_graph(fail_at: usize) -> (Graph, TransformLib, BlockId, BlockId) {
    let mut lib = test_lib();
    let steady = counting_source(None);
    let flaky = counting_source(Some(fail_at));

    let mut graph = Graph::default();
    let steady_id = graph.add(Block::from(&steady).named("steady")).unwrap();
    let flaky_id = graph.add(Block::from(&flaky).named("flaky")).unwrap();

    lib.add(steady).unwrap();
    lib.add(flaky).unwrap();

    (graph, lib, steady_id, flaky_id)
}

fn ber_graph(reference: &[i64], recovered: &[i64]) -> Graph {
    let lib = test_lib();
    let mut graph = Graph::default();

    let mut reference_block = Block::from(lib.by_name("bit_source").unwrap()).named("reference");
    reference_block.params.set("bits", reference.to_vec());
    let mut recovered_block = Block::from(lib.by_name("bit_source").unwrap()).named("recovered");
    recovered_block.params.set("bits", recovered.to_vec());

    let reference = graph.add(reference_block).unwrap();
    let recovered = graph.add(recovered_block).unwrap();
    let ber = graph
        .add(Block::from(lib.by_name("ber").unwrap()).named("ber"))
        .unwrap();
    graph.connect((reference, 0), (ber, 0)).unwrap();
    graph.connect((recovered, 0), (ber, 1)).unwrap();

    graph
}

#[test]
fn chain_negates_amplitudes() -> anyhow::Result<()> {
    let mut graph = test_chain_graph(&[1.0, 2.0, 3.0, 4.0]);
    let negate = graph.by_name("negate").unwrap().id;

    let report = run(&mut graph, &test_lib(), &context(4), 1)?;

    assert_eq!(amplitude(&report, negate), vec![-1.0, -2.0, -3.0, -4.0]);
    assert_eq!(states(&report), vec![IterationState::Completed]);
    assert!(!report.aborted);

    Ok(())
}

#[test]
fn fork_delivers_identical_copies() -> anyhow::Result<()> {
    let lib = test_lib();
    let mut graph = test_chain_graph(&[0.5, -0.5, 2.0]);
    let source = graph.by_name("source").unwrap().id;
    let negate = graph.by_name("negate").unwrap().id;

    // source -> fork -> negate
    graph.edges.clear();
    let fork = graph.add(Block::from(lib.by_name("fork").unwrap()).named("split"))?;
    graph.connect((source, 0), (fork, 0))?;
    graph.connect((fork, 1), (negate, 0))?;

    let report = run(&mut graph, &lib, &context(3), 1)?;

    let a = report.signal(fork, 0).unwrap();
    let b = report.signal(fork, 1).unwrap();
    assert_eq!(a.port(), 0);
    assert_eq!(b.port(), 1);
    assert_eq!(&a.clone().with_port(1), b);
    assert_eq!(report.signal(source, 0).unwrap(), a);
    assert_eq!(amplitude(&report, negate), vec![-0.5, 0.5, -2.0]);

    Ok(())
}

#[test]
fn feedback_passes_fill_every_segment() -> anyhow::Result<()> {
    let mut graph = test_feedback_graph(&[1.0, 1.0, 1.0, 1.0], 2);
    let adder = graph.by_name("adder").unwrap().id;
    let output = graph.by_name("output").unwrap().id;

    let report = run(&mut graph, &test_lib(), &context(4), 1)?;

    // the second pass only rewrites the second half; the first half keeps the first pass
    assert_eq!(amplitude(&report, adder), vec![1.0, 1.0, 1.0, 1.0]);
    assert_eq!(amplitude(&report, output), vec![-0.5, -0.5, -0.5, -0.5]);

    Ok(())
}

#[test]
fn single_segment_matches_disabled_feedback() -> anyhow::Result<()> {
    let lib = test_lib();
    let mut single = test_feedback_graph(&[1.0, 2.0, 3.0, 4.0], 1);
    let mut disabled = single.clone();
    for block in disabled.blocks.iter_mut() {
        block.feedback_enabled = false;
    }

    let single_report = run(&mut single, &lib, &context(4), 2)?;
    let disabled_report = run(&mut disabled, &lib, &context(4), 2)?;

    let output = single.by_name("output").unwrap().id;
    assert_eq!(amplitude(&single_report, output), vec![-0.5, -1.0, -1.5, -2.0]);
    assert_eq!(single_report.signals, disabled_report.signals);
    assert_eq!(single_report.results, disabled_report.results);

    Ok(())
}

#[test]
fn feedback_buffers_reset_between_iterations() -> anyhow::Result<()> {
    let mut graph = test_feedback_graph(&[2.0, 2.0], 2);
    let output = graph.by_name("output").unwrap().id;

    let once = run(&mut graph.clone(), &test_lib(), &context(2), 1)?;
    let thrice = run(&mut graph, &test_lib(), &context(2), 3)?;

    assert_eq!(amplitude(&once, output), amplitude(&thrice, output));

    Ok(())
}

#[test]
fn ber_counts_errors_and_accumulates() -> anyhow::Result<()> {
    let mut graph = ber_graph(&[1, 0, 1, 1], &[1, 0, 0, 1]);
    let ber = graph.by_name("ber").unwrap().id;
    let panel = Arc::new(MemoryPanelSink::default());
    let ctx = context(4).with_panel(panel.clone());

    let report = run(&mut graph, &test_lib(), &ctx, 3)?;

    for iteration in 1..=3 {
        assert_eq!(report.results.number(&ber, iteration, "errCount"), Some(1.0));
        assert_eq!(report.results.number(&ber, iteration, "ber"), Some(0.25));
    }

    // parameter tables persist across iterations and past the sweep
    let params = &graph.by_id(&ber).unwrap().params;
    assert_eq!(params.i64_or("total_errors", 0), 3);
    assert_eq!(params.i64_or("total_bits", 0), 12);

    let updates = panel.updates();
    assert_eq!(updates.len(), 3);
    assert_eq!(updates[2].panel_id, "ber");
    assert_eq!(updates[2].iteration, 3);

    Ok(())
}

#[test]
fn repeated_sweeps_are_deterministic() -> anyhow::Result<()> {
    let lib = test_lib();
    let mut graph = ber_graph(&[], &[]);
    graph
        .by_name_mut("recovered")
        .unwrap()
        .params
        .set("seed", 11_i64);

    let ctx = SimulationContext::new(SweepConfig {
        seed: 3,
        ..Default::default()
    });

    let first = run(&mut graph.clone(), &lib, &ctx, 4)?;
    let second = run(&mut graph.clone(), &lib, &ctx, 4)?;

    assert_eq!(first.results, second.results);
    assert_eq!(first.signals, second.signals);
    assert_eq!(first.completed(), 4);

    Ok(())
}

#[test]
fn block_error_skips_iteration_atomically() -> anyhow::Result<()> {
    let (mut graph, lib, steady, flaky) = flaky_graph(2);

    let report = run(&mut graph, &lib, &context(4), 3)?;

    assert_eq!(
        states(&report),
        vec![
            IterationState::Completed,
            IterationState::Failed,
            IterationState::Completed
        ]
    );
    assert!(!report.aborted);

    let failure = report.failures().next().unwrap().failure.clone().unwrap();
    match failure {
        ExecutionError::Block(err) => {
            assert_eq!(err.block_id, flaky);
            assert_eq!(err.iteration, 2);
            assert_eq!(err.segment, None);
            assert!(err.cause.contains("unstable"));
        }
        other => panic!("unexpected failure {other:?}"),
    }

    // the steady block ran in iteration 2 but its update was discarded with the iteration
    assert_eq!(graph.by_id(&steady).unwrap().params.i64_or("runs", 0), 2);
    assert!(report.results.get(&steady, 2).is_none());
    assert!(report.results.get(&steady, 3).is_some());

    Ok(())
}

#[test]
fn block_error_aborts_with_policy() -> anyhow::Result<()> {
    let (mut graph, lib, steady, _) = flaky_graph(2);
    let ctx = SimulationContext::new(SweepConfig {
        num_samples: 4,
        failure_policy: FailurePolicy::AbortOnBlockError,
        ..Default::default()
    });

    let report = run(&mut graph, &lib, &ctx, 3)?;

    assert!(report.aborted);
    assert_eq!(
        states(&report),
        vec![IterationState::Completed, IterationState::Failed]
    );
    assert_eq!(report.results.block(&steady).unwrap().len(), 1);

    Ok(())
}

#[test]
fn missing_output_aborts_sweep() -> anyhow::Result<()> {
    let mut lib = test_lib();
    let silent = TransformDef::new("silent", "test")
        .output(PortSpec::required("out", SignalDomain::Electrical))
        .lambda(|_inputs, _params, _settings| Ok(TransformOutput::default()));
    let mut graph = Graph::default();
    let block = graph.add(Block::from(&silent))?;
    lib.add(silent)?;

    let report = run(&mut graph, &lib, &context(4), 5)?;

    assert!(report.aborted);
    assert_eq!(states(&report), vec![IterationState::Failed]);
    assert!(matches!(
        &report.iterations[0].failure,
        Some(ExecutionError::MissingOutput { block_id, port: 0, .. }) if *block_id == block
    ));

    Ok(())
}

#[test]
fn cancellation_between_iterations() -> anyhow::Result<()> {
    let runs = Arc::new(AtomicUsize::new(0));
    let ctx = context(4);

    let cancel = ctx.cancel.clone();
    let counter = runs.clone();
    let cancelling = TransformDef::new("cancelling", "test")
        .output(PortSpec::required("out", SignalDomain::Electrical))
        .lambda(move |_inputs, _params, settings| {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                cancel.cancel();
            }
            Ok(TransformOutput {
                outputs: vec![SignalEnvelope::zero(SignalDomain::Electrical, 0, settings)],
                ..Default::default()
            })
        });

    let mut lib = test_lib();
    let mut graph = Graph::default();
    graph.add(Block::from(&cancelling))?;
    lib.add(cancelling)?;

    let report = run(&mut graph, &lib, &ctx, 10)?;

    // the iteration that requested cancellation still completes
    assert!(report.cancelled);
    assert_eq!(report.completed(), 2);
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    Ok(())
}

#[test]
fn non_finite_results_are_flagged() -> anyhow::Result<()> {
    let mut lib = test_lib();
    let noisy = TransformDef::new("noisy", "test").lambda(|_inputs, _params, _settings| {
        Ok(TransformOutput {
            results: vec![ResultRecord::number("snr", f64::NAN, "dB")],
            ..Default::default()
        })
    });
    let mut graph = Graph::default();
    let block = graph.add(Block::from(&noisy))?;
    lib.add(noisy)?;

    let report = run(&mut graph, &lib, &context(4), 2)?;

    assert_eq!(report.completed(), 2);
    assert_eq!(report.faults.len(), 2);
    assert!(report.results.number(&block, 1, "snr").unwrap().is_nan());

    Ok(())
}

#[test]
fn stale_plan_is_rejected() -> anyhow::Result<()> {
    let lib = test_lib();
    let mut graph = test_chain_graph(&[1.0]);
    let plan = build_plan(&validate(&graph)?);

    let extra = graph.add(Block::from(lib.by_name("electrical_source").unwrap()))?;
    let negate = graph.add(Block::from(lib.by_name("negate").unwrap()))?;
    graph.connect((extra, 0), (negate, 0))?;

    let result = run_sweep(&mut graph, &lib, &plan, &context(4), 1);
    assert!(matches!(result, Err(SweepError::PlanMismatch(_))));

    Ok(())
}

#[test]
fn unknown_transform_is_rejected() -> anyhow::Result<()> {
    let mut graph = test_chain_graph(&[1.0]);
    let plan = build_plan(&validate(&graph)?);

    let result = run_sweep(&mut graph, &TransformLib::default(), &plan, &context(4), 1);
    assert!(matches!(result, Err(SweepError::UnknownTransform { .. })));

    Ok(())
}

#[test]
fn wiring_marks_feedback_inputs() -> anyhow::Result<()> {
    let graph = test_feedback_graph(&[1.0], 2);
    let plan = build_plan(&validate(&graph)?);
    let source = graph.by_name("source").unwrap().id;
    let adder = graph.by_name("adder").unwrap().id;
    let gain = graph.by_name("gain").unwrap().id;

    let wiring = Wiring::new(&graph, &plan);

    let adder_inputs = &wiring.inputs[&adder];
    let from_source = adder_inputs[0].unwrap();
    assert_eq!(
        from_source.from,
        PortRef {
            block_id: source,
            port: 0
        }
    );
    assert!(!from_source.feedback);

    let from_gain = adder_inputs[1].unwrap();
    assert_eq!(from_gain.from.block_id, gain);
    assert!(from_gain.feedback);
    assert_eq!(from_gain.domain, SignalDomain::Electrical);

    assert_eq!(wiring.group_of.get(&adder), Some(&0));
    assert_eq!(wiring.group_of.get(&gain), Some(&0));
    assert!(!wiring.group_of.contains_key(&source));

    Ok(())
}
