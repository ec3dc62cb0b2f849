//! Built-in blocks.

mod digital;
mod electrical;
mod flow;
mod optical;

use anyhow::anyhow;

use crate::graph::{Block, Graph};
use crate::param::{ParamTable, ParamValue};
use crate::settings::RunSettings;
use crate::signal::{DigitalSignal, ElectricalSignal, OpticalSignal, SignalEnvelope};
use crate::transform::{TransformDef, TransformLib};

pub use digital::{BER_ID, BIT_SOURCE_ID};
pub use electrical::{ADDER_ID, AWGN_ID, ELECTRICAL_SOURCE_ID, GAIN_ID, NEGATE_ID};
pub use flow::FORK_ID;
pub use optical::{LASER_ID, PHOTODETECTOR_ID};

/// Every built-in transform.
pub fn basic_lib() -> TransformLib {
    let defs: [TransformDef; 10] = [
        electrical::electrical_source(),
        electrical::negate(),
        electrical::gain(),
        electrical::adder(),
        electrical::awgn(),
        flow::fork(),
        digital::bit_source(),
        digital::ber(),
        optical::laser(),
        optical::photodetector(),
    ];

    let mut lib = TransformLib::default();
    for def in defs {
        lib.add(def).expect("built-in transform ids are unique");
    }
    lib
}

pub fn test_lib() -> TransformLib {
    basic_lib()
}

/// `source -> negate`, the source emitting `amplitudes`.
pub fn test_chain_graph(amplitudes: &[f64]) -> Graph {
    let lib = test_lib();
    let mut graph = Graph::default();

    let mut source = Block::from(lib.by_name("electrical_source").unwrap()).named("source");
    source.params.set("amplitudes", amplitudes.to_vec());
    let source = graph.add(source).unwrap();
    let negate = graph
        .add(Block::from(lib.by_name("negate").unwrap()).named("negate"))
        .unwrap();

    graph.connect((source, 0), (negate, 0)).unwrap();

    graph
}

/// `source -> adder -> gain -> output`, with `gain` fed back into the adder's second input.
///
/// Adder and gain enable feedback with `segment_count` segments; the loop gain is 0.5.
pub fn test_feedback_graph(amplitudes: &[f64], segment_count: usize) -> Graph {
    let lib = test_lib();
    let mut graph = Graph::default();

    let mut source = Block::from(lib.by_name("electrical_source").unwrap()).named("source");
    source.params.set("amplitudes", amplitudes.to_vec());
    let source = graph.add(source).unwrap();
    let adder = graph
        .add(
            Block::from(lib.by_name("adder").unwrap())
                .named("adder")
                .with_feedback(segment_count),
        )
        .unwrap();
    let mut gain = Block::from(lib.by_name("gain").unwrap())
        .named("gain")
        .with_feedback(segment_count);
    gain.params.set("gain", 0.5);
    let gain = graph.add(gain).unwrap();
    let output = graph
        .add(Block::from(lib.by_name("negate").unwrap()).named("output"))
        .unwrap();

    graph.connect((source, 0), (adder, 0)).unwrap();
    graph.connect((adder, 0), (gain, 0)).unwrap();
    graph.connect_feedback((gain, 0), (adder, 1)).unwrap();
    graph.connect((gain, 0), (output, 0)).unwrap();

    graph
}

// === Input access ===

fn input<'a>(inputs: &'a [Option<SignalEnvelope>], port: usize) -> anyhow::Result<&'a SignalEnvelope> {
    inputs
        .get(port)
        .and_then(Option::as_ref)
        .ok_or_else(|| anyhow!("input {port} carries no signal"))
}

fn electrical_input(
    inputs: &[Option<SignalEnvelope>],
    port: usize,
) -> anyhow::Result<&ElectricalSignal> {
    let envelope = input(inputs, port)?;
    envelope
        .as_electrical()
        .ok_or_else(|| anyhow!("input {port} expects an electrical signal, got {}", envelope.domain()))
}

fn optical_input(inputs: &[Option<SignalEnvelope>], port: usize) -> anyhow::Result<&OpticalSignal> {
    let envelope = input(inputs, port)?;
    envelope
        .as_optical()
        .ok_or_else(|| anyhow!("input {port} expects an optical signal, got {}", envelope.domain()))
}

fn digital_input(inputs: &[Option<SignalEnvelope>], port: usize) -> anyhow::Result<&DigitalSignal> {
    let envelope = input(inputs, port)?;
    envelope
        .as_digital()
        .ok_or_else(|| anyhow!("input {port} expects a digital signal, got {}", envelope.domain()))
}

/// Seed for a randomized block: run seed, iteration and the block's own `seed` parameter.
fn block_seed(params: &ParamTable, settings: &RunSettings) -> u64 {
    let own = params
        .get("seed")
        .and_then(ParamValue::as_i64)
        .unwrap_or(0) as u64;

    settings
        .seed
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(settings.current_iteration as u64)
        .rotate_left(17)
        ^ own
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimulationContext;
    use crate::schedule::build_plan;
    use crate::settings::SweepConfig;
    use crate::sweep::run_sweep;
    use crate::validation::validate;

    #[test]
    fn lib_has_every_block() {
        let lib = basic_lib();

        assert_eq!(lib.len(), 10);
        assert_eq!(lib.by_id(&NEGATE_ID).unwrap().name, "negate");
        assert!(lib.by_name("awgn").unwrap().randomized);
        assert!(lib.iter().all(|def| !def.lambda.is_none()));
    }

    #[test]
    fn laser_into_photodetector() -> anyhow::Result<()> {
        let lib = basic_lib();
        let mut graph = Graph::default();

        let mut laser = Block::from(lib.by_id(&LASER_ID).unwrap());
        laser.params.set("power", 4.0e-3);
        let laser = graph.add(laser)?;
        let detector = graph.add(Block::from(lib.by_id(&PHOTODETECTOR_ID).unwrap()))?;
        graph.connect((laser, 0), (detector, 0))?;

        let plan = build_plan(&validate(&graph)?);
        let ctx = SimulationContext::new(SweepConfig {
            num_samples: 8,
            ..Default::default()
        });
        let report = run_sweep(&mut graph, &lib, &plan, &ctx, 1)?;

        let current = report.signal(detector, 0).unwrap().as_electrical().unwrap();
        assert_eq!(current.amplitude.len(), 8);
        assert!(current
            .amplitude
            .iter()
            .all(|&sample| (sample - 4.0e-3).abs() < 1e-12));
        let mean = report.results.number(&detector, 1, "mean_current").unwrap();
        assert!((mean - 4.0e-3).abs() < 1e-12);

        Ok(())
    }
}
