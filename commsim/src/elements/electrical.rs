use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::param::{ParamRecord, ParamTable, ParamValue};
use crate::signal::{ElectricalSignal, SignalDomain, SignalEnvelope};
use crate::transform::{PortSpec, TransformDef, TransformId, TransformOutput};

use super::{block_seed, electrical_input};

pub const ELECTRICAL_SOURCE_ID: TransformId =
    TransformId::from_u128(0x5b1c_0e4a_7d2f_4c0e_9a61_0d3b_2f7e_0001);
pub const NEGATE_ID: TransformId = TransformId::from_u128(0x5b1c_0e4a_7d2f_4c0e_9a61_0d3b_2f7e_0002);
pub const GAIN_ID: TransformId = TransformId::from_u128(0x5b1c_0e4a_7d2f_4c0e_9a61_0d3b_2f7e_0003);
pub const ADDER_ID: TransformId = TransformId::from_u128(0x5b1c_0e4a_7d2f_4c0e_9a61_0d3b_2f7e_0004);
pub const AWGN_ID: TransformId = TransformId::from_u128(0x5b1c_0e4a_7d2f_4c0e_9a61_0d3b_2f7e_0005);

const OUT: usize = 0;

fn output(signal: ElectricalSignal) -> TransformOutput {
    TransformOutput {
        outputs: vec![SignalEnvelope::Electrical(ElectricalSignal {
            port: OUT,
            ..signal
        })],
        ..Default::default()
    }
}

fn scaled(signal: &ElectricalSignal, factor: f64) -> ElectricalSignal {
    ElectricalSignal {
        amplitude: signal.amplitude.iter().map(|value| value * factor).collect(),
        noise: signal.noise.iter().map(|value| value * factor).collect(),
        ..signal.clone()
    }
}

// electrical_source, repeats `amplitudes` over the window
pub(super) fn electrical_source() -> TransformDef {
    TransformDef::new("electrical_source", "electrical")
        .with_id(ELECTRICAL_SOURCE_ID)
        .output(PortSpec::required("out", SignalDomain::Electrical))
        .params(ParamTable::new(vec![
            ParamRecord::new("amplitudes", vec![1.0], "V"),
            ParamRecord::new("carrier_frequency", 0.0, "Hz"),
        ]))
        .lambda(|_inputs, params, settings| {
            let amplitudes = params
                .get("amplitudes")
                .and_then(ParamValue::as_float_list)
                .unwrap_or_default();
            let amplitude = if amplitudes.is_empty() {
                vec![0.0; settings.num_samples]
            } else {
                amplitudes
                    .iter()
                    .copied()
                    .cycle()
                    .take(settings.num_samples)
                    .collect()
            };

            Ok(output(ElectricalSignal {
                port: OUT,
                signal_type: "electrical".to_string(),
                carrier_frequency: params.f64_or("carrier_frequency", 0.0),
                sample_rate: settings.sampling_rate,
                time: settings.time_axis(),
                amplitude,
                noise: vec![0.0; settings.num_samples],
            }))
        })
}

// negate
pub(super) fn negate() -> TransformDef {
    TransformDef::new("negate", "electrical")
        .with_id(NEGATE_ID)
        .input(PortSpec::required("in", SignalDomain::Electrical))
        .output(PortSpec::required("out", SignalDomain::Electrical))
        .lambda(|inputs, _params, _settings| {
            let signal = electrical_input(inputs, 0)?;
            Ok(output(scaled(signal, -1.0)))
        })
}

// gain, linear factor
pub(super) fn gain() -> TransformDef {
    TransformDef::new("gain", "electrical")
        .with_id(GAIN_ID)
        .input(PortSpec::required("in", SignalDomain::Electrical))
        .output(PortSpec::required("out", SignalDomain::Electrical))
        .params(ParamTable::new(vec![ParamRecord::new("gain", 1.0, "")]))
        .lambda(|inputs, params, _settings| {
            let signal = electrical_input(inputs, 0)?;
            Ok(output(scaled(signal, params.f64_or("gain", 1.0))))
        })
}

// adder, only writes the current feedback segment
pub(super) fn adder() -> TransformDef {
    TransformDef::new("adder", "electrical")
        .with_id(ADDER_ID)
        .input(PortSpec::required("a", SignalDomain::Electrical))
        .input(PortSpec::required("b", SignalDomain::Electrical))
        .output(PortSpec::required("sum", SignalDomain::Electrical))
        .lambda(|inputs, _params, settings| {
            let a = electrical_input(inputs, 0)?;
            let b = electrical_input(inputs, 1)?;
            anyhow::ensure!(
                a.amplitude.len() == b.amplitude.len(),
                "inputs differ in length: {} and {}",
                a.amplitude.len(),
                b.amplitude.len()
            );

            let len = a.amplitude.len();
            let range = if settings.feedback_enabled && len == settings.num_samples {
                settings.segment_range()
            } else {
                0..len
            };

            let mut amplitude = vec![0.0; len];
            let mut noise = vec![0.0; len];
            for idx in range {
                amplitude[idx] = a.amplitude[idx] + b.amplitude[idx];
                noise[idx] = a.noise.get(idx).unwrap_or(&0.0) + b.noise.get(idx).unwrap_or(&0.0);
            }

            Ok(output(ElectricalSignal {
                amplitude,
                noise,
                ..a.clone()
            }))
        })
}

// awgn, gaussian noise with standard deviation `sigma`
pub(super) fn awgn() -> TransformDef {
    TransformDef::new("awgn", "electrical")
        .with_id(AWGN_ID)
        .input(PortSpec::required("in", SignalDomain::Electrical))
        .output(PortSpec::required("out", SignalDomain::Electrical))
        .params(ParamTable::new(vec![
            ParamRecord::new("sigma", 0.1, "V"),
            ParamRecord::new("seed", 0_i64, ""),
        ]))
        .randomized()
        .lambda(|inputs, params, settings| {
            let signal = electrical_input(inputs, 0)?;
            let distribution = Normal::new(0.0, params.f64_or("sigma", 0.1))?;
            let mut rng = StdRng::seed_from_u64(block_seed(params, settings));

            let mut noisy = signal.clone();
            for (amplitude, noise) in noisy.amplitude.iter_mut().zip(noisy.noise.iter_mut()) {
                let sample = distribution.sample(&mut rng);
                *amplitude += sample;
                *noise += sample;
            }

            Ok(output(noisy))
        })
}
