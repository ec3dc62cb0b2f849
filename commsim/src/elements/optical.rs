use num_complex::Complex64;

use crate::param::{ParamRecord, ParamTable, ResultRecord};
use crate::signal::{
    ElectricalSignal, FieldEnvelope, OpticalChannel, OpticalSignal, SignalDomain, SignalEnvelope,
};
use crate::transform::{PortSpec, TransformDef, TransformId, TransformOutput};

use super::optical_input;

pub const LASER_ID: TransformId = TransformId::from_u128(0x5b1c_0e4a_7d2f_4c0e_9a61_0d3b_2f7e_0301);
pub const PHOTODETECTOR_ID: TransformId =
    TransformId::from_u128(0x5b1c_0e4a_7d2f_4c0e_9a61_0d3b_2f7e_0302);

// laser, continuous wave, x polarized
pub(super) fn laser() -> TransformDef {
    TransformDef::new("laser", "optical")
        .with_id(LASER_ID)
        .output(PortSpec::required("out", SignalDomain::Optical))
        .params(ParamTable::new(vec![
            ParamRecord::new("power", 1.0e-3, "W"),
            ParamRecord::new("frequency", 193.1e12, "Hz"),
        ]))
        .lambda(|_inputs, params, settings| {
            let n = settings.num_samples;
            let power = params.f64_or("power", 1.0e-3);
            anyhow::ensure!(power >= 0.0, "negative optical power {power}");

            let field = Complex64::new(power.sqrt(), 0.0);
            let channel = OpticalChannel {
                key: 0,
                frequency: params.f64_or("frequency", 193.1e12),
                jones: [Complex64::new(1.0, 0.0), Complex64::default()],
                field: FieldEnvelope::Scalar(vec![field; n]),
                noise: vec![Complex64::default(); n],
            };

            Ok(TransformOutput {
                outputs: vec![SignalEnvelope::Optical(OpticalSignal {
                    port: 0,
                    signal_type: "cw".to_string(),
                    sample_rate: settings.sampling_rate,
                    time: settings.time_axis(),
                    psd: vec![0.0; n],
                    channels: vec![channel],
                })],
                ..Default::default()
            })
        })
}

// photodetector, square-law detection of every channel
pub(super) fn photodetector() -> TransformDef {
    TransformDef::new("photodetector", "optical")
        .with_id(PHOTODETECTOR_ID)
        .input(PortSpec::required("in", SignalDomain::Optical))
        .output(PortSpec::required("out", SignalDomain::Electrical))
        .params(ParamTable::new(vec![ParamRecord::new(
            "responsivity",
            1.0,
            "A/W",
        )]))
        .lambda(|inputs, params, settings| {
            let optical = optical_input(inputs, 0)?;
            let responsivity = params.f64_or("responsivity", 1.0);
            let n = optical.time.len();

            let mut current = vec![0.0; n];
            for channel in optical.channels.iter() {
                let polarizations: Vec<&[Complex64]> = match &channel.field {
                    FieldEnvelope::Scalar(field) => vec![field.as_slice()],
                    FieldEnvelope::DualPolarization { x, y } => vec![x.as_slice(), y.as_slice()],
                };
                for field in polarizations {
                    for (sample, value) in current.iter_mut().zip(field.iter()) {
                        *sample += responsivity * value.norm_sqr();
                    }
                }
            }

            let mean = if n == 0 {
                0.0
            } else {
                current.iter().sum::<f64>() / n as f64
            };

            Ok(TransformOutput {
                outputs: vec![SignalEnvelope::Electrical(ElectricalSignal {
                    port: 0,
                    signal_type: "photocurrent".to_string(),
                    carrier_frequency: 0.0,
                    sample_rate: settings.sampling_rate,
                    time: optical.time.clone(),
                    amplitude: current,
                    noise: vec![0.0; n],
                })],
                results: vec![ResultRecord::number("mean_current", mean, "A")],
                ..Default::default()
            })
        })
}
