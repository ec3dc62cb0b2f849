use anyhow::ensure;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::param::{ParamRecord, ParamTable, ParamValue, ResultRecord};
use crate::signal::{DigitalSignal, SignalDomain, SignalEnvelope};
use crate::transform::{PortSpec, TransformDef, TransformId, TransformOutput};

use super::{block_seed, digital_input};

pub const BIT_SOURCE_ID: TransformId =
    TransformId::from_u128(0x5b1c_0e4a_7d2f_4c0e_9a61_0d3b_2f7e_0201);
pub const BER_ID: TransformId = TransformId::from_u128(0x5b1c_0e4a_7d2f_4c0e_9a61_0d3b_2f7e_0202);

const REFERENCE: usize = 0;
const RECOVERED: usize = 1;

// bit_source, fixed `bits` or one random bit per symbol of the window
pub(super) fn bit_source() -> TransformDef {
    TransformDef::new("bit_source", "digital")
        .with_id(BIT_SOURCE_ID)
        .output(PortSpec::required("bits", SignalDomain::Digital))
        .params(ParamTable::new(vec![
            ParamRecord::new("bits", Vec::<i64>::new(), "")
                .with_note("random when empty"),
            ParamRecord::new("seed", 0_i64, ""),
        ]))
        .randomized()
        .lambda(|_inputs, params, settings| {
            let fixed = params
                .get("bits")
                .and_then(ParamValue::as_int_list)
                .unwrap_or_default();
            let symbols = if fixed.is_empty() {
                let count = settings.num_samples / settings.samples_per_sym;
                let mut rng = StdRng::seed_from_u64(block_seed(params, settings));
                (0..count).map(|_| rng.random_range(0..2_i64)).collect()
            } else {
                fixed.to_vec()
            };
            let symbol_period = 1.0 / settings.symbol_rate;

            Ok(TransformOutput {
                outputs: vec![SignalEnvelope::Digital(DigitalSignal {
                    port: 0,
                    signal_type: "binary".to_string(),
                    symbol_rate: settings.symbol_rate,
                    bit_rate: settings.symbol_rate,
                    order: 2,
                    time: (0..symbols.len())
                        .map(|idx| idx as f64 * symbol_period)
                        .collect(),
                    symbols,
                })],
                ..Default::default()
            })
        })
}

// ber, compares recovered symbols against the reference and keeps running totals
pub(super) fn ber() -> TransformDef {
    TransformDef::new("ber", "digital")
        .with_id(BER_ID)
        .input(PortSpec::required("reference", SignalDomain::Digital))
        .input(PortSpec::required("recovered", SignalDomain::Digital))
        .params(ParamTable::new(vec![
            ParamRecord::new("total_errors", 0_i64, ""),
            ParamRecord::new("total_bits", 0_i64, ""),
        ]))
        .lambda(|inputs, params, _settings| {
            let reference = digital_input(inputs, REFERENCE)?;
            let recovered = digital_input(inputs, RECOVERED)?;
            ensure!(
                !reference.symbols.is_empty(),
                "reference carries no symbols"
            );

            let compared = reference.symbols.len().min(recovered.symbols.len());
            let errors = reference
                .symbols
                .iter()
                .zip(recovered.symbols.iter())
                .filter(|(a, b)| a != b)
                .count();

            let total_errors = params.i64_or("total_errors", 0) + errors as i64;
            let total_bits = params.i64_or("total_bits", 0) + compared as i64;
            let mut params = params.clone();
            params.set("total_errors", total_errors);
            params.set("total_bits", total_bits);

            let ratio = |errors: f64, bits: f64| if bits > 0.0 { errors / bits } else { f64::NAN };

            Ok(TransformOutput {
                params,
                results: vec![
                    ResultRecord::number("errCount", errors as f64, ""),
                    ResultRecord::number("ber", ratio(errors as f64, compared as f64), ""),
                    ResultRecord::number(
                        "cumulative_ber",
                        ratio(total_errors as f64, total_bits as f64),
                        "",
                    ),
                ],
                messages: vec![format!("{errors} errors in {compared} bits")],
                ..Default::default()
            })
        })
}
