use crate::signal::SignalDomain;
use crate::transform::{PortSpec, TransformDef, TransformId, TransformOutput};

use super::input;

pub const FORK_ID: TransformId = TransformId::from_u128(0x5b1c_0e4a_7d2f_4c0e_9a61_0d3b_2f7e_0101);

// fork, identical copy of the input on both outputs
pub(super) fn fork() -> TransformDef {
    TransformDef::new("fork", "flow")
        .with_id(FORK_ID)
        .input(PortSpec::required("in", SignalDomain::Any))
        .output(PortSpec::required("a", SignalDomain::Any))
        .output(PortSpec::required("b", SignalDomain::Any))
        .lambda(|inputs, _params, _settings| {
            let signal = input(inputs, 0)?;

            Ok(TransformOutput {
                outputs: vec![signal.clone().with_port(0), signal.clone().with_port(1)],
                ..Default::default()
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::ParamTable;
    use crate::settings::SweepConfig;
    use crate::signal::SignalEnvelope;

    #[test]
    fn copies_match_input() -> anyhow::Result<()> {
        let settings = SweepConfig {
            num_samples: 3,
            ..Default::default()
        }
        .run_settings(1);
        let input = SignalEnvelope::zero(SignalDomain::Digital, 4, &settings);

        let output = fork()
            .lambda
            .invoke(&[Some(input.clone())], &ParamTable::default(), &settings)?;

        assert_eq!(output.outputs.len(), 2);
        for (port, copy) in output.outputs.iter().enumerate() {
            assert_eq!(copy.port(), port);
            assert_eq!(copy.clone().with_port(4), input);
        }

        Ok(())
    }
}
