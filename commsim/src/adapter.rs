//! Uniform invocation of block transforms.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use strum_macros::Display;
use thiserror::Error;
use tracing::trace;

use crate::context::SimulationContext;
use crate::graph::{Block, BlockId};
use crate::param::{ParamTable, ResultRecord};
use crate::settings::RunSettings;
use crate::signal::{PortIndex, SignalEnvelope};
use crate::transform::TransformDef;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum OutputFault {
    Absent,
    Duplicate,
    OutOfRange,
}

/// Failure raised inside a block's transform, scoped to one iteration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Block {block_name} failed in iteration {iteration}{}: {cause}", segment_suffix(.segment))]
pub struct BlockExecutionError {
    pub block_id: BlockId,
    pub block_name: String,
    pub iteration: usize,
    pub segment: Option<usize>,
    pub cause: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Block {block_name} output port {port}: {fault}")]
    MissingOutput {
        block_id: BlockId,
        block_name: String,
        port: PortIndex,
        fault: OutputFault,
    },
    #[error("Block {block_name} has no value on required input port {port}")]
    MissingInput {
        block_id: BlockId,
        block_name: String,
        port: PortIndex,
    },
    #[error(transparent)]
    Block(#[from] BlockExecutionError),
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Routed result of one block execution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlockOutcome {
    /// Indexed by output port; `None` only for optional ports the block left out.
    pub outputs: Vec<Option<SignalEnvelope>>,
    /// `None` when the transform returned no parameter table, leaving the block's unchanged.
    pub params: Option<ParamTable>,
    pub results: Vec<ResultRecord>,
}

fn segment_suffix(segment: &Option<usize>) -> String {
    segment.map_or_else(String::new, |segment| format!(", segment {segment}"))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "transform panicked".to_string()
    }
}

/// Runs `def`'s transform for `block` and routes the returned envelopes by their port field.
///
/// `inputs` is indexed by input port and left untouched. Errors returned by the transform, and
/// panics, become [`BlockExecutionError`]. Non-finite samples are data and pass through.
pub fn execute(
    block: &Block,
    def: &TransformDef,
    inputs: &[Option<SignalEnvelope>],
    settings: &RunSettings,
    ctx: &SimulationContext,
) -> Result<BlockOutcome> {
    assert_eq!(block.transform_id, def.id);
    assert_eq!(inputs.len(), block.inputs.len());

    if let Some(port) = block
        .inputs
        .iter()
        .find(|port| !port.optional && inputs[port.index].is_none())
    {
        return Err(ExecutionError::MissingInput {
            block_id: block.id,
            block_name: block.name.clone(),
            port: port.index,
        });
    }

    let segment = settings
        .feedback_enabled
        .then_some(settings.feedback_current_segment);
    let block_error = |cause: String| BlockExecutionError {
        block_id: block.id,
        block_name: block.name.clone(),
        iteration: settings.current_iteration,
        segment,
        cause,
    };

    trace!(block = %block.name, iteration = settings.current_iteration, ?segment, "Executing block");

    let invoked = catch_unwind(AssertUnwindSafe(|| {
        def.lambda.invoke(inputs, &block.params, settings)
    }));
    let output = match invoked {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => return Err(block_error(format!("{err:#}")).into()),
        Err(payload) => return Err(block_error(panic_message(payload)).into()),
    };

    for message in output.messages.iter() {
        ctx.log.log(&format!("{}: {}", block.name, message));
    }

    let missing_output = |port: PortIndex, fault: OutputFault| ExecutionError::MissingOutput {
        block_id: block.id,
        block_name: block.name.clone(),
        port,
        fault,
    };

    let mut outputs: Vec<Option<SignalEnvelope>> = vec![None; block.outputs.len()];
    for envelope in output.outputs {
        let port = envelope.port();
        let slot = outputs
            .get_mut(port)
            .ok_or_else(|| missing_output(port, OutputFault::OutOfRange))?;
        if slot.is_some() {
            return Err(missing_output(port, OutputFault::Duplicate));
        }
        *slot = Some(envelope);
    }

    if let Some(port) = block
        .outputs
        .iter()
        .find(|port| !port.optional && outputs[port.index].is_none())
    {
        return Err(missing_output(port.index, OutputFault::Absent));
    }

    Ok(BlockOutcome {
        outputs,
        params: (!output.params.is_empty()).then_some(output.params),
        results: output.results,
    })
}
