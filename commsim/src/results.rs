use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::graph::BlockId;
use crate::param::{ResultRecord, ResultValue};

/// Results of a sweep by block, then by iteration. Entries are only ever appended.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IterationResultSet {
    blocks: BTreeMap<BlockId, BTreeMap<usize, Vec<ResultRecord>>>,
}

/// A result record holding NaN or an infinity. Recorded for visibility, the value is kept.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericFault {
    pub block_id: BlockId,
    pub iteration: usize,
    pub label: String,
}

/// Single writer of the result set during a sweep.
#[derive(Debug, Default)]
pub struct ResultsCollector {
    results: IterationResultSet,
    faults: Vec<NumericFault>,
}

impl IterationResultSet {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, block_id: &BlockId) -> Option<&BTreeMap<usize, Vec<ResultRecord>>> {
        self.blocks.get(block_id)
    }

    pub fn get(&self, block_id: &BlockId, iteration: usize) -> Option<&[ResultRecord]> {
        self.blocks
            .get(block_id)?
            .get(&iteration)
            .map(Vec::as_slice)
    }

    pub fn value(&self, block_id: &BlockId, iteration: usize, label: &str) -> Option<&ResultValue> {
        self.get(block_id, iteration)?
            .iter()
            .find(|record| record.label == label)
            .map(|record| &record.value)
    }

    pub fn number(&self, block_id: &BlockId, iteration: usize, label: &str) -> Option<f64> {
        self.value(block_id, iteration, label)?.as_number()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BlockId, &BTreeMap<usize, Vec<ResultRecord>>)> {
        self.blocks.iter()
    }

    fn append(&mut self, block_id: BlockId, iteration: usize, records: Vec<ResultRecord>) {
        self.blocks
            .entry(block_id)
            .or_default()
            .entry(iteration)
            .or_default()
            .extend(records);
    }
}

impl ResultsCollector {
    pub fn record(&mut self, block_id: BlockId, iteration: usize, records: Vec<ResultRecord>) {
        for record in records.iter().filter(|record| record.value.is_non_finite()) {
            warn!(
                block = %block_id.short(),
                iteration,
                label = %record.label,
                "Non-finite result value"
            );
            self.faults.push(NumericFault {
                block_id,
                iteration,
                label: record.label.clone(),
            });
        }

        self.results.append(block_id, iteration, records);
    }

    pub fn results(&self) -> &IterationResultSet {
        &self.results
    }

    pub fn faults(&self) -> &[NumericFault] {
        &self.faults
    }

    pub fn finish(self) -> (IterationResultSet, Vec<NumericFault>) {
        (self.results, self.faults)
    }
}
