use std::ops::Range;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::feedback::segment_boundaries;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("num_samples must be positive")]
    NoSamples,
    #[error("samples_per_symbol must be positive")]
    NoSamplesPerSymbol,
    #[error("symbol_rate must be a positive finite number, got {0}")]
    InvalidSymbolRate(f64),
    #[error("iterations must be positive")]
    NoIterations,
}

/// What the iteration controller does with a failed iteration.
///
/// Configuration and missing-data failures always abort the sweep; this only decides the fate of
/// errors raised by a block's own transform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    SkipFailedIteration,
    AbortOnBlockError,
}

/// Run-wide configuration, created once per sweep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub num_samples: usize,
    pub symbol_rate: f64,
    pub samples_per_symbol: usize,
    pub iterations: usize,
    pub seed: u64,
    pub failure_policy: FailurePolicy,
}

/// Immutable context handed to a transform for one execution.
///
/// Iterations and feedback segments are 1-based. Outside feedback groups the whole window is a
/// single segment: `feedback_segments == feedback_current_segment == 1`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    pub num_samples: usize,
    pub sampling_period: f64,
    pub time_window: f64,
    pub sampling_rate: f64,
    pub symbol_rate: f64,
    pub samples_per_sym: usize,
    pub current_iteration: usize,
    pub iterations: usize,
    pub feedback_segments: usize,
    pub feedback_current_segment: usize,
    pub feedback_enabled: bool,
    pub seed: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            num_samples: 1024,
            symbol_rate: 10.0e9,
            samples_per_symbol: 16,
            iterations: 1,
            seed: 0,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl SweepConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<SweepConfig> {
        let config: SweepConfig = common::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_samples == 0 {
            return Err(ConfigError::NoSamples);
        }
        if self.samples_per_symbol == 0 {
            return Err(ConfigError::NoSamplesPerSymbol);
        }
        if !(self.symbol_rate.is_finite() && self.symbol_rate > 0.0) {
            return Err(ConfigError::InvalidSymbolRate(self.symbol_rate));
        }
        if self.iterations == 0 {
            return Err(ConfigError::NoIterations);
        }
        Ok(())
    }

    pub fn sampling_rate(&self) -> f64 {
        self.symbol_rate * self.samples_per_symbol as f64
    }

    /// Settings for a plain (non-feedback) execution during `iteration`.
    pub fn run_settings(&self, iteration: usize) -> RunSettings {
        let sampling_rate = self.sampling_rate();
        let sampling_period = 1.0 / sampling_rate;

        RunSettings {
            num_samples: self.num_samples,
            sampling_period,
            time_window: self.num_samples as f64 * sampling_period,
            sampling_rate,
            symbol_rate: self.symbol_rate,
            samples_per_sym: self.samples_per_symbol,
            current_iteration: iteration,
            iterations: self.iterations,
            feedback_segments: 1,
            feedback_current_segment: 1,
            feedback_enabled: false,
            seed: self.seed,
        }
    }
}

impl RunSettings {
    /// Copy of these settings for pass `segment` of `segment_count`.
    ///
    /// A single-segment group runs exactly like a graph without feedback handling, so it reports
    /// `feedback_enabled == false`.
    pub fn for_segment(&self, segment: usize, segment_count: usize) -> RunSettings {
        assert!(segment_count >= 1);
        assert!((1..=segment_count).contains(&segment));

        RunSettings {
            feedback_segments: segment_count,
            feedback_current_segment: segment,
            feedback_enabled: segment_count > 1,
            ..self.clone()
        }
    }

    pub fn time_axis(&self) -> Vec<f64> {
        (0..self.num_samples)
            .map(|idx| idx as f64 * self.sampling_period)
            .collect()
    }

    pub fn boundaries(&self) -> Vec<usize> {
        segment_boundaries(self.num_samples, self.feedback_segments)
    }

    /// Sample indices a feedback-group block owns during the current pass.
    pub fn segment_range(&self) -> Range<usize> {
        let boundaries = self.boundaries();
        boundaries[self.feedback_current_segment - 1]..boundaries[self.feedback_current_segment]
    }
}
