//! Segmented convergence of feedback groups.
//!
//! A group with `s` segments runs its members `s` times per iteration. During pass `k` (1-based)
//! every member owns the samples `[boundary[k-1], boundary[k])`; all other samples of its outputs
//! are carried over from the previous pass, or stay zero if never written. After pass `s` the group
//! is converged and its outputs become visible to the rest of the graph.

use std::ops::Range;

use thiserror::Error;
use tracing::warn;

use crate::settings::RunSettings;
use crate::signal::{SignalEnvelope, SpliceOutcome};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConvergenceError {
    #[error("Segment pass {got} started, expected pass {expected}")]
    OutOfOrder { expected: usize, got: usize },
    #[error("Segment pass {got} is beyond the {segment_count} segments of the group")]
    BeyondLastSegment { got: usize, segment_count: usize },
    #[error("Segment pass {got} completed while pass {current} is running")]
    NotRunning { got: usize, current: usize },
    #[error("Only {completed} of {segment_count} segment passes are scheduled")]
    Incomplete {
        completed: usize,
        segment_count: usize,
    },
}

/// Tracks the pass progress of one feedback group within one iteration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConvergenceTracker {
    segment_count: usize,
    current: usize,
    completed: usize,
}

/// `boundary[k] = round(k * n / s)` with halves rounded up; `s + 1` monotonic entries from `0` to
/// `n`.
pub fn segment_boundaries(num_samples: usize, segment_count: usize) -> Vec<usize> {
    assert!(segment_count >= 1);

    let n = num_samples as u128;
    let s = segment_count as u128;
    (0..=s)
        .map(|k| ((2 * k * n + s) / (2 * s)) as usize)
        .collect()
}

/// Index range owned by pass `segment` (1-based).
pub fn segment_range(num_samples: usize, segment_count: usize, segment: usize) -> Range<usize> {
    assert!((1..=segment_count).contains(&segment));

    let boundaries = segment_boundaries(num_samples, segment_count);
    boundaries[segment - 1]..boundaries[segment]
}

/// Carries the samples outside the current pass's range from `previous` into `output`.
///
/// Without a previous buffer the output is merged against its own zeroed copy. A block that
/// changed samples outside its range is reported, its writes there are discarded.
pub fn merge_pass_output(
    block_name: &str,
    output: &mut SignalEnvelope,
    previous: Option<&SignalEnvelope>,
    settings: &RunSettings,
) {
    let range = settings.segment_range();
    let zero;
    let previous = match previous {
        Some(previous) => previous,
        None => {
            zero = output.zeroed();
            &zero
        }
    };

    match output.splice_outside(previous, &range, settings.num_samples) {
        SpliceOutcome::Spliced {
            wrote_outside: true,
        } => warn!(
            block = block_name,
            port = output.port(),
            segment = settings.feedback_current_segment,
            "Block wrote samples outside its segment range {}..{}",
            range.start,
            range.end
        ),
        SpliceOutcome::Spliced {
            wrote_outside: false,
        } => {}
        SpliceOutcome::LayoutChanged => warn!(
            block = block_name,
            port = output.port(),
            segment = settings.feedback_current_segment,
            "Optical channel changed polarization layout between segment passes, its field is \
             kept as produced"
        ),
        SpliceOutcome::Incompatible => warn!(
            block = block_name,
            port = output.port(),
            "Output changed signal domain between segment passes, previous pass discarded"
        ),
    }
}

impl ConvergenceTracker {
    pub fn new(segment_count: usize) -> Self {
        assert!(segment_count >= 1);

        ConvergenceTracker {
            segment_count,
            current: 0,
            completed: 0,
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    pub fn begin_pass(&mut self, segment: usize) -> Result<(), ConvergenceError> {
        if segment > self.segment_count {
            return Err(ConvergenceError::BeyondLastSegment {
                got: segment,
                segment_count: self.segment_count,
            });
        }
        if self.current != self.completed || segment != self.completed + 1 {
            return Err(ConvergenceError::OutOfOrder {
                expected: self.completed + 1,
                got: segment,
            });
        }

        self.current = segment;
        Ok(())
    }

    pub fn complete_pass(&mut self, segment: usize) -> Result<(), ConvergenceError> {
        if segment != self.current || self.current == self.completed {
            return Err(ConvergenceError::NotRunning {
                got: segment,
                current: self.current,
            });
        }

        self.completed = segment;
        Ok(())
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn is_running(&self) -> bool {
        self.current != self.completed
    }

    pub fn is_converged(&self) -> bool {
        self.completed == self.segment_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SweepConfig;
    use num_complex::Complex64;

    use crate::signal::{
        DigitalSignal, ElectricalSignal, FieldEnvelope, OpticalChannel, OpticalSignal,
    };

    fn second_of_two(n: usize) -> RunSettings {
        SweepConfig {
            num_samples: n,
            ..Default::default()
        }
        .run_settings(1)
        .for_segment(2, 2)
    }

    fn scalar_channel(key: u32, values: &[f64]) -> OpticalChannel {
        OpticalChannel {
            key,
            frequency: 193.4e12,
            jones: [Complex64::new(1.0, 0.0), Complex64::default()],
            field: FieldEnvelope::Scalar(
                values.iter().map(|value| Complex64::new(*value, 0.0)).collect(),
            ),
            noise: vec![Complex64::default(); values.len()],
        }
    }

    #[test]
    fn four_segments_over_hundred_samples() {
        assert_eq!(segment_boundaries(100, 4), vec![0, 25, 50, 75, 100]);
        assert_eq!(segment_range(100, 4, 2), 25..50);
    }

    #[test]
    fn boundaries_round_half_up() {
        // 1 * 10 / 4 = 2.5, 3 * 10 / 4 = 7.5
        assert_eq!(segment_boundaries(10, 4), vec![0, 3, 5, 8, 10]);
        assert_eq!(segment_boundaries(7, 1), vec![0, 7]);
        assert_eq!(segment_boundaries(2, 4), vec![0, 1, 1, 2, 2]);
    }

    #[test]
    fn boundaries_partition_the_window() {
        for n in [0, 1, 7, 64, 100, 1023] {
            for s in 1..=12 {
                let boundaries = segment_boundaries(n, s);

                assert_eq!(boundaries.len(), s + 1);
                assert_eq!(boundaries[0], 0);
                assert_eq!(boundaries[s], n);
                assert!(boundaries.windows(2).all(|pair| pair[0] <= pair[1]));

                let covered: usize = (1..=s)
                    .map(|k| segment_range(n, s, k).len())
                    .sum();
                assert_eq!(covered, n);
            }
        }
    }

    #[test]
    fn tracker_requires_increasing_passes() {
        let mut tracker = ConvergenceTracker::new(3);

        assert_eq!(
            tracker.begin_pass(2),
            Err(ConvergenceError::OutOfOrder {
                expected: 1,
                got: 2
            })
        );

        tracker.begin_pass(1).unwrap();
        assert!(tracker.is_running());
        assert!(tracker.begin_pass(2).is_err());
        tracker.complete_pass(1).unwrap();

        assert!(tracker.begin_pass(1).is_err());
        tracker.begin_pass(2).unwrap();
        tracker.complete_pass(2).unwrap();
        assert!(!tracker.is_converged());

        tracker.begin_pass(3).unwrap();
        tracker.complete_pass(3).unwrap();
        assert!(tracker.is_converged());

        assert_eq!(
            tracker.begin_pass(4),
            Err(ConvergenceError::BeyondLastSegment {
                got: 4,
                segment_count: 3
            })
        );
    }

    #[test]
    fn merge_keeps_previous_samples_outside_range() {
        let settings = SweepConfig {
            num_samples: 4,
            ..Default::default()
        }
        .run_settings(1)
        .for_segment(2, 2);

        let previous = SignalEnvelope::Electrical(ElectricalSignal {
            amplitude: vec![1.0, 2.0, 0.0, 0.0],
            noise: vec![0.0; 4],
            ..Default::default()
        });
        let mut output = SignalEnvelope::Electrical(ElectricalSignal {
            amplitude: vec![9.0, 9.0, 3.0, 4.0],
            noise: vec![0.0; 4],
            ..Default::default()
        });

        merge_pass_output("adder", &mut output, Some(&previous), &settings);
        assert_eq!(
            output.as_electrical().unwrap().amplitude,
            vec![1.0, 2.0, 3.0, 4.0]
        );

        let mut first = SignalEnvelope::Electrical(ElectricalSignal {
            amplitude: vec![5.0, 5.0, 5.0, 5.0],
            noise: vec![0.0; 4],
            ..Default::default()
        });
        merge_pass_output("adder", &mut first, None, &settings);
        assert_eq!(
            first.as_electrical().unwrap().amplitude,
            vec![0.0, 0.0, 5.0, 5.0]
        );
    }

    #[test]
    fn merge_digital_symbols_across_passes() {
        let settings = second_of_two(4);
        let previous = SignalEnvelope::Digital(DigitalSignal {
            symbols: vec![1, 1, 0, 0],
            ..Default::default()
        });
        let mut output = SignalEnvelope::Digital(DigitalSignal {
            symbols: vec![0, 1, 1, 1],
            ..Default::default()
        });

        merge_pass_output("slicer", &mut output, Some(&previous), &settings);

        assert_eq!(output.as_digital().unwrap().symbols, vec![1, 1, 1, 1]);
    }

    #[test]
    fn merge_optical_output_with_new_channel() {
        let settings = second_of_two(4);
        let previous = SignalEnvelope::Optical(OpticalSignal {
            psd: vec![0.5, 0.5, 0.0, 0.0],
            channels: vec![scalar_channel(1, &[1.0, 1.0, 0.0, 0.0])],
            ..Default::default()
        });
        let mut output = SignalEnvelope::Optical(OpticalSignal {
            psd: vec![0.5, 0.5, 0.25, 0.25],
            channels: vec![
                scalar_channel(1, &[9.0, 9.0, 9.0, 9.0]),
                scalar_channel(2, &[9.0, 9.0, 9.0, 9.0]),
            ],
            ..Default::default()
        });

        merge_pass_output("laser", &mut output, Some(&previous), &settings);

        let optical = output.as_optical().unwrap();
        assert_eq!(optical.psd, vec![0.5, 0.5, 0.25, 0.25]);
        assert_eq!(optical.channels[0].key, 1);
        assert_eq!(
            optical.channels[0].field,
            scalar_channel(1, &[1.0, 1.0, 9.0, 9.0]).field
        );
        assert_eq!(optical.channels[1].key, 2);
        assert_eq!(
            optical.channels[1].field,
            scalar_channel(2, &[0.0, 0.0, 9.0, 9.0]).field
        );
    }
}
