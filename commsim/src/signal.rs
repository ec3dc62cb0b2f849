//! Signal envelopes exchanged between block ports.
//!
//! Every envelope carries the index of the output port it leaves through as its first field; the
//! adapter routes outputs by that index alone. Sample-indexed arrays of one envelope share the
//! run's sample count unless the producing block deliberately changes the rate.

use std::ops::Range;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

use crate::settings::RunSettings;

pub type PortIndex = usize;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SignalDomain {
    #[default]
    Any,
    Electrical,
    Optical,
    Digital,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ElectricalSignal {
    pub port: PortIndex,
    pub signal_type: String,
    pub carrier_frequency: f64,
    pub sample_rate: f64,
    pub time: Vec<f64>,
    pub amplitude: Vec<f64>,
    pub noise: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldEnvelope {
    Scalar(Vec<Complex64>),
    DualPolarization {
        x: Vec<Complex64>,
        y: Vec<Complex64>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpticalChannel {
    pub key: u32,
    pub frequency: f64,
    pub jones: [Complex64; 2],
    pub field: FieldEnvelope,
    pub noise: Vec<Complex64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OpticalSignal {
    pub port: PortIndex,
    pub signal_type: String,
    pub sample_rate: f64,
    pub time: Vec<f64>,
    pub psd: Vec<f64>,
    pub channels: Vec<OpticalChannel>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DigitalSignal {
    pub port: PortIndex,
    pub signal_type: String,
    pub symbol_rate: f64,
    pub bit_rate: f64,
    pub order: u32,
    pub time: Vec<f64>,
    pub symbols: Vec<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "domain", rename_all = "lowercase")]
pub enum SignalEnvelope {
    Electrical(ElectricalSignal),
    Optical(OpticalSignal),
    Digital(DigitalSignal),
}

/// Result of carrying a previous pass's samples into a freshly produced envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpliceOutcome {
    Spliced { wrote_outside: bool },
    /// An optical channel switched between scalar and dual-polarization fields. That field is kept
    /// as produced; everything else is spliced.
    LayoutChanged,
    Incompatible,
}

impl SignalDomain {
    pub fn accepts(self, other: SignalDomain) -> bool {
        self == SignalDomain::Any || other == SignalDomain::Any || self == other
    }
}

impl FieldEnvelope {
    pub fn len(&self) -> usize {
        match self {
            FieldEnvelope::Scalar(samples) => samples.len(),
            FieldEnvelope::DualPolarization { x, .. } => x.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn zero_fill(&mut self) {
        match self {
            FieldEnvelope::Scalar(samples) => samples.fill(Complex64::default()),
            FieldEnvelope::DualPolarization { x, y } => {
                x.fill(Complex64::default());
                y.fill(Complex64::default());
            }
        }
    }
}

impl OpticalChannel {
    pub fn zeroed(&self) -> OpticalChannel {
        let mut zero = self.clone();
        zero.field.zero_fill();
        zero.noise.fill(Complex64::default());
        zero
    }

    /// `None` when the field layouts differ; the noise array is spliced either way.
    fn splice_from(
        &mut self,
        previous: &OpticalChannel,
        range: &Range<usize>,
        n: usize,
    ) -> Option<bool> {
        let mut wrote_outside = splice(&mut self.noise, &previous.noise, range, n);
        match (&mut self.field, &previous.field) {
            (FieldEnvelope::Scalar(dst), FieldEnvelope::Scalar(src)) => {
                wrote_outside |= splice(dst, src, range, n);
            }
            (
                FieldEnvelope::DualPolarization { x, y },
                FieldEnvelope::DualPolarization { x: px, y: py },
            ) => {
                wrote_outside |= splice(x, px, range, n);
                wrote_outside |= splice(y, py, range, n);
            }
            _ => return None,
        }
        Some(wrote_outside)
    }
}

impl SignalEnvelope {
    /// Domain zero value sized to the run: zero samples on a valid time axis.
    ///
    /// `Any` falls back to an electrical envelope. Optical zeros carry no channels.
    pub fn zero(domain: SignalDomain, port: PortIndex, settings: &RunSettings) -> SignalEnvelope {
        let n = settings.num_samples;
        let time = settings.time_axis();

        match domain {
            SignalDomain::Any | SignalDomain::Electrical => {
                SignalEnvelope::Electrical(ElectricalSignal {
                    port,
                    signal_type: String::new(),
                    carrier_frequency: 0.0,
                    sample_rate: settings.sampling_rate,
                    time,
                    amplitude: vec![0.0; n],
                    noise: vec![0.0; n],
                })
            }
            SignalDomain::Optical => SignalEnvelope::Optical(OpticalSignal {
                port,
                signal_type: String::new(),
                sample_rate: settings.sampling_rate,
                time,
                psd: vec![0.0; n],
                channels: Vec::new(),
            }),
            SignalDomain::Digital => SignalEnvelope::Digital(DigitalSignal {
                port,
                signal_type: String::new(),
                symbol_rate: settings.symbol_rate,
                bit_rate: settings.symbol_rate,
                order: 2,
                time,
                symbols: vec![0; n],
            }),
        }
    }

    pub fn domain(&self) -> SignalDomain {
        match self {
            SignalEnvelope::Electrical(_) => SignalDomain::Electrical,
            SignalEnvelope::Optical(_) => SignalDomain::Optical,
            SignalEnvelope::Digital(_) => SignalDomain::Digital,
        }
    }

    pub fn port(&self) -> PortIndex {
        match self {
            SignalEnvelope::Electrical(signal) => signal.port,
            SignalEnvelope::Optical(signal) => signal.port,
            SignalEnvelope::Digital(signal) => signal.port,
        }
    }

    pub fn set_port(&mut self, port: PortIndex) {
        match self {
            SignalEnvelope::Electrical(signal) => signal.port = port,
            SignalEnvelope::Optical(signal) => signal.port = port,
            SignalEnvelope::Digital(signal) => signal.port = port,
        }
    }

    pub fn with_port(mut self, port: PortIndex) -> SignalEnvelope {
        self.set_port(port);
        self
    }

    pub fn time(&self) -> &[f64] {
        match self {
            SignalEnvelope::Electrical(signal) => &signal.time,
            SignalEnvelope::Optical(signal) => &signal.time,
            SignalEnvelope::Digital(signal) => &signal.time,
        }
    }

    pub fn as_electrical(&self) -> Option<&ElectricalSignal> {
        match self {
            SignalEnvelope::Electrical(signal) => Some(signal),
            _ => None,
        }
    }

    pub fn as_optical(&self) -> Option<&OpticalSignal> {
        match self {
            SignalEnvelope::Optical(signal) => Some(signal),
            _ => None,
        }
    }

    pub fn as_digital(&self) -> Option<&DigitalSignal> {
        match self {
            SignalEnvelope::Digital(signal) => Some(signal),
            _ => None,
        }
    }

    /// Same shape and metadata with every signal sample set to zero. The time axis is kept.
    pub fn zeroed(&self) -> SignalEnvelope {
        let mut zero = self.clone();
        match &mut zero {
            SignalEnvelope::Electrical(signal) => {
                signal.amplitude.fill(0.0);
                signal.noise.fill(0.0);
            }
            SignalEnvelope::Optical(signal) => {
                signal.psd.fill(0.0);
                for channel in signal.channels.iter_mut() {
                    *channel = channel.zeroed();
                }
            }
            SignalEnvelope::Digital(signal) => signal.symbols.fill(0),
        }
        zero
    }

    /// Copies the samples of `previous` that lie outside `range` into `self`.
    ///
    /// Only arrays holding exactly `n` samples in both envelopes are spliced; rate-converted arrays
    /// are taken from `self` unchanged. Zero samples in `self` count as untouched. Reports whether
    /// `self` held a non-zero sample differing from `previous` anywhere outside `range`.
    ///
    /// Optical channels are matched by `key`. A channel new to this pass is spliced against its
    /// zeroed copy, and a channel the pass left out is carried over from `previous` unchanged.
    pub fn splice_outside(
        &mut self,
        previous: &SignalEnvelope,
        range: &Range<usize>,
        n: usize,
    ) -> SpliceOutcome {
        let wrote_outside = match (self, previous) {
            (SignalEnvelope::Electrical(dst), SignalEnvelope::Electrical(src)) => {
                splice(&mut dst.amplitude, &src.amplitude, range, n)
                    | splice(&mut dst.noise, &src.noise, range, n)
            }
            (SignalEnvelope::Optical(dst), SignalEnvelope::Optical(src)) => {
                let mut wrote_outside = splice(&mut dst.psd, &src.psd, range, n);
                let mut layout_changed = false;
                for channel in dst.channels.iter_mut() {
                    let spliced = match src.channels.iter().find(|prev| prev.key == channel.key) {
                        Some(prev) => channel.splice_from(prev, range, n),
                        None => {
                            let zero = channel.zeroed();
                            channel.splice_from(&zero, range, n)
                        }
                    };
                    match spliced {
                        Some(wrote) => wrote_outside |= wrote,
                        None => layout_changed = true,
                    }
                }
                for prev in src.channels.iter() {
                    if !dst.channels.iter().any(|channel| channel.key == prev.key) {
                        dst.channels.push(prev.clone());
                    }
                }
                if layout_changed {
                    return SpliceOutcome::LayoutChanged;
                }
                wrote_outside
            }
            (SignalEnvelope::Digital(dst), SignalEnvelope::Digital(src)) => {
                splice(&mut dst.symbols, &src.symbols, range, n)
            }
            _ => return SpliceOutcome::Incompatible,
        };

        SpliceOutcome::Spliced { wrote_outside }
    }
}

trait Sample: Copy {
    fn same(&self, other: &Self) -> bool;
    fn is_zero(&self) -> bool;
}

impl Sample for f64 {
    fn same(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }

    fn is_zero(&self) -> bool {
        *self == 0.0
    }
}

impl Sample for i64 {
    fn same(&self, other: &Self) -> bool {
        self == other
    }

    fn is_zero(&self) -> bool {
        *self == 0
    }
}

impl Sample for Complex64 {
    fn same(&self, other: &Self) -> bool {
        self.re.same(&other.re) && self.im.same(&other.im)
    }

    fn is_zero(&self) -> bool {
        self.re.is_zero() && self.im.is_zero()
    }
}

fn splice<T: Sample>(dst: &mut [T], src: &[T], range: &Range<usize>, n: usize) -> bool {
    if dst.len() != n || src.len() != n {
        return false;
    }
    assert!(range.end <= n);

    let mut wrote_outside = false;
    for idx in (0..range.start).chain(range.end..n) {
        if !dst[idx].same(&src[idx]) {
            wrote_outside |= !dst[idx].is_zero();
            dst[idx] = src[idx];
        }
    }
    wrote_outside
}
