//! Typed configuration for the analysis engine.
//!
//! Strategy selection happens once, here, as closed enumerations; nothing in
//! the per-event path dispatches on method names.
use crate::{Real, peak_finder::PlaneKind, threshold::GaussianFitter};
use std::{fmt, str::FromStr};
use thiserror::Error;
use tpc_dqm_common::Channel;

/// A configuration contract violation, reported once at construction.
/// Degenerate *data* is never an error; see the module docs of
/// [`crate::noise`] and [`crate::analysis`] for the fallbacks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("smoothing window must be odd, got {0}")]
    EvenSmoothingWindow(usize),
    #[error("debounce count must be at least one sample")]
    ZeroDebounce,
    #[error("mode-finding stride must be at least one sample")]
    ZeroModeStride,
    #[error("first-samples noise range must hold at least one sample")]
    ZeroNoiseSamples,
    #[error("at least one channel must be configured")]
    NoChannels,
    #[error("invalid channel range '{0}', expected pattern 'begin,end'")]
    InvalidChannelRange(String),
}

/// A half-open `[begin, end)` range of channel numbers, parseable from a
/// `begin,end` command line value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelRange {
    pub begin: Channel,
    pub end: Channel,
}

impl ChannelRange {
    pub fn contains(&self, channel: Channel) -> bool {
        self.begin <= channel && channel < self.end
    }
}

impl FromStr for ChannelRange {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let vals: Vec<_> = s.split(',').collect();
        if let [begin, end] = vals[..] {
            Ok(ChannelRange {
                begin: Channel::from_str(begin.trim())
                    .map_err(|_| ConfigError::InvalidChannelRange(s.to_owned()))?,
                end: Channel::from_str(end.trim())
                    .map_err(|_| ConfigError::InvalidChannelRange(s.to_owned()))?,
            })
        } else {
            Err(ConfigError::InvalidChannelRange(s.to_owned()))
        }
    }
}

/// How the per-channel baseline is obtained before peak finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BaselineStrategy {
    /// The baseline is assumed to be zero.
    Zero,
    /// Use the pedestal the digitizer reported alongside the waveform.
    Pedestal,
    /// Estimate the mode of the waveform, visiting every `stride`-th sample.
    EstimateMode { stride: usize },
}

/// How the peak-finding threshold (distance from baseline that counts as
/// signal) is derived.
pub enum ThresholdStrategy {
    /// A fixed, configured value.
    Fixed { value: Real },
    /// `n_sigma` times the width of a Gaussian fitted to a histogram of ADC
    /// values, delegated to an external [`GaussianFitter`].
    HistogramFit {
        n_sigma: Real,
        fitter: Box<dyn GaussianFitter>,
    },
    /// `n_sigma` times the RMS of the whole waveform, signal included; an
    /// overestimate whenever signal is present.
    RawRms { n_sigma: Real },
    /// `n_sigma` times a running average of past noise RMS values, falling
    /// back to [`ThresholdStrategy::RawRms`] until history exists.
    RunningAverage { n_sigma: Real },
}

impl fmt::Debug for ThresholdStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed { value } => f.debug_struct("Fixed").field("value", value).finish(),
            Self::HistogramFit { n_sigma, .. } => f
                .debug_struct("HistogramFit")
                .field("n_sigma", n_sigma)
                .finish_non_exhaustive(),
            Self::RawRms { n_sigma } => {
                f.debug_struct("RawRms").field("n_sigma", n_sigma).finish()
            }
            Self::RunningAverage { n_sigma } => f
                .debug_struct("RunningAverage")
                .field("n_sigma", n_sigma)
                .finish(),
        }
    }
}

/// How the signal-free index ranges used for noise statistics are chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoiseRangeStrategy {
    /// Use the first `n` samples of the waveform unconditionally.
    FirstSamples { n: usize },
    /// Use the complement of the found peaks' loose ranges.
    PeakComplement,
}

#[derive(Debug)]
pub struct AnalysisConfig {
    /// Number of channels in the readout unit; channel numbers in the input
    /// are expected in `[0, n_channels)`.
    pub n_channels: usize,
    pub baseline: BaselineStrategy,
    /// Recompute the baseline as the mean over the noise ranges once peaks
    /// are known, replacing the coarse estimate.
    pub refine_baseline: bool,
    pub threshold: ThresholdStrategy,
    pub noise_range: NoiseRangeStrategy,
    /// Boxcar smoothing window applied before threshold comparisons. Must be
    /// odd; 1 disables smoothing.
    pub smoothing_window: usize,
    /// Consecutive past-threshold samples required before a peak opens.
    pub n_above_threshold: usize,
    /// Honour the plane assignments below; otherwise every channel is
    /// treated as [`PlaneKind::Unspecified`].
    pub use_planes: bool,
    pub collection_channels: Vec<ChannelRange>,
    pub induction_channels: Vec<ChannelRange>,
    /// Cap on how many samples enter each RMS/covariance estimate, for
    /// bounded cost on long waveforms. `None` scans everything.
    pub max_noise_samples: Option<usize>,
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_channels == 0 {
            return Err(ConfigError::NoChannels);
        }
        if self.smoothing_window % 2 == 0 {
            return Err(ConfigError::EvenSmoothingWindow(self.smoothing_window));
        }
        if self.n_above_threshold == 0 {
            return Err(ConfigError::ZeroDebounce);
        }
        if let BaselineStrategy::EstimateMode { stride: 0 } = self.baseline {
            return Err(ConfigError::ZeroModeStride);
        }
        if let NoiseRangeStrategy::FirstSamples { n: 0 } = self.noise_range {
            return Err(ConfigError::ZeroNoiseSamples);
        }
        Ok(())
    }

    /// Plane assigned to `channel`; collection wins over induction when the
    /// configured ranges overlap.
    pub fn plane_kind(&self, channel: Channel) -> PlaneKind {
        if !self.use_planes {
            return PlaneKind::Unspecified;
        }
        if self.collection_channels.iter().any(|r| r.contains(channel)) {
            PlaneKind::Collection
        } else if self.induction_channels.iter().any(|r| r.contains(channel)) {
            PlaneKind::Induction
        } else {
            PlaneKind::Unspecified
        }
    }
}
