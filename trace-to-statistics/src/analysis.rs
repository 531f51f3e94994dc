//! Per-event orchestration: baseline, threshold, peaks, noise and derived
//! statistics for every channel of a readout unit, then the adjacent-pair
//! coherent-noise metric.
//!
//! The per-channel phase has no cross-channel dependency and runs in
//! parallel; every worker exclusively owns that channel's output record,
//! noise sample and running-threshold history. The adjacent-pair pass only
//! starts once the whole per-channel phase is done, because it reads two
//! channels' finished results.
//!
//! A channel with no samples (or absent from the event) yields an empty
//! [`ChannelData`] and never aborts its siblings: the monitoring stream
//! favours availability over completeness of any single channel.
use crate::{
    Real,
    baseline::mode,
    noise::{NoiseRange, NoiseSample},
    parameters::{AnalysisConfig, BaselineStrategy, ConfigError, NoiseRangeStrategy},
    peak_finder::{PeakFinder, Peak, PlaneKind},
    threshold::RunningThreshold,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tpc_dqm_common::{Channel, RawDigits, Sample};
use tracing::{instrument, warn};

/// Below this RMS the dnoise scaling would blow up; the metric degrades to a
/// fixed sentinel of 1 instead.
const RMS_FLOOR: Real = 1e-4;

/// Everything the engine derives for one channel in one event. Rebuilt from
/// scratch every event.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChannelData {
    pub channel_no: Channel,
    /// Set when the channel had no samples this event; every other field is
    /// then left zeroed.
    pub empty: bool,
    pub baseline: Sample,
    pub rms: Real,
    pub threshold: Real,
    /// Scaled coherent-noise metric against the numerically next channel;
    /// 0 for the last channel.
    pub next_channel_dnoise: Real,
    /// Number of up-peaks found this event.
    pub occupancy: Real,
    /// Mean amplitude over all peaks, 0 when there are none.
    pub mean_peak_height: Real,
    pub peaks: Vec<Peak>,
    pub noise_ranges: Vec<NoiseRange>,
}

impl ChannelData {
    pub fn new(channel: Channel) -> Self {
        ChannelData {
            channel_no: channel,
            empty: true,
            ..Default::default()
        }
    }
}

/// The per-session analysis engine. Owns the one piece of cross-event state,
/// the per-channel running RMS histories, so later events see all earlier
/// events' contributions in order.
pub struct Analysis {
    config: AnalysisConfig,
    planes: Vec<PlaneKind>,
    per_channel_data: Vec<ChannelData>,
    noise_samples: Vec<NoiseSample>,
    thresholds: Vec<RunningThreshold>,
}

impl Analysis {
    /// Validates the configuration once; nothing on the per-event path can
    /// fail after this.
    pub fn new(config: AnalysisConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let planes = (0..config.n_channels)
            .map(|channel| config.plane_kind(channel as Channel))
            .collect();
        Ok(Analysis {
            planes,
            per_channel_data: (0..config.n_channels)
                .map(|channel| ChannelData::new(channel as Channel))
                .collect(),
            noise_samples: vec![NoiseSample::default(); config.n_channels],
            thresholds: vec![RunningThreshold::default(); config.n_channels],
            config,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Results of the last processed event, one record per configured
    /// channel.
    pub fn channel_data(&self) -> &[ChannelData] {
        &self.per_channel_data
    }

    pub fn noise_samples(&self) -> &[NoiseSample] {
        &self.noise_samples
    }

    /// Analyze one event's digits; results are available from
    /// [`Analysis::channel_data`] until the next call.
    #[instrument(skip_all, level = "debug", fields(n_digits = digits.len()))]
    pub fn analyze_event(&mut self, digits: &[RawDigits]) {
        let digit_map = self.map_digits(digits);

        let config = &self.config;
        let planes = &self.planes;
        (
            self.per_channel_data.par_iter_mut(),
            self.noise_samples.par_iter_mut(),
            self.thresholds.par_iter_mut(),
        )
            .into_par_iter()
            .enumerate()
        .for_each(|(channel, (data, noise, running))| {
            *data = ChannelData::new(channel as Channel);
            *noise = NoiseSample::default();
            if let Some(digits) = digit_map[channel] {
                if !digits.samples.is_empty() {
                    process_channel(config, planes[channel], digits, data, noise, running);
                }
            }
        });

        self.compute_adjacent_dnoise(&digit_map);
    }

    /// Channel-to-digits lookup for one event. The first occurrence of a
    /// channel wins; channels outside the configured range are dropped.
    fn map_digits<'a>(&self, digits: &'a [RawDigits]) -> Vec<Option<&'a RawDigits>> {
        let mut map: Vec<Option<&'a RawDigits>> = vec![None; self.config.n_channels];
        for digit in digits {
            let channel = digit.channel as usize;
            if channel >= map.len() {
                warn!(channel, "ignoring digits for unconfigured channel");
                continue;
            }
            if map[channel].is_none() {
                map[channel] = Some(digit);
            }
        }
        map
    }

    /// The cross-channel pass: for every adjacent non-empty pair, the RMS of
    /// the difference waveform over shared quiet samples, scaled by the
    /// quadrature sum of the two channels' own RMS values. The last channel
    /// has no successor and keeps 0.
    fn compute_adjacent_dnoise(&mut self, digit_map: &[Option<&RawDigits>]) {
        for i in 0..self.config.n_channels.saturating_sub(1) {
            let next = i + 1;
            if self.per_channel_data[i].empty || self.per_channel_data[next].empty {
                continue;
            }
            let (Some(digits), Some(next_digits)) = (digit_map[i], digit_map[next]) else {
                continue;
            };
            let unscaled = self.noise_samples[i].dnoise(
                &digits.samples,
                &self.noise_samples[next],
                &next_digits.samples,
                self.config.max_noise_samples,
            );
            let rms = self.per_channel_data[i].rms;
            let next_rms = self.per_channel_data[next].rms;
            self.per_channel_data[i].next_channel_dnoise =
                if rms > RMS_FLOOR && next_rms > RMS_FLOOR {
                    unscaled / (rms * rms + next_rms * next_rms).sqrt()
                } else {
                    1.0
                };
        }
    }

    /// Coherent-noise correlation between two channels of the last event.
    pub fn correlation(&self, digits: &[RawDigits], i: usize, j: usize) -> Real {
        let map = self.map_digits(digits);
        self.correlation_mapped(&map, i, j)
    }

    /// The full symmetric correlation matrix of the last event, with a unit
    /// diagonal.
    pub fn correlation_matrix(&self, digits: &[RawDigits]) -> Vec<Vec<Real>> {
        let n = self.config.n_channels;
        let map = self.map_digits(digits);
        let mut matrix = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..=i {
                let value = if i == j {
                    1.0
                } else {
                    self.correlation_mapped(&map, i, j)
                };
                matrix[i][j] = value;
                matrix[j][i] = value;
            }
        }
        matrix
    }

    fn correlation_mapped(&self, map: &[Option<&RawDigits>], i: usize, j: usize) -> Real {
        match (map[i], map[j]) {
            (Some(digits), Some(other)) => self.noise_samples[i].correlation(
                &digits.samples,
                &self.noise_samples[j],
                &other.samples,
                self.config.max_noise_samples,
            ),
            _ => Real::NAN,
        }
    }
}

#[instrument(skip_all, level = "trace", fields(channel = data.channel_no))]
fn process_channel(
    config: &AnalysisConfig,
    plane: PlaneKind,
    digits: &RawDigits,
    data: &mut ChannelData,
    noise: &mut NoiseSample,
    running: &mut RunningThreshold,
) {
    let waveform = digits.samples.as_slice();
    data.empty = false;

    data.baseline = match config.baseline {
        BaselineStrategy::Zero => 0,
        BaselineStrategy::Pedestal => digits.pedestal.unwrap_or(0),
        BaselineStrategy::EstimateMode { stride } => mode(waveform, stride),
    };

    data.threshold = config
        .threshold
        .compute(waveform, data.baseline, running, plane);

    let finder = PeakFinder::new(config.smoothing_window, config.n_above_threshold, plane)
        .expect("peak finding parameters were validated at construction");
    data.peaks = finder.find_peaks(waveform, data.baseline, data.threshold);

    *noise = match config.noise_range {
        NoiseRangeStrategy::FirstSamples { n } => {
            let n = n.min(waveform.len());
            NoiseSample::with_ranges(vec![[0, n - 1]], data.baseline)
        }
        NoiseRangeStrategy::PeakComplement => {
            NoiseSample::from_peaks(&data.peaks, data.baseline, waveform.len())
        }
    };

    if config.refine_baseline {
        noise.reset_baseline(waveform);
        data.baseline = noise.baseline();
    }

    data.rms = noise.rms(waveform, config.max_noise_samples);
    data.noise_ranges = noise.ranges().to_vec();

    // only after this channel's rms is final: the threshold used for peak
    // finding must not see its own event's outcome
    if config.threshold.is_running_average() {
        running.push_rms(data.rms);
    }

    data.occupancy = data.peaks.iter().filter(|peak| peak.is_up).count() as Real;
    data.mean_peak_height = if data.peaks.is_empty() {
        0.0
    } else {
        data.peaks
            .iter()
            .map(|peak| Real::from(peak.amplitude))
            .sum::<Real>()
            / data.peaks.len() as Real
    };
}
