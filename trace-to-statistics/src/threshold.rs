//! The four peak-finding threshold policies and the per-channel running RMS
//! history backing the running-average policy.
use crate::{
    Real,
    noise::NoiseSample,
    parameters::ThresholdStrategy,
    peak_finder::PlaneKind,
};
use itertools::{Itertools, MinMaxResult};
use tpc_dqm_common::Sample;

/// Capacity of the per-channel running RMS history.
pub const RMS_HISTORY_LEN: usize = 10;

/// Collection planes sit behind a higher effective threshold when plane
/// assignments are in use.
const COLLECTION_SIGMA_FACTOR: Real = 1.5;

/// A fitted Gaussian as reported by the external curve-fitting service.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GaussianFit {
    pub mean: Real,
    pub sigma: Real,
}

/// External curve-fitting collaborator used by
/// [`ThresholdStrategy::HistogramFit`]: fit a Gaussian to `hist` restricted
/// to `[lo, hi]`.
///
/// The engine treats the fit as opaque, with no retry semantics. A failed or
/// degenerate fit simply yields whatever sigma the service reports, including
/// zero.
pub trait GaussianFitter: Send + Sync {
    fn fit(&self, hist: &Histogram, lo: Real, hi: Real) -> GaussianFit;
}

/// A fixed-width binning of sample values over their `[min, max]` span.
#[derive(Clone, Debug)]
pub struct Histogram {
    lo: Real,
    bin_width: Real,
    counts: Vec<u32>,
}

impl Histogram {
    pub fn from_samples(samples: &[Sample], n_bins: usize) -> Self {
        let n_bins = n_bins.max(1);
        let (lo, hi) = match samples.iter().minmax() {
            MinMaxResult::NoElements => (0.0, 0.0),
            MinMaxResult::OneElement(&v) => (Real::from(v), Real::from(v)),
            MinMaxResult::MinMax(&lo, &hi) => (Real::from(lo), Real::from(hi)),
        };
        let span = hi - lo;
        let bin_width = if span > 0.0 { span / n_bins as Real } else { 1.0 };
        let mut counts = vec![0; n_bins];
        for &sample in samples {
            let bin = ((Real::from(sample) - lo) / bin_width) as usize;
            counts[bin.min(n_bins - 1)] += 1;
        }
        Histogram {
            lo,
            bin_width,
            counts,
        }
    }

    pub fn bins(&self) -> impl Iterator<Item = (Real, u32)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .map(|(bin, &count)| (self.lo + (bin as Real + 0.5) * self.bin_width, count))
    }

    pub fn mean(&self) -> Real {
        let (sum, n) = self
            .bins()
            .fold((0.0, 0u64), |(sum, n), (center, count)| {
                (sum + center * Real::from(count), n + u64::from(count))
            });
        if n == 0 { 0.0 } else { sum / n as Real }
    }

    pub fn rms(&self) -> Real {
        let mean = self.mean();
        let (sum, n) = self
            .bins()
            .fold((0.0, 0u64), |(sum, n), (center, count)| {
                (sum + (center - mean).powi(2) * Real::from(count), n + u64::from(count))
            });
        if n == 0 { 0.0 } else { (sum / n as Real).sqrt() }
    }
}

/// Stock [`GaussianFitter`]: truncated sample moments over the restricted
/// range, standing in for an external fitting service.
#[derive(Clone, Copy, Debug, Default)]
pub struct MomentFitter;

impl GaussianFitter for MomentFitter {
    fn fit(&self, hist: &Histogram, lo: Real, hi: Real) -> GaussianFit {
        let mut n = 0.0;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for (center, count) in hist.bins() {
            if lo <= center && center <= hi {
                let count = Real::from(count);
                n += count;
                sum += center * count;
                sum_sq += center * center * count;
            }
        }
        if n == 0.0 {
            // nothing in range counts as a degenerate fit
            return GaussianFit::default();
        }
        let mean = sum / n;
        let sigma = (sum_sq / n - mean * mean).max(0.0).sqrt();
        GaussianFit { mean, sigma }
    }
}

/// RMS of the whole waveform about `baseline`, signal included. Always an
/// overestimate of the noise RMS unless the waveform is signal free.
pub fn raw_rms(waveform: &[Sample], baseline: Sample) -> Real {
    if waveform.is_empty() {
        return Real::NAN;
    }
    let full = NoiseSample::with_ranges(vec![[0, waveform.len() - 1]], baseline);
    full.rms(waveform, None)
}

fn histogram_fit_threshold(
    waveform: &[Sample],
    baseline: Sample,
    n_sigma: Real,
    fitter: &dyn GaussianFitter,
) -> Real {
    let hist = Histogram::from_samples(waveform, waveform.len() / 100);
    // only fit over a logical region around the bulk of the distribution
    let (mean, rms) = (hist.mean(), hist.rms());
    let fit = fitter.fit(&hist, mean - n_sigma * rms, mean + n_sigma * rms);
    Real::from(baseline) + n_sigma * fit.sigma
}

/// Per-channel history of past noise RMS values, kept across events for the
/// lifetime of the analysis session. The one piece of cross-event state in
/// the engine; owned by the orchestrator, one instance per channel.
#[derive(Clone, Debug, Default)]
pub struct RunningThreshold {
    past_rms: [Real; RMS_HISTORY_LEN],
    next: usize,
    len: usize,
}

impl RunningThreshold {
    /// Threshold from the average of the stored RMS values; with no history
    /// yet, fall back to the raw waveform RMS.
    pub fn threshold(&self, waveform: &[Sample], baseline: Sample, n_sigma: Real) -> Real {
        if self.len == 0 {
            raw_rms(waveform, baseline) * n_sigma
        } else {
            let sum: Real = self.past_rms[..self.len].iter().sum();
            sum / self.len as Real * n_sigma
        }
    }

    /// Record a finished channel RMS, overwriting the oldest entry once the
    /// history is full. NaN values are never stored.
    pub fn push_rms(&mut self, rms: Real) {
        if rms.is_nan() {
            return;
        }
        self.past_rms[self.next] = rms;
        self.next = (self.next + 1) % RMS_HISTORY_LEN;
        if self.len < RMS_HISTORY_LEN {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl ThresholdStrategy {
    /// Threshold for one channel of one event. `running` is that channel's
    /// own history and is only consulted by the running-average policy.
    pub(crate) fn compute(
        &self,
        waveform: &[Sample],
        baseline: Sample,
        running: &RunningThreshold,
        plane: PlaneKind,
    ) -> Real {
        match self {
            Self::Fixed { value } => *value,
            Self::HistogramFit { n_sigma, fitter } => {
                histogram_fit_threshold(waveform, baseline, *n_sigma, fitter.as_ref())
            }
            Self::RawRms { n_sigma } => raw_rms(waveform, baseline) * n_sigma,
            Self::RunningAverage { n_sigma } => {
                let n_sigma = if plane == PlaneKind::Collection {
                    COLLECTION_SIGMA_FACTOR * n_sigma
                } else {
                    *n_sigma
                };
                running.threshold(waveform, baseline, n_sigma)
            }
        }
    }

    pub(crate) fn is_running_average(&self) -> bool {
        matches!(self, Self::RunningAverage { .. })
    }
}
