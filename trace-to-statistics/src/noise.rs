//! Signal-free regions of a waveform and the noise statistics computed over
//! them, including the pairwise statistics quantifying noise shared between
//! channels ("coherent" noise).
//!
//! Degenerate inputs never panic: statistics over an empty region come back
//! as NaN, and [`NoiseSample::reset_baseline`] keeps the prior baseline when
//! there is nothing to average.
use crate::{Real, peak_finder::Peak};
use tpc_dqm_common::Sample;

/// A closed `[lo, hi]` index interval known to be free of signal.
pub type NoiseRange = [usize; 2];

/// The signal-free index ranges of one channel's waveform, stored sorted,
/// non-overlapping and ascending, together with the channel baseline.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NoiseSample {
    ranges: Vec<NoiseRange>,
    baseline: Sample,
}

impl NoiseSample {
    /// Complement of the peaks' loose ranges over a waveform of
    /// `waveform_len` samples.
    ///
    /// Peaks are assumed sorted by `start_loose` with ascending `end_loose`,
    /// as produced by one peak-finder run; the sweep silently yields wrong
    /// ranges otherwise.
    pub fn from_peaks(peaks: &[Peak], baseline: Sample, waveform_len: usize) -> Self {
        let mut ranges = Vec::new();
        let mut min = 0;
        for peak in peaks {
            if min < peak.start_loose {
                ranges.push([min, peak.start_loose - 1]);
            }
            min = peak.end_loose + 1;
        }
        if min < waveform_len {
            ranges.push([min, waveform_len - 1]);
        }
        NoiseSample { ranges, baseline }
    }

    /// Use an explicit list of signal-free ranges, e.g. the head of the
    /// waveform when no peak-based exclusion is wanted.
    pub fn with_ranges(ranges: Vec<NoiseRange>, baseline: Sample) -> Self {
        NoiseSample { ranges, baseline }
    }

    pub fn ranges(&self) -> &[NoiseRange] {
        &self.ranges
    }

    pub fn baseline(&self) -> Sample {
        self.baseline
    }

    /// Root-mean-square of `(sample - baseline)` over the noise ranges,
    /// scanning at most `max_samples` samples. NaN when the ranges are empty.
    pub fn rms(&self, waveform: &[Sample], max_samples: Option<usize>) -> Real {
        Self::calc_rms(waveform, &self.ranges, self.baseline, max_samples)
    }

    fn calc_rms(
        waveform: &[Sample],
        ranges: &[NoiseRange],
        baseline: Sample,
        max_samples: Option<usize>,
    ) -> Real {
        let mut sum = 0.0;
        let n = accumulate(ranges, max_samples, |i| {
            let diff = Real::from(waveform[i]) - Real::from(baseline);
            sum += diff * diff;
        });
        (sum / n as Real).sqrt()
    }

    /// Set intersection with another channel's noise ranges, via a two-pointer
    /// sweep over the two sorted lists. Keeps this sample's baseline.
    pub fn intersection(&self, other: &NoiseSample) -> NoiseSample {
        let mut ranges = Vec::new();
        let (mut a, mut b) = (0, 0);
        while a < self.ranges.len() && b < other.ranges.len() {
            let ra = self.ranges[a];
            let rb = other.ranges[b];
            if ra[1] >= rb[0] && ra[0] <= rb[1] {
                ranges.push([ra[0].max(rb[0]), ra[1].min(rb[1])]);
            }
            // whichever range ends first advances
            if ra[1] < rb[1] {
                a += 1;
            } else {
                b += 1;
            }
        }
        NoiseSample {
            ranges,
            baseline: self.baseline,
        }
    }

    /// Covariance of the two baseline-subtracted channels over their shared
    /// quiet samples.
    pub fn covariance(
        &self,
        waveform: &[Sample],
        other: &NoiseSample,
        other_waveform: &[Sample],
        max_samples: Option<usize>,
    ) -> Real {
        let joint = self.intersection(other);
        let mut sum = 0.0;
        let n = accumulate(&joint.ranges, max_samples, |i| {
            sum += (Real::from(waveform[i]) - Real::from(self.baseline))
                * (Real::from(other_waveform[i]) - Real::from(other.baseline));
        });
        sum / n as Real
    }

    /// Covariance normalized by each channel's RMS restricted to the shared
    /// quiet region.
    pub fn correlation(
        &self,
        waveform: &[Sample],
        other: &NoiseSample,
        other_waveform: &[Sample],
        max_samples: Option<usize>,
    ) -> Real {
        let joint = self.intersection(other);
        let scaling = Self::calc_rms(waveform, &joint.ranges, self.baseline, max_samples)
            * Self::calc_rms(other_waveform, &joint.ranges, other.baseline, max_samples);
        self.covariance(waveform, other, other_waveform, max_samples) / scaling
    }

    /// RMS of the sample-by-sample sum of the two baseline-subtracted
    /// channels over their shared quiet samples.
    pub fn sum_rms(
        &self,
        waveform: &[Sample],
        other: &NoiseSample,
        other_waveform: &[Sample],
        max_samples: Option<usize>,
    ) -> Real {
        let joint = self.intersection(other);
        let mut sum = 0.0;
        let n = accumulate(&joint.ranges, max_samples, |i| {
            let value = (Real::from(waveform[i]) - Real::from(self.baseline))
                + (Real::from(other_waveform[i]) - Real::from(other.baseline));
            sum += value * value;
        });
        (sum / n as Real).sqrt()
    }

    /// RMS of the sample-by-sample difference of the two baseline-subtracted
    /// channels over their shared quiet samples. Symmetric in its arguments.
    pub fn dnoise(
        &self,
        waveform: &[Sample],
        other: &NoiseSample,
        other_waveform: &[Sample],
        max_samples: Option<usize>,
    ) -> Real {
        let joint = self.intersection(other);
        let mut sum = 0.0;
        let n = accumulate(&joint.ranges, max_samples, |i| {
            let value = (Real::from(waveform[i]) - Real::from(self.baseline))
                - (Real::from(other_waveform[i]) - Real::from(other.baseline));
            sum += value * value;
        });
        (sum / n as Real).sqrt()
    }

    /// RMS of the N-way sum of baseline-subtracted channels over their common
    /// quiet region, rescaled so that fully uncorrelated noise (expected
    /// `rms * sqrt(N)`) maps to 0 and fully correlated noise (expected
    /// `rms * N`) maps to 1, with the mean single-channel RMS as the unit.
    ///
    /// The normalization assumes channels of similar variance; treat the
    /// result as approximate when they differ substantially. At least two
    /// channels are required.
    pub fn scaled_sum_rms(
        noises: &[&NoiseSample],
        waveforms: &[&[Sample]],
        max_samples: Option<usize>,
    ) -> Real {
        assert!(
            noises.len() >= 2 && noises.len() == waveforms.len(),
            "scaled_sum_rms needs matching noise samples for at least two channels"
        );
        let mut joint = noises[0].intersection(noises[1]);
        for noise in &noises[2..] {
            joint = joint.intersection(noise);
        }

        let mut sum = 0.0;
        let n = accumulate(&joint.ranges, max_samples, |i| {
            let value: Real = noises
                .iter()
                .zip(waveforms)
                .map(|(noise, waveform)| Real::from(waveform[i]) - Real::from(noise.baseline))
                .sum();
            sum += value * value;
        });
        let sum_rms = (sum / n as Real).sqrt();

        let mean_rms = noises
            .iter()
            .zip(waveforms)
            .map(|(noise, waveform)| {
                Self::calc_rms(waveform, &joint.ranges, noise.baseline, max_samples)
            })
            .sum::<Real>()
            / noises.len() as Real;

        let n_channels = noises.len() as Real;
        let scale_sub = mean_rms * n_channels.sqrt();
        let scale_div = mean_rms * n_channels - scale_sub;
        (sum_rms - scale_sub) / scale_div
    }

    /// Recompute the baseline as the mean of all samples inside the noise
    /// ranges, refining a coarse estimate. Keeps the prior baseline when the
    /// ranges are empty: in the degenerate all-peak case it is more important
    /// to keep the analysis alive than to refine anything.
    pub fn reset_baseline(&mut self, waveform: &[Sample]) {
        let mut total: i64 = 0;
        let mut count: i64 = 0;
        for range in &self.ranges {
            for i in range[0]..=range[1] {
                total += i64::from(waveform[i]);
                count += 1;
            }
        }
        if count == 0 {
            return;
        }
        self.baseline = (total / count) as Sample;
    }
}

/// Visit every index in `ranges` up to the cap, returning how many were
/// visited.
fn accumulate(
    ranges: &[NoiseRange],
    max_samples: Option<usize>,
    mut visit: impl FnMut(usize),
) -> usize {
    let cap = max_samples.unwrap_or(usize::MAX);
    let mut n = 0;
    for range in ranges {
        for i in range[0]..=range[1] {
            visit(i);
            n += 1;
            if n == cap {
                return n;
            }
        }
    }
    n
}

/// Sample-by-sample sum of a group of baseline-subtracted waveforms, sized by
/// the first one; used when looking at coherent noise across a group.
pub fn sum_waveforms(waveforms: &[&[Sample]], baselines: &[Sample]) -> Vec<i32> {
    let len = waveforms.first().map_or(0, |waveform| waveform.len());
    (0..len)
        .map(|i| {
            waveforms
                .iter()
                .zip(baselines)
                .map(|(waveform, &baseline)| i32::from(waveform[i]) - i32::from(baseline))
                .sum()
        })
        .collect()
}
