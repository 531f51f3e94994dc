//! Search for pulses ("peaks") in a single channel's waveform.
//!
//! The search runs a three-state machine (idle, in-up-peak, in-down-peak)
//! over an optionally smoothed copy of the waveform, with a debounce count
//! before a peak opens. Threshold comparisons read the smoothed copy; peak
//! amplitudes always re-read the original waveform so they are never
//! attenuated by smoothing.
use crate::{Real, parameters::ConfigError};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tpc_dqm_common::{Intensity, Sample};

/// How many times the waveform must sit on the baseline side before the
/// loose-boundary search stops. Two rejects single-sample baseline touches.
pub const DEFAULT_BASELINE_CROSSINGS: u32 = 2;

/// Detector plane category of a channel, controlling polarity rules.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaneKind {
    #[default]
    Unspecified,
    /// Bipolar pulse shape: an up excursion immediately followed by a down
    /// excursion. Peaks are matched into up/down pairs.
    Induction,
    /// Unipolar pulse shape; down-peaks are not searched for at all.
    Collection,
}

impl PlaneKind {
    fn fit_down_peaks(self) -> bool {
        matches!(self, Self::Induction | Self::Unspecified)
    }

    fn match_peaks(self) -> bool {
        self == Self::Induction
    }
}

/// One found pulse. Tight boundaries are where the waveform is past
/// threshold; loose boundaries reach back to the baseline (padded by half the
/// smoothing window) and delimit the region excluded from noise statistics.
///
/// Invariant: `start_loose <= start_tight <= peak_index <= end_tight <=
/// end_loose`, and peaks from one search are ordered with disjoint tight
/// ranges.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peak {
    /// Distance from baseline at the extremum, read from the unsmoothed
    /// waveform.
    pub amplitude: Intensity,
    /// Sample index of the extremum.
    pub peak_index: usize,
    pub start_tight: usize,
    pub start_loose: usize,
    pub end_tight: usize,
    pub end_loose: usize,
    /// Polarity: whether the pulse points above the baseline.
    pub is_up: bool,
}

/// A hit reported by an upstream reconstruction algorithm, used when peaks
/// are not to be re-derived from the waveform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoHit {
    pub start: usize,
    pub end: usize,
    pub peak_index: usize,
    pub amplitude: Intensity,
}

/// Repackage an ordered hit list into peaks with `tight == loose` boundaries.
///
/// Reconstruction counts a bipolar induction signal as one hit where the
/// waveform search would count an up/down pair; making every hit an up-peak
/// keeps occupancy and mean peak height consistent between the two paths.
pub fn peaks_from_hits(hits: &[RecoHit]) -> Vec<Peak> {
    hits.iter()
        .map(|hit| Peak {
            amplitude: hit.amplitude,
            peak_index: hit.peak_index,
            start_tight: hit.start,
            start_loose: hit.start,
            end_tight: hit.end,
            end_loose: hit.end,
            is_up: true,
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct PeakFinder {
    smoothing_window: usize,
    n_above_threshold: usize,
    plane: PlaneKind,
    match_range: usize,
    baseline_crossings: u32,
}

enum State {
    /// Counting consecutive qualifying samples of one polarity.
    Idle { count: usize, up: bool },
    /// A peak is open; at most one at a time.
    InPeak { peak: Peak, up: bool },
}

impl PeakFinder {
    /// `smoothing_window` must be odd (1 disables smoothing) and
    /// `n_above_threshold` at least 1; both are contract violations reported
    /// immediately rather than rounded.
    pub fn new(
        smoothing_window: usize,
        n_above_threshold: usize,
        plane: PlaneKind,
    ) -> Result<Self, ConfigError> {
        if smoothing_window % 2 == 0 {
            return Err(ConfigError::EvenSmoothingWindow(smoothing_window));
        }
        if n_above_threshold == 0 {
            return Err(ConfigError::ZeroDebounce);
        }
        Ok(Self {
            smoothing_window,
            n_above_threshold,
            plane,
            match_range: 2 * smoothing_window,
            baseline_crossings: DEFAULT_BASELINE_CROSSINGS,
        })
    }

    /// Override the up/down pairing distance used on induction planes.
    /// Defaults to twice the smoothing window.
    pub fn with_match_range(mut self, match_range: usize) -> Self {
        self.match_range = match_range;
        self
    }

    /// Override how many baseline touches terminate the loose-boundary
    /// search. Defaults to [`DEFAULT_BASELINE_CROSSINGS`].
    pub fn with_baseline_crossings(mut self, crossings: u32) -> Self {
        self.baseline_crossings = crossings;
        self
    }

    /// Scan `waveform` and return the found peaks, ordered by position.
    pub fn find_peaks(&self, waveform: &[Sample], baseline: Sample, threshold: Real) -> Vec<Peak> {
        let smoothed = self.smooth(waveform);
        let margin = self.smoothing_window / 2;
        let upper = Real::from(baseline) + threshold;
        let lower = Real::from(baseline) - threshold;

        let mut peaks = Vec::new();
        let mut state = State::Idle {
            count: 0,
            up: true,
        };
        let end = smoothed.len().saturating_sub(margin);
        for i in margin..end {
            let value = Real::from(smoothed[i]);
            state = match state {
                State::Idle { count, up } => {
                    self.idle_step(count, up, value, upper, lower, waveform, baseline, i)
                }
                State::InPeak { mut peak, up } => {
                    let continues = if up { value > upper } else { value < lower };
                    if continues {
                        track_amplitude(&mut peak, waveform, baseline, i);
                        State::InPeak { peak, up }
                    } else {
                        // close the open peak at the previous sample and
                        // evaluate this one under idle rules, so adjacent
                        // peaks never leave a gap
                        peaks.push(self.finish_peak(peak, &smoothed, baseline, up, i - 1));
                        self.idle_step(0, up, value, upper, lower, waveform, baseline, i)
                    }
                }
            };
        }
        // force-close a peak still open when the waveform ends
        if let State::InPeak { peak, up } = state {
            peaks.push(self.finish_peak(peak, &smoothed, baseline, up, end - 1));
        }

        if self.plane.match_peaks() {
            self.match_peaks(peaks)
        } else {
            peaks
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn idle_step(
        &self,
        count: usize,
        pending_up: bool,
        value: Real,
        upper: Real,
        lower: Real,
        waveform: &[Sample],
        baseline: Sample,
        i: usize,
    ) -> State {
        let qualifies_up = value > upper;
        let qualifies_down = self.plane.fit_down_peaks() && value < lower;
        if !qualifies_up && !qualifies_down {
            return State::Idle {
                count: 0,
                up: true,
            };
        }

        let up = qualifies_up;
        let count = if count > 0 && up == pending_up {
            count + 1
        } else {
            1
        };
        if count < self.n_above_threshold {
            return State::Idle { count, up };
        }

        let mut peak = Peak {
            start_tight: i,
            is_up: up,
            ..Default::default()
        };
        track_amplitude(&mut peak, waveform, baseline, i);
        State::InPeak { peak, up }
    }

    /// Record the tight end, then search outward for the loose boundaries:
    /// scan until the smoothed waveform has sat on the baseline side
    /// `baseline_crossings` times, then pad by half the smoothing window so
    /// the boundary is not under the influence of in-peak samples.
    fn finish_peak(
        &self,
        mut peak: Peak,
        smoothed: &[Sample],
        baseline: Sample,
        up: bool,
        end_tight: usize,
    ) -> Peak {
        let margin = self.smoothing_window / 2;
        let on_baseline_side = |sample: Sample| {
            if up {
                sample <= baseline
            } else {
                sample >= baseline
            }
        };

        peak.end_tight = end_tight;

        let mut start = peak.start_tight;
        let mut at_baseline = 0;
        while start > 0 {
            if on_baseline_side(smoothed[start]) {
                at_baseline += 1;
            }
            if at_baseline >= self.baseline_crossings {
                break;
            }
            start -= 1;
        }
        peak.start_loose = start.saturating_sub(margin);

        let mut end = peak.end_tight;
        let mut at_baseline = 0;
        while end < smoothed.len() - 1 {
            if on_baseline_side(smoothed[end]) {
                at_baseline += 1;
            }
            if at_baseline >= self.baseline_crossings {
                break;
            }
            end += 1;
        }
        peak.end_loose = (end + margin).min(smoothed.len() - 1);

        peak
    }

    /// Induction planes produce bipolar signals, so an up-peak is only kept
    /// when a down-peak immediately follows within `match_range`; everything
    /// unmatched is baseline ripple and is dropped.
    fn match_peaks(&self, peaks: Vec<Peak>) -> Vec<Peak> {
        peaks
            .iter()
            .tuple_windows()
            .filter(|(prev, next)| {
                prev.is_up
                    && !next.is_up
                    && (next.start_loose <= prev.end_loose
                        || next.start_loose - prev.end_loose < self.match_range)
            })
            .flat_map(|(prev, next)| [prev.clone(), next.clone()])
            .collect()
    }

    /// Index-aligned boxcar average; the `window / 2` margins at each end
    /// keep their raw values and are excluded from the peak search.
    fn smooth<'a>(&self, waveform: &'a [Sample]) -> Cow<'a, [Sample]> {
        if self.smoothing_window <= 1 || waveform.len() < self.smoothing_window {
            return Cow::Borrowed(waveform);
        }
        let margin = self.smoothing_window / 2;
        let mut smoothed = waveform.to_vec();
        for i in margin..waveform.len() - margin {
            let sum: Real = waveform[i - margin..=i + margin]
                .iter()
                .map(|&s| Real::from(s))
                .sum();
            smoothed[i] = (sum / self.smoothing_window as Real) as Sample;
        }
        Cow::Owned(smoothed)
    }
}

fn track_amplitude(peak: &mut Peak, waveform: &[Sample], baseline: Sample, i: usize) {
    let amplitude = (i32::from(waveform[i]) - i32::from(baseline)).unsigned_abs() as Intensity;
    if amplitude > peak.amplitude {
        peak.amplitude = amplitude;
        peak.peak_index = i;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariants(peaks: &[Peak]) {
        for peak in peaks {
            assert!(peak.start_loose <= peak.start_tight, "{peak:?}");
            assert!(peak.start_tight <= peak.peak_index, "{peak:?}");
            assert!(peak.peak_index <= peak.end_tight, "{peak:?}");
            assert!(peak.end_tight <= peak.end_loose, "{peak:?}");
        }
        for pair in peaks.windows(2) {
            assert!(pair[0].end_tight < pair[1].start_tight, "{pair:?}");
        }
    }

    fn flat(len: usize) -> Vec<Sample> {
        vec![0; len]
    }

    #[test]
    fn even_window_fails_fast() {
        assert_eq!(
            PeakFinder::new(2, 1, PlaneKind::Unspecified).unwrap_err(),
            ConfigError::EvenSmoothingWindow(2)
        );
        assert_eq!(
            PeakFinder::new(0, 1, PlaneKind::Unspecified).unwrap_err(),
            ConfigError::EvenSmoothingWindow(0)
        );
    }

    #[test]
    fn zero_debounce_fails_fast() {
        assert_eq!(
            PeakFinder::new(1, 0, PlaneKind::Unspecified).unwrap_err(),
            ConfigError::ZeroDebounce
        );
    }

    #[test]
    fn single_square_pulse() {
        let mut waveform = flat(40);
        for sample in &mut waveform[10..=14] {
            *sample = 50;
        }
        let finder = PeakFinder::new(1, 1, PlaneKind::Unspecified).unwrap();
        let peaks = finder.find_peaks(&waveform, 0, 20.0);
        assert_invariants(&peaks);
        assert_eq!(peaks.len(), 1);
        let peak = &peaks[0];
        assert!(peak.is_up);
        assert_eq!(peak.amplitude, 50);
        assert_eq!(peak.peak_index, 10); // first sample at the maximum
        assert_eq!(peak.start_tight, 10);
        assert_eq!(peak.end_tight, 14);
        assert_eq!(peak.start_loose, 8); // two baseline touches at 9 and 8
        assert_eq!(peak.end_loose, 16);
    }

    #[test]
    fn two_separated_pulses() {
        let mut waveform = flat(60);
        for sample in &mut waveform[10..=12] {
            *sample = 40;
        }
        for sample in &mut waveform[30..=33] {
            *sample = 60;
        }
        let finder = PeakFinder::new(1, 1, PlaneKind::Unspecified).unwrap();
        let peaks = finder.find_peaks(&waveform, 0, 20.0);
        assert_invariants(&peaks);
        assert_eq!(peaks.len(), 2);
        assert_eq!(peaks[0].amplitude, 40);
        assert_eq!(peaks[1].amplitude, 60);
        assert_eq!(peaks[1].peak_index, 30);
    }

    #[test]
    fn debounce_rejects_short_spikes() {
        let mut waveform = flat(30);
        waveform[10] = 50;
        waveform[11] = 50;
        let finder = PeakFinder::new(1, 3, PlaneKind::Unspecified).unwrap();
        assert!(finder.find_peaks(&waveform, 0, 20.0).is_empty());

        waveform[12] = 50;
        let peaks = finder.find_peaks(&waveform, 0, 20.0);
        assert_invariants(&peaks);
        assert_eq!(peaks.len(), 1);
        // the peak opens on the sample that completes the debounce
        assert_eq!(peaks[0].start_tight, 12);
    }

    #[test]
    fn down_peak_on_unspecified_plane() {
        let mut waveform = flat(30);
        for sample in &mut waveform[10..=13] {
            *sample = -45;
        }
        let finder = PeakFinder::new(1, 1, PlaneKind::Unspecified).unwrap();
        let peaks = finder.find_peaks(&waveform, 0, 20.0);
        assert_invariants(&peaks);
        assert_eq!(peaks.len(), 1);
        assert!(!peaks[0].is_up);
        assert_eq!(peaks[0].amplitude, 45);
    }

    #[test]
    fn collection_plane_ignores_down_peaks() {
        let mut waveform = flat(30);
        for sample in &mut waveform[10..=13] {
            *sample = -45;
        }
        let finder = PeakFinder::new(1, 1, PlaneKind::Collection).unwrap();
        assert!(finder.find_peaks(&waveform, 0, 20.0).is_empty());
    }

    #[test]
    fn opposite_polarity_closes_without_gap() {
        let mut waveform = flat(30);
        for sample in &mut waveform[5..=7] {
            *sample = 50;
        }
        for sample in &mut waveform[8..=10] {
            *sample = -50;
        }
        let finder = PeakFinder::new(1, 1, PlaneKind::Unspecified).unwrap();
        let peaks = finder.find_peaks(&waveform, 0, 20.0);
        assert_invariants(&peaks);
        assert_eq!(peaks.len(), 2);
        assert!(peaks[0].is_up);
        assert!(!peaks[1].is_up);
        // the sample that closed the up-peak opened the down-peak
        assert_eq!(peaks[0].end_tight, 7);
        assert_eq!(peaks[1].start_tight, 8);
    }

    #[test]
    fn induction_keeps_matched_pair() {
        let mut waveform = flat(40);
        for sample in &mut waveform[10..=12] {
            *sample = 50;
        }
        for sample in &mut waveform[16..=18] {
            *sample = -50;
        }
        let finder = PeakFinder::new(1, 1, PlaneKind::Induction).unwrap();
        let peaks = finder.find_peaks(&waveform, 0, 20.0);
        assert_invariants(&peaks);
        assert_eq!(peaks.len(), 2);
        assert!(peaks[0].is_up);
        assert!(!peaks[1].is_up);
    }

    #[test]
    fn induction_drops_isolated_peaks() {
        let mut waveform = flat(60);
        for sample in &mut waveform[10..=12] {
            *sample = 50;
        }
        // a down-peak, but far outside the match range
        for sample in &mut waveform[40..=42] {
            *sample = -50;
        }
        let finder = PeakFinder::new(1, 1, PlaneKind::Induction).unwrap();
        assert!(finder.find_peaks(&waveform, 0, 20.0).is_empty());
    }

    #[test]
    fn amplitude_reads_unsmoothed_waveform() {
        let mut waveform = flat(30);
        waveform[10] = 10;
        waveform[11] = 20;
        waveform[12] = 100;
        waveform[13] = 20;
        waveform[14] = 10;
        let finder = PeakFinder::new(5, 1, PlaneKind::Unspecified).unwrap();
        let peaks = finder.find_peaks(&waveform, 0, 30.0);
        assert_invariants(&peaks);
        assert_eq!(peaks.len(), 1);
        // the smoothed maximum is 32, the raw one is 100
        assert_eq!(peaks[0].amplitude, 100);
        assert_eq!(peaks[0].peak_index, 12);
    }

    #[test]
    fn open_peak_is_closed_at_waveform_end() {
        let mut waveform = flat(20);
        for sample in &mut waveform[15..] {
            *sample = 60;
        }
        let finder = PeakFinder::new(1, 1, PlaneKind::Unspecified).unwrap();
        let peaks = finder.find_peaks(&waveform, 0, 20.0);
        assert_invariants(&peaks);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].end_tight, 19);
        assert_eq!(peaks[0].end_loose, 19);
    }

    #[test]
    fn empty_and_short_waveforms() {
        let finder = PeakFinder::new(5, 1, PlaneKind::Unspecified).unwrap();
        assert!(finder.find_peaks(&[], 0, 10.0).is_empty());
        assert!(finder.find_peaks(&[100, 100], 0, 10.0).is_empty());
    }

    #[test]
    fn hits_repackage_as_up_peaks() {
        let hits = vec![
            RecoHit {
                start: 10,
                end: 20,
                peak_index: 14,
                amplitude: 120,
            },
            RecoHit {
                start: 40,
                end: 44,
                peak_index: 41,
                amplitude: 60,
            },
        ];
        let peaks = peaks_from_hits(&hits);
        assert_invariants(&peaks);
        assert_eq!(peaks.len(), 2);
        assert!(peaks.iter().all(|p| p.is_up));
        assert_eq!(peaks[0].start_loose, 10);
        assert_eq!(peaks[0].start_tight, 10);
        assert_eq!(peaks[0].end_loose, 20);
        assert_eq!(peaks[1].amplitude, 60);
    }
}
