//! Streaming estimate of a waveform's most frequent ADC value, used as the
//! signal-free baseline of a channel.
use tpc_dqm_common::Sample;

/// Number of candidate/counter slots held by [mode]. Any value occurring more
/// than `N / (MODE_SLOTS + 1)` times in the `N` processed samples is
/// guaranteed to still hold a nonzero counter at the end of the scan.
pub const MODE_SLOTS: usize = 10;

/// Approximate mode of `samples`, visiting every `stride`-th sample.
///
/// This is the FREQUENT heavy-hitters algorithm (Demaine et al.): a fixed set
/// of (value, counter) slots is maintained in O(1) memory. A sample matching
/// an occupied slot increments that slot; otherwise it claims a slot whose
/// counter is zero; otherwise every counter is decremented and the sample is
/// dropped. Only the identity of the winning value is reliable, the surviving
/// counts underestimate the true frequencies.
///
/// A stride greater than one trades accuracy for speed; it is a caller policy,
/// not part of the algorithm. `stride` must be at least 1.
pub fn mode(samples: &[Sample], stride: usize) -> Sample {
    let mut values = [0 as Sample; MODE_SLOTS];
    let mut counters = [0u32; MODE_SLOTS];

    for &value in samples.iter().step_by(stride) {
        if let Some(home) = values.iter().position(|&v| v == value) {
            counters[home] += 1;
        } else if let Some(home) = counters.iter().position(|&c| c == 0) {
            values[home] = value;
            counters[home] = 1;
        } else {
            for counter in counters.iter_mut() {
                *counter -= 1;
            }
        }
    }

    // the first slot holding the highest counter wins
    let mut best = 0;
    let mut best_count = 0;
    for (slot, &counter) in counters.iter().enumerate() {
        if counter > best_count {
            best_count = counter;
            best = slot;
        }
    }
    values[best]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_waveform() {
        assert_eq!(mode(&[], 1), 0);
    }

    #[test]
    fn constant_waveform() {
        let samples = [2048; 25];
        assert_eq!(mode(&samples, 1), 2048);
    }

    #[test]
    fn six_of_ten() {
        let samples = [1500, 1499, 1500, 1501, 1500, 1500, 1502, 1500, 1498, 1500];
        assert_eq!(mode(&samples, 1), 1500);
    }

    #[test]
    fn majority_guarantee() {
        // 2048 occurs 11 times out of 110 processed samples, i.e. more than
        // N / (MODE_SLOTS + 1); all other samples are distinct.
        let mut samples = Vec::new();
        let mut filler = 0 as Sample;
        for _ in 0..11 {
            samples.push(2048);
            for _ in 0..9 {
                samples.push(filler);
                filler += 1;
            }
        }
        assert_eq!(samples.len(), 110);
        assert_eq!(mode(&samples, 1), 2048);
    }

    #[test]
    fn stride_skips_samples() {
        // every even-indexed sample is 5; a stride of 2 sees nothing else
        let mut samples = Vec::new();
        for i in 0..10 {
            samples.push(5);
            samples.push(i);
        }
        assert_eq!(mode(&samples, 2), 5);
    }
}
