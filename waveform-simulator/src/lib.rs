//! Synthetic digitized waveforms for exercising the channel analysis:
//! a flat pedestal, optional Gaussian white noise, and pulse templates laid
//! on top.
use rand::Rng;
use rand_distr::{Distribution, Normal};
use tpc_dqm_common::Sample;

/// A pulse shape added onto the pedestal.
#[derive(Clone, Copy, Debug)]
pub enum PulseTemplate {
    /// Unipolar Gaussian pulse peaking at `amplitude` above the pedestal.
    Gaussian { center: f64, sd: f64, amplitude: f64 },
    /// Bipolar pulse (the derivative of a Gaussian): an up lobe followed by
    /// a down lobe, each reaching `amplitude`, as an induction-plane channel
    /// would see.
    Bipolar { center: f64, sd: f64, amplitude: f64 },
}

impl PulseTemplate {
    fn value_at(&self, t: f64) -> f64 {
        match *self {
            Self::Gaussian {
                center,
                sd,
                amplitude,
            } => amplitude * (-(t - center).powi(2) / (2.0 * sd * sd)).exp(),
            Self::Bipolar {
                center,
                sd,
                amplitude,
            } => {
                // lobes are normalised so that the extrema of
                // -x * exp(-x^2 / 2) (at x = -1 and x = 1) map to amplitude
                let x = (t - center) / sd;
                amplitude * -x * (-x * x / 2.0).exp() * f64::exp(0.5)
            }
        }
    }
}

/// Describes one channel's waveform; [`WaveformTemplate::sample`] draws a
/// concrete realisation from it.
#[derive(Clone, Debug)]
pub struct WaveformTemplate {
    length: usize,
    baseline: Sample,
    noise_sd: f64,
    pulses: Vec<PulseTemplate>,
}

impl WaveformTemplate {
    pub fn new(length: usize, baseline: Sample) -> Self {
        WaveformTemplate {
            length,
            baseline,
            noise_sd: 0.0,
            pulses: Vec::new(),
        }
    }

    /// Add Gaussian white noise of the given standard deviation.
    pub fn with_noise(mut self, sd: f64) -> Self {
        self.noise_sd = sd;
        self
    }

    pub fn with_pulse(mut self, pulse: PulseTemplate) -> Self {
        self.pulses.push(pulse);
        self
    }

    /// Draw one waveform, rounding to ADC counts and saturating at the
    /// 16-bit sample range.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Vec<Sample> {
        let noise = (self.noise_sd > 0.0)
            .then(|| Normal::new(0.0, self.noise_sd).expect("noise sd is finite and positive"));
        (0..self.length)
            .map(|i| {
                let t = i as f64;
                let mut value = f64::from(self.baseline);
                value += self.pulses.iter().map(|p| p.value_at(t)).sum::<f64>();
                if let Some(normal) = &noise {
                    value += normal.sample(rng);
                }
                value
                    .round()
                    .clamp(f64::from(Sample::MIN), f64::from(Sample::MAX)) as Sample
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn flat_template_is_the_pedestal() {
        let mut rng = StdRng::seed_from_u64(0);
        let waveform = WaveformTemplate::new(64, 2048).sample(&mut rng);
        assert_eq!(waveform, vec![2048; 64]);
    }

    #[test]
    fn gaussian_pulse_peaks_at_center() {
        let mut rng = StdRng::seed_from_u64(0);
        let waveform = WaveformTemplate::new(200, 1000)
            .with_pulse(PulseTemplate::Gaussian {
                center: 100.0,
                sd: 10.0,
                amplitude: 300.0,
            })
            .sample(&mut rng);
        assert_eq!(waveform[100], 1300);
        assert!(waveform[50] < 1010);
        let max = waveform.iter().max().unwrap();
        assert_eq!(*max, 1300);
    }

    #[test]
    fn bipolar_pulse_has_both_lobes() {
        let mut rng = StdRng::seed_from_u64(0);
        let waveform = WaveformTemplate::new(200, 0)
            .with_pulse(PulseTemplate::Bipolar {
                center: 100.0,
                sd: 8.0,
                amplitude: 200.0,
            })
            .sample(&mut rng);
        // up lobe at center - sd, down lobe at center + sd
        assert_eq!(waveform[92], 200);
        assert_eq!(waveform[108], -200);
        assert!(waveform[..80].iter().all(|&s| s.abs() < 40));
    }

    #[test]
    fn noise_has_the_requested_spread() {
        let mut rng = StdRng::seed_from_u64(42);
        let waveform = WaveformTemplate::new(4000, 0).with_noise(5.0).sample(&mut rng);
        let mean_square: f64 = waveform
            .iter()
            .map(|&s| f64::from(s) * f64::from(s))
            .sum::<f64>()
            / waveform.len() as f64;
        let rms = mean_square.sqrt();
        assert!((4.5..5.5).contains(&rms), "rms = {rms}");
    }
}
