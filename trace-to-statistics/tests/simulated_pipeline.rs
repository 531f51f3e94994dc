//! End-to-end run over simulated waveforms: a pulsed channel and a quiet
//! channel with independent white noise, analyzed with the same settings an
//! online monitor would use.
use assert_approx_eq::assert_approx_eq;
use rand::{SeedableRng, rngs::StdRng};
use tpc_dqm_common::RawDigits;
use trace_to_statistics::{
    analysis::Analysis,
    parameters::{
        AnalysisConfig, BaselineStrategy, NoiseRangeStrategy, ThresholdStrategy,
    },
};
use waveform_simulator::{PulseTemplate, WaveformTemplate};

fn config() -> AnalysisConfig {
    AnalysisConfig {
        n_channels: 2,
        baseline: BaselineStrategy::EstimateMode { stride: 1 },
        refine_baseline: true,
        threshold: ThresholdStrategy::Fixed { value: 100.0 },
        noise_range: NoiseRangeStrategy::PeakComplement,
        smoothing_window: 1,
        n_above_threshold: 1,
        use_planes: false,
        collection_channels: Vec::new(),
        induction_channels: Vec::new(),
        max_noise_samples: None,
    }
}

#[test]
fn simulated_pulse_is_recovered() {
    let mut rng = StdRng::seed_from_u64(7);
    let pulsed = WaveformTemplate::new(1000, 2048)
        .with_noise(5.0)
        .with_pulse(PulseTemplate::Gaussian {
            center: 500.0,
            sd: 8.0,
            amplitude: 300.0,
        })
        .sample(&mut rng);
    let quiet = WaveformTemplate::new(1000, 2048)
        .with_noise(5.0)
        .sample(&mut rng);

    let digits = vec![RawDigits::new(0, pulsed), RawDigits::new(1, quiet)];

    let mut analysis = Analysis::new(config()).unwrap();
    analysis.analyze_event(&digits);

    let data = &analysis.channel_data()[0];
    assert!(!data.empty);
    // the estimated and refined baseline lands on the pedestal
    assert!((i32::from(data.baseline) - 2048).abs() <= 1, "{}", data.baseline);

    // the pulse is found at full amplitude; a 5 ADC noise floor cannot fake
    // a 100 ADC threshold crossing, so everything found belongs to the pulse
    assert!(data.occupancy >= 1.0);
    let peak = data
        .peaks
        .iter()
        .max_by_key(|peak| peak.amplitude)
        .unwrap();
    assert!(peak.is_up);
    assert!(peak.peak_index.abs_diff(500) <= 5, "{peak:?}");
    assert!(
        (270..=330).contains(&peak.amplitude),
        "amplitude = {}",
        peak.amplitude
    );

    // the noise rms recovers the simulated floor, pulse region excluded
    assert!((4.5..5.5).contains(&data.rms), "rms = {}", data.rms);
    for range in &data.noise_ranges {
        assert!(range[1] < peak.start_loose || range[0] > peak.end_loose);
    }

    let quiet_data = &analysis.channel_data()[1];
    assert!(quiet_data.peaks.is_empty());
    assert_approx_eq!(quiet_data.occupancy, 0.0);
    assert!((4.5..5.5).contains(&quiet_data.rms), "rms = {}", quiet_data.rms);

    // independent noise: the scaled difference-rms sits near 1
    assert!(
        (0.85..1.15).contains(&data.next_channel_dnoise),
        "dnoise = {}",
        data.next_channel_dnoise
    );
    assert_approx_eq!(quiet_data.next_channel_dnoise, 0.0);
}

#[test]
fn running_average_threshold_converges_over_events() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut config = config();
    config.threshold = ThresholdStrategy::RunningAverage { n_sigma: 5.0 };
    config.n_channels = 1;
    let mut analysis = Analysis::new(config).unwrap();

    let template = WaveformTemplate::new(1000, 2048).with_noise(5.0);
    for _ in 0..10 {
        let digits = vec![RawDigits::new(0, template.sample(&mut rng))];
        analysis.analyze_event(&digits);
    }
    // after a few signal-free events the threshold settles at
    // n_sigma * noise rms
    let threshold = analysis.channel_data()[0].threshold;
    assert!((20.0..30.0).contains(&threshold), "threshold = {threshold}");
}
