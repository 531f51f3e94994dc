//! Generates synthetic event records as JSON, for feeding the
//! `trace-to-statistics` binary without a detector.
use anyhow::Context;
use clap::Parser;
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::{fs::File, io::BufWriter, path::PathBuf};
use tpc_dqm_common::{EventRecord, RawDigits, Sample};
use tracing::info;
use waveform_simulator::{PulseTemplate, WaveformTemplate};

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Cli {
    /// File to write the JSON event array to
    #[clap(long)]
    output: PathBuf,

    #[clap(long, default_value = "10")]
    events: usize,

    #[clap(long, default_value = "8")]
    channels: u32,

    /// Samples per waveform
    #[clap(long, default_value = "1000")]
    length: usize,

    /// Pedestal level in ADC counts
    #[clap(long, default_value = "2048")]
    baseline: Sample,

    /// White-noise standard deviation in ADC counts
    #[clap(long, default_value = "5.0")]
    noise_sd: f64,

    /// Probability that a channel carries a pulse in a given event
    #[clap(long, default_value = "0.5")]
    pulse_probability: f64,

    #[clap(long, default_value = "300.0")]
    pulse_amplitude: f64,

    #[clap(long, default_value = "8.0")]
    pulse_sd: f64,

    /// Generate bipolar (induction-style) pulses instead of unipolar ones
    #[clap(long)]
    bipolar: bool,

    /// Seed for the random number generator, for reproducible data sets
    #[clap(long, default_value = "0")]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Cli::parse();
    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut records = Vec::with_capacity(args.events);
    for event in 0..args.events {
        let mut digits = Vec::with_capacity(args.channels as usize);
        for channel in 0..args.channels {
            let mut template =
                WaveformTemplate::new(args.length, args.baseline).with_noise(args.noise_sd);
            if rng.random_bool(args.pulse_probability) {
                let center = rng.random_range(0.1..0.9) * args.length as f64;
                template = template.with_pulse(if args.bipolar {
                    PulseTemplate::Bipolar {
                        center,
                        sd: args.pulse_sd,
                        amplitude: args.pulse_amplitude,
                    }
                } else {
                    PulseTemplate::Gaussian {
                        center,
                        sd: args.pulse_sd,
                        amplitude: args.pulse_amplitude,
                    }
                });
            }
            digits.push(
                RawDigits::new(channel, template.sample(&mut rng))
                    .with_pedestal(args.baseline),
            );
        }
        records.push(EventRecord {
            event: event as u32,
            digits,
        });
    }

    let file = File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    serde_json::to_writer(BufWriter::new(file), &records)?;
    info!(
        n_events = records.len(),
        path = %args.output.display(),
        "wrote simulated events"
    );

    Ok(())
}
