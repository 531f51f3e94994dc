//! # Trace to Statistics
//!
//! Command line front end of the channel analysis engine:
//! * Reads a JSON array of event records (one waveform per channel per
//!   event), e.g. as produced by the `waveform-simulator` binary.
//! * Runs the configured per-channel analysis over every event in order.
//! * Writes the per-event channel statistics as JSON to a file or stdout.
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Write},
    path::PathBuf,
};
use tpc_dqm_common::{EventNumber, EventRecord};
use tracing::info;
use trace_to_statistics::{
    Real,
    analysis::{Analysis, ChannelData},
    parameters::{
        AnalysisConfig, BaselineStrategy, ChannelRange, NoiseRangeStrategy, ThresholdStrategy,
    },
    threshold::MomentFitter,
};

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Cli {
    /// JSON file holding an array of event records
    #[clap(long)]
    input: PathBuf,

    /// Where to write the channel statistics (stdout if omitted)
    #[clap(long)]
    output: Option<PathBuf>,

    /// Number of channels in the readout unit
    #[clap(long)]
    n_channels: usize,

    /// How the per-channel baseline is obtained
    #[clap(long, value_enum, default_value_t = BaselineMethod::Pedestal)]
    baseline: BaselineMethod,

    /// Stride used when estimating the baseline by mode finding
    #[clap(long, default_value = "1")]
    mode_stride: usize,

    /// Refine the baseline to the mean over the noise ranges once peaks are
    /// known
    #[clap(long)]
    refine_baseline: bool,

    /// Boxcar smoothing window applied before threshold comparisons; must be
    /// odd, 1 disables smoothing
    #[clap(long, default_value = "1")]
    smoothing_window: usize,

    /// Consecutive past-threshold samples required before a peak opens
    #[clap(long, default_value = "1")]
    n_above_threshold: usize,

    /// How the signal-free ranges for noise statistics are chosen
    #[clap(long, value_enum, default_value_t = NoiseMethod::PeakComplement)]
    noise_range: NoiseMethod,

    /// Number of head-of-waveform samples used with --noise-range
    /// first-samples
    #[clap(long, default_value = "20")]
    n_noise_samples: usize,

    /// Cap on the number of samples entering each RMS/correlation estimate
    #[clap(long)]
    max_noise_samples: Option<usize>,

    /// Half-open channel ranges assigned to the collection plane, e.g.
    /// `--collection-channels 240,480`; may be given multiple times
    #[clap(long)]
    collection_channels: Vec<ChannelRange>,

    /// Half-open channel ranges assigned to the induction plane
    #[clap(long)]
    induction_channels: Vec<ChannelRange>,

    #[command(subcommand)]
    threshold: ThresholdMode,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BaselineMethod {
    /// Assume the baseline is zero
    Zero,
    /// Use the pedestal reported alongside each waveform
    Pedestal,
    /// Estimate the waveform's mode
    Mode,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum NoiseMethod {
    FirstSamples,
    PeakComplement,
}

/// Selects the threshold estimation strategy, wrapping the strategy-specific
/// options in each variant.
#[derive(Debug, Subcommand)]
enum ThresholdMode {
    /// Use a fixed, configured threshold
    Fixed {
        #[clap(long)]
        threshold: Real,
    },
    /// Fit a Gaussian to a histogram of ADC values and scale its width
    HistogramFit {
        #[clap(long, default_value = "5.0")]
        n_sigma: Real,
    },
    /// Scale the RMS of the whole waveform, signal included
    RawRms {
        #[clap(long, default_value = "5.0")]
        n_sigma: Real,
    },
    /// Scale a running average of past per-channel noise RMS values
    RunningAverage {
        #[clap(long, default_value = "5.0")]
        n_sigma: Real,
    },
}

/// One event's worth of output records.
#[derive(Debug, serde::Serialize)]
struct EventStatistics {
    event: EventNumber,
    channels: Vec<ChannelData>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Cli::parse();

    let threshold = match args.threshold {
        ThresholdMode::Fixed { threshold } => ThresholdStrategy::Fixed { value: threshold },
        ThresholdMode::HistogramFit { n_sigma } => ThresholdStrategy::HistogramFit {
            n_sigma,
            fitter: Box::new(MomentFitter),
        },
        ThresholdMode::RawRms { n_sigma } => ThresholdStrategy::RawRms { n_sigma },
        ThresholdMode::RunningAverage { n_sigma } => ThresholdStrategy::RunningAverage { n_sigma },
    };

    let config = AnalysisConfig {
        n_channels: args.n_channels,
        baseline: match args.baseline {
            BaselineMethod::Zero => BaselineStrategy::Zero,
            BaselineMethod::Pedestal => BaselineStrategy::Pedestal,
            BaselineMethod::Mode => BaselineStrategy::EstimateMode {
                stride: args.mode_stride,
            },
        },
        refine_baseline: args.refine_baseline,
        threshold,
        noise_range: match args.noise_range {
            NoiseMethod::FirstSamples => NoiseRangeStrategy::FirstSamples {
                n: args.n_noise_samples,
            },
            NoiseMethod::PeakComplement => NoiseRangeStrategy::PeakComplement,
        },
        smoothing_window: args.smoothing_window,
        n_above_threshold: args.n_above_threshold,
        use_planes: !args.collection_channels.is_empty() || !args.induction_channels.is_empty(),
        collection_channels: args.collection_channels,
        induction_channels: args.induction_channels,
        max_noise_samples: args.max_noise_samples,
    };
    let mut analysis = Analysis::new(config)?;

    let input = File::open(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?;
    let events: Vec<EventRecord> =
        serde_json::from_reader(BufReader::new(input)).context("parsing event records")?;
    info!(n_events = events.len(), "loaded events");

    let mut statistics = Vec::with_capacity(events.len());
    for record in &events {
        analysis.analyze_event(&record.digits);
        statistics.push(EventStatistics {
            event: record.event,
            channels: analysis.channel_data().to_vec(),
        });
    }

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating {}", path.display()))?;
            serde_json::to_writer_pretty(BufWriter::new(file), &statistics)?;
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            serde_json::to_writer_pretty(&mut lock, &statistics)?;
            writeln!(lock)?;
        }
    }
    info!(n_events = statistics.len(), "wrote channel statistics");

    Ok(())
}
