//! # Trace to Statistics
//!
//! Channel-level analysis engine for data-quality monitoring of digitized
//! detector waveforms. For each channel of a readout unit and each event it:
//! * estimates the signal-free baseline,
//! * derives a peak-finding threshold using one of four strategies,
//! * finds pulses on a (optionally smoothed) copy of the waveform,
//! * models the signal-free regions and computes noise statistics,
//! * combines adjacent channels into a coherent-noise metric.
//!
//! The surrounding framework hands in [`tpc_dqm_common::RawDigits`] per
//! channel and reads back one [`analysis::ChannelData`] per channel.

pub mod analysis;
pub mod baseline;
pub mod noise;
pub mod parameters;
pub mod peak_finder;
pub mod threshold;

pub type Real = f64;
