//! Command-line parsing for the calibration reduction tool.
//!
//! The goal of this module is to keep **argument parsing** and **command
//! dispatch** separate from the numerics.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "pcal", version, about = "ADC calibration board waveform reduction")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reduce a raw capture file into pedestal/gain calibrations.
    Reduce(ReduceArgs),
    /// Generate a synthetic capture file with a known ramp (for bench
    /// tests and demos).
    Gen(GenArgs),
}

/// Options for `pcal reduce`.
#[derive(Debug, Parser, Clone)]
pub struct ReduceArgs {
    /// Path to the raw capture file.
    pub capture: PathBuf,

    /// Operator tag for audit fields (defaults to $PCAL_USER).
    #[arg(long)]
    pub user: Option<String>,

    /// Previously exported entry JSON; its other channel groups and audit
    /// fields are carried into the new entry.
    #[arg(long)]
    pub prior: Option<PathBuf>,

    /// Write the assembled entry as JSON (the storage handoff format).
    #[arg(long)]
    pub entry_json: Option<PathBuf>,

    /// Write the pulse-height matrix as CSV.
    #[arg(long)]
    pub heights_csv: Option<PathBuf>,

    /// Write a per-channel fit bundle under debug/.
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

/// Options for `pcal gen`.
#[derive(Debug, Parser, Clone)]
pub struct GenArgs {
    /// Output path for the generated capture.
    pub output: PathBuf,

    /// Board identifier written into the header.
    #[arg(long, default_value = "0x70")]
    pub serial: String,

    /// Channel-group offset (0, 16, 32 or 48).
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Number of calibration steps.
    #[arg(long, default_value_t = 10)]
    pub nstep: usize,

    /// Trials per step.
    #[arg(long, default_value_t = 20)]
    pub ntrial: usize,

    /// Samples per pulse.
    #[arg(long, default_value_t = 28)]
    pub nsample: usize,

    /// Target pedestal of the injected ramp (ADC counts).
    #[arg(long, default_value_t = 1500.0)]
    pub pedestal: f64,

    /// Target gain of the injected ramp (ADC counts per step).
    #[arg(long, default_value_t = 375.0)]
    pub gain: f64,

    /// Gaussian noise sigma per sample (0 = noise-free).
    #[arg(long, default_value_t = 0.0)]
    pub noise: f64,

    /// Seed for the noise generator.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}
