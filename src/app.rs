//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - runs the reduction pipeline with a terminal progress line
//! - prints the run summary
//! - writes optional exports and debug bundles

use std::io::Write;

use clap::Parser;

use crate::cli::{Cli, Command, GenArgs, ReduceArgs};
use crate::data::sample::SampleSpec;
use crate::domain::ReduceConfig;
use crate::error::AppError;

pub mod pipeline;

/// Entry point for the `pcal` binary.
pub fn run() -> Result<(), AppError> {
    // A local `.env` may carry PCAL_USER; absence is fine.
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Reduce(args) => handle_reduce(args),
        Command::Gen(args) => handle_gen(args),
    }
}

fn handle_reduce(args: ReduceArgs) -> Result<(), AppError> {
    let user = args
        .user
        .clone()
        .or_else(|| std::env::var("PCAL_USER").ok());
    let config = ReduceConfig {
        capture_path: args.capture.clone(),
        user,
    };

    let prior = args
        .prior
        .as_deref()
        .map(crate::io::export::read_entry_json)
        .transpose()?;

    let run = pipeline::run_reduction(&config, prior.as_ref(), |pct| {
        eprint!("\r{pct:5.1}%");
        let _ = std::io::stderr().flush();
    })?;
    eprintln!();

    println!(
        "{}",
        crate::report::format_run_summary(&run.entry, &run.calibrations)
    );

    if let Some(path) = &args.entry_json {
        crate::io::export::write_entry_json(path, &run.entry)?;
        println!("entry JSON: {}", path.display());
    }
    if let Some(path) = &args.heights_csv {
        crate::io::export::write_heights_csv(path, &run.heights, run.meta.offset)?;
        println!("heights CSV: {}", path.display());
    }
    if args.debug {
        let path = crate::debug::write_debug_bundle(&run.meta, &run.waves, &run.heights)?;
        println!("debug bundle: {}", path.display());
    }

    Ok(())
}

fn handle_gen(args: GenArgs) -> Result<(), AppError> {
    let spec = SampleSpec {
        serial: args.serial,
        offset: args.offset,
        nstep: args.nstep,
        ntrial: args.ntrial,
        nsample: args.nsample,
        pedestal: args.pedestal,
        gain: args.gain,
        noise: args.noise,
        seed: args.seed,
    };

    crate::data::sample::write_capture_file(&args.output, &spec)?;
    println!("wrote synthetic capture: {}", args.output.display());
    Ok(())
}
