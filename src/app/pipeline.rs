//! The reduction pipeline: one capture file in, one calibration entry out.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! read -> aggregate -> per-cell pulse fits -> per-channel line fits ->
//! entry assembly. The CLI front-end (and any future GUI) only handles
//! presentation.

use std::fs::File;
use std::io::{BufRead, BufReader};

use chrono::Local;

use crate::domain::{
    CalibrationEntry, CalibrationTable, CaptureMeta, ChannelCalibration, GROUP_CHANNELS,
    HeightMatrix, ReduceConfig, Waveforms,
};
use crate::error::AppError;
use crate::fit::{aggregate, extract_heights, fit_channel_line};
use crate::io::capture::read_capture_with_progress;
use crate::report;

/// All computed outputs of a single reduction run.
///
/// The intermediates are returned alongside the entry so callers can plot
/// waveforms and height curves without re-running anything.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub meta: CaptureMeta,
    pub waves: Waveforms,
    pub heights: HeightMatrix,
    pub calibrations: Vec<ChannelCalibration>,
    pub entry: CalibrationEntry,
}

/// Execute the full reduction for one capture file.
///
/// `prior` is the board's existing record when this is an update; its
/// tables and audit fields are carried into the new entry, with only this
/// capture's 16-channel slice recomputed.
pub fn run_reduction<F>(
    config: &ReduceConfig,
    prior: Option<&CalibrationEntry>,
    progress: F,
) -> Result<RunOutput, AppError>
where
    F: FnMut(f64),
{
    let file = File::open(&config.capture_path).map_err(|e| {
        AppError::new(
            2,
            format!("Failed to open capture '{}': {e}", config.capture_path.display()),
        )
    })?;
    let source = config
        .capture_path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| config.capture_path.display().to_string());

    reduce_stream(
        BufReader::new(file),
        &source,
        config.user.as_deref(),
        prior,
        progress,
    )
}

/// Execute the reduction on an already-open stream.
///
/// `progress` receives a monotone percentage in `[0, 100]`: roughly half
/// for reading/aggregation and half for the fitting stages. It is purely
/// observational; a no-op closure changes nothing.
pub fn reduce_stream<R, F>(
    input: R,
    source: &str,
    user: Option<&str>,
    prior: Option<&CalibrationEntry>,
    mut progress: F,
) -> Result<RunOutput, AppError>
where
    R: BufRead,
    F: FnMut(f64),
{
    progress(0.0);
    let capture = read_capture_with_progress(input, |f| progress(f * 50.0))?;
    let meta = capture.meta.clone();

    if let Some(prior) = prior {
        if prior.serial != meta.serial {
            log::warn!(
                "prior record serial {} does not match capture serial {}",
                prior.serial,
                meta.serial
            );
        }
    }

    let waves = aggregate(&capture);
    let heights = extract_heights(&waves, |f| progress(50.0 + f * 45.0));

    let mut calibrations = Vec::with_capacity(GROUP_CHANNELS);
    for channel in 0..GROUP_CHANNELS {
        calibrations.push(fit_channel_line(&heights, channel)?);
        progress(95.0 + 4.0 * (channel + 1) as f64 / GROUP_CHANNELS as f64);
    }

    let prior_table = prior
        .map(|p| p.table.clone())
        .unwrap_or_else(CalibrationTable::zeroed);
    let table = prior_table.patched(meta.offset, &calibrations);

    let error_summary = report::error_summary(&heights, meta.offset);

    // The audit trail accumulates: this run's line, then its error list,
    // appended after whatever the prior record carried.
    let timestamp = Local::now().format("%y%m%d-%H:%M:%S").to_string();
    let mut history = report::append_history(
        prior.map(|p| p.history.as_str()).unwrap_or(""),
        &report::history_line(source, user, &timestamp),
    );
    if !error_summary.is_empty() {
        history = report::append_history(&history, &error_summary);
    }

    let entry = CalibrationEntry {
        serial: meta.serial.clone(),
        offset: meta.offset,
        nstep: meta.nstep,
        ntrial: meta.ntrial,
        nsample: meta.nsample,
        table,
        error_summary,
        history,
        comment: prior.map(|p| p.comment.clone()).unwrap_or_default(),
        status: prior.map(|p| p.status.clone()).unwrap_or_else(|| "??".into()),
    };

    progress(100.0);
    Ok(RunOutput {
        meta,
        waves,
        heights,
        calibrations,
        entry,
    })
}
