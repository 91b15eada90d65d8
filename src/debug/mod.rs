//! Debug bundle writer for inspecting fitted pulse shapes.
//!
//! Writes a timestamped markdown file with, per channel, the height/status
//! row and the fitted model sampled on a fine grid together with its fast
//! and slow decay components. Useful when a board fails calibration and the
//! curve shape itself is in question.

use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::PathBuf;

use chrono::Local;

use crate::domain::{CaptureMeta, GROUP_CHANNELS, HeightMatrix, Waveforms};
use crate::error::AppError;
use crate::fit::fit_pulse;
use crate::models::{pulse, pulse_fast, pulse_slow};

fn io_err(e: std::io::Error) -> AppError {
    AppError::new(4, format!("Failed to write debug bundle: {e}"))
}

/// Write the bundle into `debug/`; returns the created path.
///
/// Channels are re-fitted (unweighted) on the final step's mean waveform;
/// a channel that cannot be fitted gets a note instead of a table.
pub fn write_debug_bundle(
    meta: &CaptureMeta,
    waves: &Waveforms,
    heights: &HeightMatrix,
) -> Result<PathBuf, AppError> {
    let dir = PathBuf::from("debug");
    create_dir_all(&dir).map_err(io_err)?;

    let ts = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("pcal_debug_{}_{ts}.md", meta.serial));
    let mut file = File::create(&path).map_err(io_err)?;

    writeln!(file, "# pcal debug bundle").map_err(io_err)?;
    writeln!(file, "- board: {}", meta.serial).map_err(io_err)?;
    writeln!(
        file,
        "- channels: [{}, {})",
        meta.offset,
        meta.offset + GROUP_CHANNELS
    )
    .map_err(io_err)?;
    writeln!(
        file,
        "- geometry: steps={} trials={} samples={}",
        meta.nstep, meta.ntrial, meta.nsample
    )
    .map_err(io_err)?;

    let step = waves.nstep - 1;
    for channel in 0..GROUP_CHANNELS {
        writeln!(file, "\n## channel {} (pulse {step})", meta.offset + channel).map_err(io_err)?;
        writeln!(
            file,
            "- height: {:.3}  status code: {}",
            heights.height(channel, step),
            heights.status(channel, step).code()
        )
        .map_err(io_err)?;

        match fit_pulse(waves.mean_wave(step, channel), None) {
            Ok(fit) => {
                writeln!(file, "- params: {:?}", fit.params).map_err(io_err)?;
                writeln!(file, "\n| x | model | fast | slow |").map_err(io_err)?;
                writeln!(file, "|---|-------|------|------|").map_err(io_err)?;
                for i in 0..waves.nsample * 2 {
                    let x = i as f64 / 2.0;
                    writeln!(
                        file,
                        "| {x:.1} | {:.2} | {:.2} | {:.2} |",
                        pulse(x, &fit.params),
                        pulse_fast(x, &fit.params),
                        pulse_slow(x, &fit.params)
                    )
                    .map_err(io_err)?;
                }
            }
            Err(e) => {
                writeln!(file, "- unfittable: {e}").map_err(io_err)?;
            }
        }
    }

    Ok(path)
}
