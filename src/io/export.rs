//! Entry JSON read/write and height CSV export.
//!
//! The entry JSON is the "portable" representation of an assembled record:
//! it is what gets handed to the storage layer, and a previously written
//! file can be fed back as the prior record when a board is re-reduced.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::domain::{CalibrationEntry, GROUP_CHANNELS, HeightMatrix};
use crate::error::AppError;

/// Write an assembled entry as pretty JSON.
pub fn write_entry_json(path: &Path, entry: &CalibrationEntry) -> Result<(), AppError> {
    let file = File::create(path).map_err(|e| {
        AppError::new(
            2,
            format!("Failed to create entry JSON '{}': {e}", path.display()),
        )
    })?;
    serde_json::to_writer_pretty(file, entry)
        .map_err(|e| AppError::new(2, format!("Failed to write entry JSON: {e}")))?;
    Ok(())
}

/// Read a previously exported entry (the prior record for an update).
pub fn read_entry_json(path: &Path) -> Result<CalibrationEntry, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::new(
            2,
            format!("Failed to open entry JSON '{}': {e}", path.display()),
        )
    })?;
    let entry: CalibrationEntry = serde_json::from_reader(file)
        .map_err(|e| AppError::new(2, format!("Invalid entry JSON: {e}")))?;
    Ok(entry)
}

/// Write the height matrix as CSV, one row per (channel, step) cell.
///
/// Channels are absolute (offset applied), so files from different groups
/// of the same board concatenate cleanly.
pub fn write_heights_csv(
    path: &Path,
    heights: &HeightMatrix,
    offset: usize,
) -> Result<(), AppError> {
    let mut file = File::create(path).map_err(|e| {
        AppError::new(
            2,
            format!("Failed to create heights CSV '{}': {e}", path.display()),
        )
    })?;

    writeln!(file, "channel,step,height,status_code,status")
        .map_err(|e| AppError::new(2, format!("Failed to write heights CSV header: {e}")))?;

    for channel in 0..GROUP_CHANNELS {
        for step in 0..heights.nstep {
            let status = heights.status(channel, step);
            writeln!(
                file,
                "{},{},{:.4},{},{}",
                offset + channel,
                step,
                heights.height(channel, step),
                status.code(),
                status.message().unwrap_or(""),
            )
            .map_err(|e| AppError::new(2, format!("Failed to write heights CSV row: {e}")))?;
        }
    }

    Ok(())
}
