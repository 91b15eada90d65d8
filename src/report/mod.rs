//! Reporting utilities: error summaries, audit text, and terminal output.
//!
//! We keep formatting code in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized (important for future snapshot tests)

use crate::domain::{CalibrationEntry, ChannelCalibration, GROUP_CHANNELS, HeightMatrix};

/// Human-readable list of every classified (channel, step) cell, in
/// (channel, step) ascending order, `"; "`-joined. Channels are absolute.
///
/// Empty when nothing was flagged; the storage layer persists the string
/// as-is.
pub fn error_summary(heights: &HeightMatrix, offset: usize) -> String {
    let parts: Vec<String> = heights
        .flagged()
        .into_iter()
        .map(|(channel, step, status)| {
            format!(
                "channel {}, pulse {}: {}",
                offset + channel,
                step,
                status.message().unwrap_or_default()
            )
        })
        .collect();
    parts.join("; ")
}

/// One history line for this reduction.
pub fn history_line(source: &str, user: Option<&str>, timestamp: &str) -> String {
    match user {
        Some(user) => format!("UPDATE: {source} [{timestamp}] <{user}>"),
        None => format!("UPDATE: {source} [{timestamp}]"),
    }
}

/// Append to an accumulating audit field. Prior content is never replaced:
/// repeated reductions build up the trail.
pub fn append_history(prior: &str, addition: &str) -> String {
    if prior.is_empty() {
        addition.to_string()
    } else {
        format!("{prior}, {addition}")
    }
}

/// Format the full run summary (board info + calibration table + flags).
pub fn format_run_summary(entry: &CalibrationEntry, calibrations: &[ChannelCalibration]) -> String {
    let mut out = String::new();

    out.push_str("=== pcal - calibration reduction ===\n");
    out.push_str(&format!("Board: {}\n", entry.serial));
    out.push_str(&format!(
        "Channels: [{}, {})\n",
        entry.offset,
        entry.offset + GROUP_CHANNELS
    ));
    out.push_str(&format!(
        "Geometry: steps={} trials={} samples={}\n",
        entry.nstep, entry.ntrial, entry.nsample
    ));

    out.push_str("\nCalibration (pedestal, gain ± std error):\n");
    for (j, cal) in calibrations.iter().enumerate() {
        out.push_str(&format!(
            "  ch {:>2}  {:>9.3} ± {:<8.3} {:>8.3} ± {:<8.3}\n",
            entry.offset + j,
            cal.pedestal,
            cal.pedestal_err,
            cal.gain,
            cal.gain_err
        ));
    }

    out.push_str("\nFlagged cells:\n");
    if entry.error_summary.is_empty() {
        out.push_str("  none\n");
    } else {
        for part in entry.error_summary.split("; ") {
            out.push_str(&format!("  {part}\n"));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FitStatus;

    #[test]
    fn error_summary_uses_absolute_channels_and_display_text() {
        let nstep = 4;
        let mut status = vec![FitStatus::None; GROUP_CHANNELS * nstep];
        status[0 * nstep + 3] = FitStatus::FitFailed;
        status[2 * nstep + 1] = FitStatus::SigmaTooHigh;
        let m = HeightMatrix::new(nstep, vec![0.0; GROUP_CHANNELS * nstep], status);

        let summary = error_summary(&m, 32);
        assert_eq!(
            summary,
            "channel 32, pulse 3: fit error; channel 34, pulse 1: sigma/mu > 10%"
        );
    }

    #[test]
    fn empty_summary_for_clean_capture() {
        let m = HeightMatrix::new(
            1,
            vec![0.0; GROUP_CHANNELS],
            vec![FitStatus::None; GROUP_CHANNELS],
        );
        assert_eq!(error_summary(&m, 0), "");
    }

    #[test]
    fn history_accumulates() {
        let first = history_line("a.dat", Some("kai"), "260806-10:00:00");
        assert_eq!(first, "UPDATE: a.dat [260806-10:00:00] <kai>");

        let appended = append_history(&first, "UPDATE: b.dat [260807-09:00:00] <kai>");
        assert_eq!(
            appended,
            "UPDATE: a.dat [260806-10:00:00] <kai>, UPDATE: b.dat [260807-09:00:00] <kai>"
        );

        assert_eq!(append_history("", "X"), "X");
    }
}
