//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during reduction
//! - exported to JSON for the storage layer
//! - reloaded later as the "prior" record when a board is re-calibrated

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Channels per capture file (one channel group).
pub const GROUP_CHANNELS: usize = 16;

/// Channels per board (four groups).
pub const BOARD_CHANNELS: usize = 64;

/// ADC full-scale value; a mean pinned here marks a saturated capture.
pub const ADC_FULL_SCALE: f64 = 16384.0;

/// Header metadata of one capture file.
///
/// `ndac` (DAC steps per trial) is parsed and carried but unused downstream;
/// the capture format includes it and dropping it would reject valid headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureMeta {
    /// Board identifier (serial) as written by the DAQ.
    pub serial: String,
    /// Absolute channel offset of this group: 0, 16, 32 or 48.
    pub offset: usize,
    pub nstep: usize,
    pub ntrial: usize,
    pub ndac: usize,
    pub nsample: usize,
    /// Header keys the reader does not interpret, in file order.
    pub extra: Vec<(String, String)>,
}

impl CaptureMeta {
    /// Channel-group index, `offset / 16 ∈ {0,1,2,3}`.
    pub fn group(&self) -> usize {
        self.offset / GROUP_CHANNELS
    }
}

/// One capture file's content: metadata plus the dense sample block,
/// indexed `[step][trial][channel][sample]` with 16 local channel slots.
///
/// Immutable once parsed; which 16 absolute channels the local slots map to
/// is resolved by the orchestrator from `meta.offset`.
#[derive(Debug, Clone)]
pub struct RawCapture {
    pub meta: CaptureMeta,
    samples: Vec<u16>,
}

impl RawCapture {
    pub fn new(meta: CaptureMeta, samples: Vec<u16>) -> Self {
        debug_assert_eq!(
            samples.len(),
            meta.nstep * meta.ntrial * GROUP_CHANNELS * meta.nsample
        );
        Self { meta, samples }
    }

    pub fn sample(&self, step: usize, trial: usize, channel: usize, s: usize) -> u16 {
        let m = &self.meta;
        self.samples[((step * m.ntrial + trial) * GROUP_CHANNELS + channel) * m.nsample + s]
    }
}

/// Trial-aggregated waveforms: per-(step, channel) mean and population sigma,
/// both shaped `[nstep][16][nsample]`. Derived once per capture, read-only
/// thereafter.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveforms {
    pub nstep: usize,
    pub nsample: usize,
    pub mean: Vec<f64>,
    pub sigma: Vec<f64>,
}

impl Waveforms {
    fn base(&self, step: usize, channel: usize) -> usize {
        (step * GROUP_CHANNELS + channel) * self.nsample
    }

    pub fn mean_wave(&self, step: usize, channel: usize) -> &[f64] {
        let i = self.base(step, channel);
        &self.mean[i..i + self.nsample]
    }

    pub fn sigma_wave(&self, step: usize, channel: usize) -> &[f64] {
        let i = self.base(step, channel);
        &self.sigma[i..i + self.nsample]
    }

    /// Relative noise `sigma / mean` for one sample.
    ///
    /// This is +inf where `mean == 0` with nonzero sigma, and NaN at 0/0;
    /// callers must account for both before using the ratio.
    pub fn rel_noise(&self, step: usize, channel: usize, s: usize) -> f64 {
        let i = self.base(step, channel) + s;
        self.sigma[i] / self.mean[i]
    }
}

/// Per-(step, channel) classification outcome of the height extraction.
///
/// A closed enum rather than sentinel integers, so every consumer matches
/// exhaustively; the wire codes below are fixed by the storage contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitStatus {
    #[default]
    None,
    SigmaTooHigh,
    Saturated,
    Zero,
    FitFailed,
}

impl FitStatus {
    /// Small-integer code exposed to callers and storage.
    pub fn code(self) -> u8 {
        match self {
            FitStatus::None => 0,
            FitStatus::SigmaTooHigh => 1,
            FitStatus::Saturated => 2,
            FitStatus::Zero => 3,
            FitStatus::FitFailed => 4,
        }
    }

    /// Display text for the error summary; `None` cells have no message.
    pub fn message(self) -> Option<&'static str> {
        match self {
            FitStatus::None => None,
            FitStatus::SigmaTooHigh => Some("sigma/mu > 10%"),
            FitStatus::Saturated => Some("pulse saturated"),
            FitStatus::Zero => Some("ADC value at 0"),
            FitStatus::FitFailed => Some("fit error"),
        }
    }
}

/// Pulse heights and their classification, shaped `[channel][step]`.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightMatrix {
    pub nstep: usize,
    heights: Vec<f64>,
    status: Vec<FitStatus>,
}

impl HeightMatrix {
    pub fn new(nstep: usize, heights: Vec<f64>, status: Vec<FitStatus>) -> Self {
        debug_assert_eq!(heights.len(), GROUP_CHANNELS * nstep);
        debug_assert_eq!(status.len(), GROUP_CHANNELS * nstep);
        Self {
            nstep,
            heights,
            status,
        }
    }

    pub fn height(&self, channel: usize, step: usize) -> f64 {
        self.heights[channel * self.nstep + step]
    }

    pub fn status(&self, channel: usize, step: usize) -> FitStatus {
        self.status[channel * self.nstep + step]
    }

    /// All non-`None` cells in (channel, step) ascending order.
    pub fn flagged(&self) -> Vec<(usize, usize, FitStatus)> {
        let mut out = Vec::new();
        for channel in 0..GROUP_CHANNELS {
            for step in 0..self.nstep {
                let st = self.status(channel, step);
                if st != FitStatus::None {
                    out.push((channel, step, st));
                }
            }
        }
        out
    }
}

/// One channel's linear calibration: intercept (pedestal) and slope (gain)
/// of pulse height vs. step, with standard errors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelCalibration {
    pub pedestal: f64,
    pub gain: f64,
    pub pedestal_err: f64,
    pub gain_err: f64,
}

/// Board-wide calibration tables: 64 rows of `[value, error]` for pedestals
/// and gains. A capture only determines 16 of these rows; the rest carry
/// whatever the prior record held (zero on first insert).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    pub pedes: Vec<[f64; 2]>,
    pub gains: Vec<[f64; 2]>,
}

impl CalibrationTable {
    pub fn zeroed() -> Self {
        Self {
            pedes: vec![[0.0; 2]; BOARD_CHANNELS],
            gains: vec![[0.0; 2]; BOARD_CHANNELS],
        }
    }

    /// Return a copy with only the 16-row slice at `offset` overwritten.
    ///
    /// An explicit patch operation: the prior table is never mutated, and no
    /// row outside `[offset, offset + 16)` changes.
    pub fn patched(&self, offset: usize, group: &[ChannelCalibration]) -> Self {
        debug_assert_eq!(group.len(), GROUP_CHANNELS);
        let mut out = self.clone();
        for (j, cal) in group.iter().enumerate() {
            out.pedes[offset + j] = [cal.pedestal, cal.pedestal_err];
            out.gains[offset + j] = [cal.gain, cal.gain_err];
        }
        out
    }
}

/// The assembled record handed to the storage collaborator.
///
/// Free-text audit fields accumulate: `history` is appended to the prior
/// record's history rather than replacing it, so repeated reductions leave
/// an audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub serial: String,
    pub offset: usize,
    pub nstep: usize,
    pub ntrial: usize,
    pub nsample: usize,
    pub table: CalibrationTable,
    pub error_summary: String,
    pub history: String,
    pub comment: String,
    pub status: String,
}

impl CalibrationEntry {
    /// Flatten the entry into the `(column, value)` pairs the storage layer
    /// inserts or updates; array columns are serialized as JSON.
    pub fn field_map(&self) -> Vec<(String, String)> {
        let json = |v: &Vec<[f64; 2]>| serde_json::to_string(v).unwrap_or_default();
        vec![
            ("serial".into(), self.serial.clone()),
            ("offset".into(), self.offset.to_string()),
            ("nsteps".into(), self.nstep.to_string()),
            ("ntrials".into(), self.ntrial.to_string()),
            ("nsamples".into(), self.nsample.to_string()),
            ("pedes".into(), json(&self.table.pedes)),
            ("gains".into(), json(&self.table.gains)),
            ("errors".into(), self.error_summary.clone()),
            ("history".into(), self.history.clone()),
            ("comment".into(), self.comment.clone()),
            ("status".into(), self.status.clone()),
        ]
    }
}

/// One reduction run's configuration, derived from CLI flags plus defaults.
#[derive(Debug, Clone)]
pub struct ReduceConfig {
    pub capture_path: PathBuf,
    /// Operator tag appended to audit fields (from `--user` or `PCAL_USER`).
    pub user: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(FitStatus::None.code(), 0);
        assert_eq!(FitStatus::SigmaTooHigh.code(), 1);
        assert_eq!(FitStatus::Saturated.code(), 2);
        assert_eq!(FitStatus::Zero.code(), 3);
        assert_eq!(FitStatus::FitFailed.code(), 4);
    }

    #[test]
    fn status_messages_match_storage_contract() {
        assert_eq!(FitStatus::None.message(), None);
        assert_eq!(FitStatus::SigmaTooHigh.message(), Some("sigma/mu > 10%"));
        assert_eq!(FitStatus::Saturated.message(), Some("pulse saturated"));
        assert_eq!(FitStatus::Zero.message(), Some("ADC value at 0"));
        assert_eq!(FitStatus::FitFailed.message(), Some("fit error"));
    }

    #[test]
    fn patch_only_touches_own_group() {
        let mut prior = CalibrationTable::zeroed();
        prior.pedes[0] = [1400.0, 1.0];
        prior.gains[63] = [410.0, 2.0];

        let group = vec![
            ChannelCalibration {
                pedestal: 1500.0,
                gain: 375.0,
                pedestal_err: 0.5,
                gain_err: 0.1,
            };
            GROUP_CHANNELS
        ];
        let patched = prior.patched(16, &group);

        // Other groups keep their prior values.
        assert_eq!(patched.pedes[0], [1400.0, 1.0]);
        assert_eq!(patched.gains[63], [410.0, 2.0]);
        // This group is overwritten.
        for j in 16..32 {
            assert_eq!(patched.pedes[j], [1500.0, 0.5]);
            assert_eq!(patched.gains[j], [375.0, 0.1]);
        }
        // The input table is untouched.
        assert_eq!(prior.pedes[16], [0.0, 0.0]);
    }

    #[test]
    fn flagged_is_sorted_by_channel_then_step() {
        let nstep = 3;
        let mut status = vec![FitStatus::None; GROUP_CHANNELS * nstep];
        status[5 * nstep + 2] = FitStatus::FitFailed;
        status[1 * nstep + 1] = FitStatus::Zero;
        status[1 * nstep + 0] = FitStatus::Saturated;
        let m = HeightMatrix::new(nstep, vec![0.0; GROUP_CHANNELS * nstep], status);

        let flagged = m.flagged();
        assert_eq!(
            flagged,
            vec![
                (1, 0, FitStatus::Saturated),
                (1, 1, FitStatus::Zero),
                (5, 2, FitStatus::FitFailed),
            ]
        );
    }
}
