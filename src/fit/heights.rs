//! Pulse-height extraction over the full (step, channel) grid.
//!
//! For every cell this stage either classifies the cell away (noise,
//! saturation, dead ADC), or fits the pulse model and reads the fitted
//! curve's peak. Classified cells keep a zero height and never abort the
//! run; every non-`None` status is retrievable with its coordinates for the
//! summary report.
//!
//! Cells are independent, so each channel's steps are fitted on rayon
//! workers; results are assembled in (channel, step) order regardless of
//! execution order, keeping the output deterministic.

use rayon::prelude::*;

use crate::domain::{ADC_FULL_SCALE, FitStatus, GROUP_CHANNELS, HeightMatrix, Waveforms};
use crate::fit::pulse::fit_pulse;
use crate::math::{LsqError, minimize_scalar};
use crate::models::pulse;

/// Maximum tolerated `sigma/mean` before a cell is skipped.
pub const REL_NOISE_LIMIT: f64 = 0.10;
/// Starting point of the peak search, a few samples past the nominal onset.
const PEAK_SEARCH_START: f64 = 5.0;

/// Extract heights and statuses for all 16 × nstep cells.
///
/// `progress` receives the fraction of channels completed in `(0, 1]`.
pub fn extract_heights<F>(waves: &Waveforms, mut progress: F) -> HeightMatrix
where
    F: FnMut(f64),
{
    let nstep = waves.nstep;

    // The saturation and dead-ADC pre-checks scan the WHOLE capture, not
    // the cell under test. This breadth is load-bearing: narrowing it to
    // the current cell changes which cells short-circuit and therefore the
    // published calibrations. Do not "fix" without revalidating boards.
    let sigma_zero = waves.sigma.iter().any(|&s| s == 0.0);
    let mean_full = waves.mean.iter().any(|&m| m == ADC_FULL_SCALE);
    let mean_zero = waves.mean.iter().any(|&m| m == 0.0);

    let mut heights = vec![0.0; GROUP_CHANNELS * nstep];
    let mut status = vec![FitStatus::None; GROUP_CHANNELS * nstep];

    for channel in 0..GROUP_CHANNELS {
        let cells: Vec<(f64, FitStatus)> = (0..nstep)
            .into_par_iter()
            .map(|step| extract_cell(waves, step, channel, sigma_zero, mean_full, mean_zero))
            .collect();

        for (step, (height, st)) in cells.into_iter().enumerate() {
            heights[channel * nstep + step] = height;
            status[channel * nstep + step] = st;
        }
        progress((channel + 1) as f64 / GROUP_CHANNELS as f64);
    }

    HeightMatrix::new(nstep, heights, status)
}

/// Classify one cell, or fit it and locate the pulse peak.
fn extract_cell(
    waves: &Waveforms,
    step: usize,
    channel: usize,
    sigma_zero: bool,
    mean_full: bool,
    mean_zero: bool,
) -> (f64, FitStatus) {
    // Gate order is part of the contract: a cell that is both noisy and
    // saturated classifies as SigmaTooHigh.
    //
    // NaN ratios (0/0) do not trigger the noise gate; +inf from a nonzero
    // sigma over a zero mean does.
    let noisy = (0..waves.nsample)
        .any(|s| waves.rel_noise(step, channel, s).abs() > REL_NOISE_LIMIT);
    if noisy {
        return (0.0, FitStatus::SigmaTooHigh);
    }
    if sigma_zero && mean_full {
        return (0.0, FitStatus::Saturated);
    }
    if sigma_zero && mean_zero {
        return (0.0, FitStatus::Zero);
    }

    let mean = waves.mean_wave(step, channel);
    let sigma = waves.sigma_wave(step, channel);

    // Weighted fit first; if the weights are unusable, retry unweighted
    // once. Anything else that goes wrong marks the cell FitFailed.
    let fit = match fit_pulse(mean, Some(sigma)) {
        Ok(fit) => fit,
        Err(LsqError::InvalidWeights) => match fit_pulse(mean, None) {
            Ok(fit) => fit,
            Err(_) => return (0.0, FitStatus::FitFailed),
        },
        Err(_) => return (0.0, FitStatus::FitFailed),
    };

    // The pulse height is the model's maximum: minimize the negated model.
    // A failure here is ignorable by contract: the height stays 0 with no
    // status recorded; keep it visible in the debug log only.
    match minimize_scalar(|x| -pulse(x, &fit.params), PEAK_SEARCH_START) {
        Ok(x_peak) => (pulse(x_peak, &fit.params), FitStatus::None),
        Err(e) => {
            log::debug!("peak search failed for channel {channel}, step {step}: {e}");
            (0.0, FitStatus::None)
        }
    }
}
