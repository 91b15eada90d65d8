//! Per-channel calibration line fit.
//!
//! Pulse height is linear in the injection step; the intercept is the
//! channel's pedestal and the slope its gain. Steps 0 and 1 are warm-up /
//! settling steps and never enter the fit.

use crate::domain::{ChannelCalibration, HeightMatrix};
use crate::error::AppError;
use crate::math::curve_fit;
use crate::models::line;

/// Steps excluded from the start of every sweep.
pub const WARMUP_STEPS: usize = 2;

/// Plausible pedestal range (ADC counts) for this front-end.
pub const PEDESTAL_BOUNDS: (f64, f64) = (500.0, 2500.0);
/// Plausible gain range (ADC counts per step).
pub const GAIN_BOUNDS: (f64, f64) = (275.0, 475.0);
/// Nominal (pedestal, gain) starting point.
pub const LINE_GUESS: (f64, f64) = (1500.0, 375.0);

/// Fit `height vs. step` for one channel.
///
/// A zero height marks a step skipped upstream by the classification, so
/// when more than one nonzero height remains in the window only those are
/// fitted; otherwise the full window is used as a last resort.
///
/// Failures here are hard: there is no fallback below the linear stage, so
/// the caller aborts the channel group rather than persisting a record with
/// a hole in it.
pub fn fit_channel_line(
    heights: &HeightMatrix,
    channel: usize,
) -> Result<ChannelCalibration, AppError> {
    let window: Vec<(f64, f64)> = (WARMUP_STEPS..heights.nstep)
        .map(|step| (step as f64, heights.height(channel, step)))
        .collect();

    let nonzero: Vec<(f64, f64)> = window.iter().copied().filter(|&(_, h)| h != 0.0).collect();
    let points = if nonzero.len() > 1 { nonzero } else { window };

    if points.len() < 2 {
        return Err(AppError::new(
            4,
            format!("channel {channel}: fewer than 2 calibration points"),
        ));
    }

    let xs: Vec<f64> = points.iter().map(|&(x, _)| x).collect();
    let ys: Vec<f64> = points.iter().map(|&(_, y)| y).collect();

    let fit = curve_fit(
        line,
        &xs,
        &ys,
        None,
        &[LINE_GUESS.0, LINE_GUESS.1],
        &[PEDESTAL_BOUNDS.0, GAIN_BOUNDS.0],
        &[PEDESTAL_BOUNDS.1, GAIN_BOUNDS.1],
    )
    .map_err(|e| AppError::new(4, format!("channel {channel}: {e}")))?;

    let errs = fit.std_errors();
    Ok(ChannelCalibration {
        pedestal: fit.params[0],
        gain: fit.params[1],
        pedestal_err: errs[0],
        gain_err: errs[1],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitStatus, GROUP_CHANNELS};

    fn matrix_with_channel0(nstep: usize, heights0: &[f64]) -> HeightMatrix {
        let mut heights = vec![0.0; GROUP_CHANNELS * nstep];
        heights[..nstep].copy_from_slice(heights0);
        HeightMatrix::new(nstep, heights, vec![FitStatus::None; GROUP_CHANNELS * nstep])
    }

    #[test]
    fn recovers_exact_ramp() {
        let nstep = 10;
        let heights0: Vec<f64> = (0..nstep).map(|i| 1500.0 + 375.0 * i as f64).collect();
        let m = matrix_with_channel0(nstep, &heights0);

        let cal = fit_channel_line(&m, 0).unwrap();
        assert!((cal.pedestal - 1500.0).abs() < 1e-6);
        assert!((cal.gain - 375.0).abs() < 1e-6);
        assert!(cal.pedestal_err.abs() < 1e-6);
        assert!(cal.gain_err.abs() < 1e-6);
    }

    #[test]
    fn skips_zero_heights_when_enough_remain() {
        let nstep = 10;
        let mut heights0: Vec<f64> = (0..nstep).map(|i| 1500.0 + 375.0 * i as f64).collect();
        // Steps 4 and 7 were classified away upstream.
        heights0[4] = 0.0;
        heights0[7] = 0.0;
        let m = matrix_with_channel0(nstep, &heights0);

        let cal = fit_channel_line(&m, 0).unwrap();
        assert!((cal.pedestal - 1500.0).abs() < 1e-6);
        assert!((cal.gain - 375.0).abs() < 1e-6);
    }

    #[test]
    fn warmup_steps_are_ignored() {
        let nstep = 8;
        let mut heights0: Vec<f64> = (0..nstep).map(|i| 1500.0 + 375.0 * i as f64).collect();
        // Garbage in the warm-up steps must not affect the fit.
        heights0[0] = 9999.0;
        heights0[1] = -9999.0;
        let m = matrix_with_channel0(nstep, &heights0);

        let cal = fit_channel_line(&m, 0).unwrap();
        assert!((cal.pedestal - 1500.0).abs() < 1e-6);
        assert!((cal.gain - 375.0).abs() < 1e-6);
    }

    #[test]
    fn too_few_points_is_a_hard_error() {
        // Three steps leave a single point after the warm-up exclusion.
        let m = matrix_with_channel0(3, &[1500.0, 1875.0, 2250.0]);
        let err = fit_channel_line(&m, 0).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }
}
