//! Single-waveform pulse fitting.
//!
//! One call fits the 7-parameter pulse model to one (step, channel) mean
//! waveform over `x = 0..nsample`, optionally weighted by the per-sample
//! sigma. The caller decides what a failure means; this module only
//! distinguishes the error kinds the extraction policy needs.

use nalgebra::DMatrix;

use crate::math::{LsqError, curve_fit};
use crate::models::{PULSE_PARAMS, pulse};

/// Outcome of fitting one waveform.
///
/// Created per (step, channel) pair and consumed immediately to produce one
/// scalar height; only the classification survives it.
#[derive(Debug, Clone)]
pub struct PulseFit {
    /// `(a, b, c, d, e, f, g)`, as defined by [`crate::models::pulse`].
    pub params: [f64; PULSE_PARAMS],
    /// Parameter covariance; kept for uncertainty inspection, not
    /// propagated further down the pipeline.
    pub covariance: DMatrix<f64>,
}

/// Fit the pulse model to one waveform.
///
/// The initial guess anchors the amplitude at `0.76·max(y)` and the
/// pedestal at `y[0]`; shape parameters start from the nominal pulse of
/// this front-end. Amplitude is bounded by the observed maximum, onset by
/// the first 8 samples, and the mixing fraction to `[0, 1]`.
///
/// `sigma` weighting follows the usual `1/sigma` convention; a zero sigma
/// anywhere yields [`LsqError::InvalidWeights`] without attempting the fit,
/// so the caller can retry unweighted.
pub fn fit_pulse(y: &[f64], sigma: Option<&[f64]>) -> Result<PulseFit, LsqError> {
    let x: Vec<f64> = (0..y.len()).map(|i| i as f64).collect();
    let amax = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let p0 = [0.76 * amax, 3.5, 0.66, 0.96, y[0], 0.56, 2.77];
    let lo = [
        0.0,
        0.0,
        f64::NEG_INFINITY,
        f64::NEG_INFINITY,
        f64::NEG_INFINITY,
        0.0,
        f64::NEG_INFINITY,
    ];
    let hi = [
        amax,
        8.0,
        f64::INFINITY,
        f64::INFINITY,
        f64::INFINITY,
        1.0,
        f64::INFINITY,
    ];

    let fit = curve_fit(pulse, &x, y, sigma, &p0, &lo, &hi)?;

    let mut params = [0.0; PULSE_PARAMS];
    params.copy_from_slice(&fit.params);
    Ok(PulseFit {
        params,
        covariance: fit.covariance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRUE_PARAMS: [f64; PULSE_PARAMS] = [1200.0, 3.5, 0.66, 0.96, 1500.0, 0.56, 2.77];
    const NSAMPLE: usize = 28;

    fn synthetic_waveform() -> Vec<f64> {
        (0..NSAMPLE).map(|i| pulse(i as f64, &TRUE_PARAMS)).collect()
    }

    #[test]
    fn recovers_known_parameters_noise_free() {
        let y = synthetic_waveform();
        let fit = fit_pulse(&y, None).unwrap();

        for (k, (&got, &want)) in fit.params.iter().zip(TRUE_PARAMS.iter()).enumerate() {
            let rel = ((got - want) / want).abs();
            assert!(rel < 1e-3, "param {k}: got {got}, want {want}");
        }
    }

    #[test]
    fn finite_weights_recover_parameters_too() {
        let y = synthetic_waveform();
        let sigma = vec![2.0; NSAMPLE];
        let fit = fit_pulse(&y, Some(&sigma)).unwrap();

        for (&got, &want) in fit.params.iter().zip(TRUE_PARAMS.iter()) {
            assert!(((got - want) / want).abs() < 1e-3);
        }
    }

    #[test]
    fn zero_sigma_reports_invalid_weights() {
        let y = synthetic_waveform();
        let mut sigma = vec![2.0; NSAMPLE];
        sigma[5] = 0.0;

        let err = fit_pulse(&y, Some(&sigma)).unwrap_err();
        assert_eq!(err, LsqError::InvalidWeights);
    }

    #[test]
    fn refitting_is_deterministic() {
        let y = synthetic_waveform();
        let a = fit_pulse(&y, None).unwrap();
        let b = fit_pulse(&y, None).unwrap();
        assert_eq!(a.params, b.params);
    }
}
