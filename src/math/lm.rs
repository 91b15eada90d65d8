//! Bounded, weighted nonlinear least squares.
//!
//! In this project we repeatedly fit small parametric models of the form:
//!
//! ```text
//! minimize Σ ((f(x_i, p) - y_i) / sigma_i)^2    subject to  lo ≤ p ≤ hi
//! ```
//!
//! The solver is a Levenberg–Marquardt iteration with box bounds handled by
//! projection, a forward-difference Jacobian, and an SVD step solve.
//!
//! Implementation choices:
//! - The damped normal equations are solved with SVD and a tolerance ladder,
//!   which tolerates the nearly collinear columns the pulse model produces
//!   for some parameter values.
//! - Everything is deterministic: fixed initial guess, fixed damping policy,
//!   no RNG. Re-running a fit on the same data reproduces it bit-for-bit.
//! - The covariance is `(JᵀJ)⁻¹ · s²` with `s²` the reduced residual
//!   variance, matching the convention the calibration record expects for
//!   its standard errors.

use nalgebra::{DMatrix, DVector};

const MAX_ITERS: usize = 200;
/// Relative cost-improvement threshold for convergence.
const FTOL: f64 = 1e-10;
/// Relative step-size threshold for convergence.
const XTOL: f64 = 1e-10;
/// Absolute gradient threshold; catches exact fits, where no improving step
/// exists and the step tests above never run.
const GTOL: f64 = 1e-14;
/// Forward-difference relative step (≈ sqrt of machine epsilon).
const DIFF_STEP: f64 = 1.49e-8;
const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e12;

/// Why a least-squares fit produced no usable result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LsqError {
    /// The supplied uncertainties produce non-finite weights (e.g. a zero
    /// sigma); the fit was not attempted.
    InvalidWeights,
    /// The iteration did not reach a minimum within its budget.
    NoConvergence,
    /// The fit converged but its covariance is singular; the result is
    /// unusable because no uncertainty can be attached to it.
    SingularCovariance,
}

impl std::fmt::Display for LsqError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            LsqError::InvalidWeights => "non-finite fit weights",
            LsqError::NoConvergence => "fit did not converge",
            LsqError::SingularCovariance => "singular fit covariance",
        };
        write!(f, "{text}")
    }
}

impl std::error::Error for LsqError {}

/// A converged fit: parameter vector plus covariance.
#[derive(Debug, Clone)]
pub struct LsqFit {
    pub params: Vec<f64>,
    pub covariance: DMatrix<f64>,
}

impl LsqFit {
    /// Standard errors: square roots of the covariance diagonal.
    pub fn std_errors(&self) -> Vec<f64> {
        (0..self.params.len())
            .map(|i| self.covariance[(i, i)].sqrt())
            .collect()
    }
}

/// Fit `model(x, p)` to `(x, y)` with optional per-sample uncertainties.
///
/// `sigma`, when present, weights each residual by `1 / sigma_i`; any
/// non-finite weight aborts with [`LsqError::InvalidWeights`] before the
/// first iteration so callers can retry unweighted. `p0` is clamped into
/// `[lo, hi]` before the iteration starts.
pub fn curve_fit<F>(
    model: F,
    x: &[f64],
    y: &[f64],
    sigma: Option<&[f64]>,
    p0: &[f64],
    lo: &[f64],
    hi: &[f64],
) -> Result<LsqFit, LsqError>
where
    F: Fn(f64, &[f64]) -> f64,
{
    let n = x.len();
    let npar = p0.len();
    debug_assert_eq!(y.len(), n);
    debug_assert_eq!(lo.len(), npar);
    debug_assert_eq!(hi.len(), npar);

    let weights = match sigma {
        Some(s) => {
            let w: Vec<f64> = s.iter().map(|&si| 1.0 / si).collect();
            if w.iter().any(|v| !v.is_finite()) {
                return Err(LsqError::InvalidWeights);
            }
            Some(w)
        }
        None => None,
    };

    if n < npar {
        return Err(LsqError::NoConvergence);
    }

    let problem = Problem {
        model,
        x,
        y,
        weights,
        lo,
        hi,
    };

    let mut p: Vec<f64> = p0.to_vec();
    problem.clamp(&mut p);

    let mut r = problem.residual(&p).ok_or(LsqError::NoConvergence)?;
    let mut cost = 0.5 * r.norm_squared();
    let mut lambda = LAMBDA_INIT;

    for _ in 0..MAX_ITERS {
        let jac = problem.jacobian(&p).ok_or(LsqError::NoConvergence)?;
        let grad = jac.transpose() * &r;
        if grad.amax() <= GTOL {
            break;
        }
        let normal = jac.transpose() * &jac;

        // Inner damping loop: raise lambda until a step reduces the cost.
        loop {
            let Some(delta) = solve_damped(&normal, &grad, lambda) else {
                lambda *= 10.0;
                if lambda > LAMBDA_MAX {
                    return Err(LsqError::NoConvergence);
                }
                continue;
            };

            let mut p_new: Vec<f64> =
                p.iter().zip(delta.iter()).map(|(pj, dj)| pj + dj).collect();
            problem.clamp(&mut p_new);

            let accepted = problem.residual(&p_new).and_then(|r_new| {
                let cost_new = 0.5 * r_new.norm_squared();
                (cost_new.is_finite() && cost_new < cost).then_some((r_new, cost_new))
            });

            match accepted {
                Some((r_new, cost_new)) => {
                    let step_small = p_new
                        .iter()
                        .zip(p.iter())
                        .all(|(a, b)| (a - b).abs() <= XTOL * (1.0 + b.abs()));
                    let cost_small = (cost - cost_new) <= FTOL * cost_new.max(f64::MIN_POSITIVE);

                    p = p_new;
                    r = r_new;
                    cost = cost_new;
                    lambda = (lambda / 3.0).max(LAMBDA_MIN);

                    if step_small || cost_small {
                        return problem.finish(&p, cost);
                    }
                    break;
                }
                None => {
                    // A rejected step that was already negligible means no
                    // improving direction remains (typically a bound-pinned
                    // optimum): treat the current point as converged.
                    if delta.amax() <= XTOL {
                        return problem.finish(&p, cost);
                    }
                    lambda *= 10.0;
                    if lambda > LAMBDA_MAX {
                        return Err(LsqError::NoConvergence);
                    }
                }
            }
        }
    }

    problem.finish(&p, cost)
}

struct Problem<'a, F> {
    model: F,
    x: &'a [f64],
    y: &'a [f64],
    weights: Option<Vec<f64>>,
    lo: &'a [f64],
    hi: &'a [f64],
}

impl<F> Problem<'_, F>
where
    F: Fn(f64, &[f64]) -> f64,
{
    fn clamp(&self, p: &mut [f64]) {
        for (j, pj) in p.iter_mut().enumerate() {
            *pj = pj.clamp(self.lo[j], self.hi[j]);
        }
    }

    fn weight(&self, i: usize) -> f64 {
        self.weights.as_ref().map_or(1.0, |w| w[i])
    }

    /// Weighted residual vector, or `None` if any entry is non-finite.
    fn residual(&self, p: &[f64]) -> Option<DVector<f64>> {
        let n = self.x.len();
        let mut r = DVector::zeros(n);
        for i in 0..n {
            r[i] = self.weight(i) * ((self.model)(self.x[i], p) - self.y[i]);
        }
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    /// Forward-difference Jacobian of the weighted residuals.
    ///
    /// Steps that would leave the box are flipped; a parameter whose bounds
    /// leave no room to differentiate gets a zero column.
    fn jacobian(&self, p: &[f64]) -> Option<DMatrix<f64>> {
        let n = self.x.len();
        let npar = p.len();

        let mut base = vec![0.0; n];
        for i in 0..n {
            base[i] = self.weight(i) * (self.model)(self.x[i], p);
            if !base[i].is_finite() {
                return None;
            }
        }

        let mut jac = DMatrix::zeros(n, npar);
        let mut p_step = p.to_vec();
        for j in 0..npar {
            let mut h = DIFF_STEP * p[j].abs().max(1.0);
            if p[j] + h > self.hi[j] {
                h = -h;
            }
            if p[j] + h < self.lo[j] {
                continue;
            }

            p_step[j] = p[j] + h;
            for i in 0..n {
                let shifted = self.weight(i) * (self.model)(self.x[i], &p_step);
                let v = (shifted - base[i]) / h;
                if !v.is_finite() {
                    return None;
                }
                jac[(i, j)] = v;
            }
            p_step[j] = p[j];
        }
        Some(jac)
    }

    /// Covariance assembly at the converged parameters.
    fn finish(&self, p: &[f64], cost: f64) -> Result<LsqFit, LsqError> {
        let jac = self.jacobian(p).ok_or(LsqError::SingularCovariance)?;
        let normal = jac.transpose() * &jac;

        let inverse = normal.try_inverse().ok_or(LsqError::SingularCovariance)?;
        if inverse.iter().any(|v| !v.is_finite()) {
            return Err(LsqError::SingularCovariance);
        }

        let n = self.x.len();
        let npar = p.len();
        let dof = n.saturating_sub(npar);
        let s2 = if dof > 0 {
            2.0 * cost / dof as f64
        } else {
            f64::INFINITY
        };

        Ok(LsqFit {
            params: p.to_vec(),
            covariance: inverse * s2,
        })
    }
}

/// Solve `(A + λ·diag(A)) δ = -g` via SVD with a tolerance ladder.
fn solve_damped(normal: &DMatrix<f64>, grad: &DVector<f64>, lambda: f64) -> Option<DVector<f64>> {
    let npar = grad.len();
    let mut damped = normal.clone();
    for j in 0..npar {
        damped[(j, j)] += lambda * normal[(j, j)].max(1e-12);
    }

    let svd = damped.svd(true, true);
    let rhs = -grad.clone();
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(delta) = svd.solve(&rhs, tol) {
            if delta.iter().all(|v| v.is_finite()) {
                return Some(delta);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(x: f64, p: &[f64]) -> f64 {
        p[0] + p[1] * x
    }

    #[test]
    fn recovers_exact_line() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&xi| 2.0 + 3.0 * xi).collect();

        let fit = curve_fit(
            line,
            &x,
            &y,
            None,
            &[1.0, 1.0],
            &[f64::NEG_INFINITY; 2],
            &[f64::INFINITY; 2],
        )
        .unwrap();

        assert!((fit.params[0] - 2.0).abs() < 1e-8);
        assert!((fit.params[1] - 3.0).abs() < 1e-8);
        // Exact data: residual variance ~ 0, so the standard errors vanish.
        for e in fit.std_errors() {
            assert!(e.abs() < 1e-6);
        }
    }

    #[test]
    fn respects_box_bounds() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&xi| 2.0 + 3.0 * xi).collect();

        // Slope capped below the true value: the solution pins the bound.
        let fit = curve_fit(
            line,
            &x,
            &y,
            None,
            &[2.0, 2.0],
            &[f64::NEG_INFINITY, 0.0],
            &[f64::INFINITY, 2.5],
        )
        .unwrap();

        assert!(fit.params[1] <= 2.5 + 1e-12);
    }

    #[test]
    fn zero_sigma_is_rejected_before_fitting() {
        let x = [0.0, 1.0, 2.0];
        let y = [1.0, 2.0, 3.0];
        let sigma = [1.0, 0.0, 1.0];

        let err = curve_fit(
            line,
            &x,
            &y,
            Some(&sigma),
            &[0.0, 0.0],
            &[f64::NEG_INFINITY; 2],
            &[f64::INFINITY; 2],
        )
        .unwrap_err();
        assert_eq!(err, LsqError::InvalidWeights);
    }

    #[test]
    fn exact_initial_guess_converges_immediately() {
        let x: Vec<f64> = (0..8).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&xi| 1500.0 + 375.0 * xi).collect();

        let fit = curve_fit(
            line,
            &x,
            &y,
            None,
            &[1500.0, 375.0],
            &[500.0, 275.0],
            &[2500.0, 475.0],
        )
        .unwrap();

        assert_eq!(fit.params, vec![1500.0, 375.0]);
    }
}
