//! Synthetic capture generation.
//!
//! Produces a byte-exact capture file from a known pulse shape and a
//! pedestal/gain ramp, optionally with seeded Gaussian noise. Used by the
//! `gen` subcommand for bench work and by the test suite for end-to-end
//! runs; everything is deterministic for a fixed seed.

use std::fs;
use std::path::Path;

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{BOARD_CHANNELS, GROUP_CHANNELS};
use crate::error::AppError;
use crate::math::minimize_scalar;
use crate::models::pulse;

/// Nominal pulse shape: unit amplitude, zero pedestal.
const UNIT_SHAPE: [f64; 7] = [1.0, 3.5, 0.66, 0.96, 0.0, 0.56, 2.77];

/// Parameters of one synthetic capture.
#[derive(Debug, Clone)]
pub struct SampleSpec {
    pub serial: String,
    pub offset: usize,
    pub nstep: usize,
    pub ntrial: usize,
    pub nsample: usize,
    /// Target intercept of the height-vs-step ramp (ADC counts).
    pub pedestal: f64,
    /// Target slope of the ramp (ADC counts per step).
    pub gain: f64,
    /// Gaussian noise sigma added per sample; 0 disables noise entirely.
    pub noise: f64,
    pub seed: u64,
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            serial: "0x70".into(),
            offset: 0,
            nstep: 10,
            ntrial: 20,
            nsample: 28,
            pedestal: 1500.0,
            gain: 375.0,
            noise: 0.0,
            seed: 42,
        }
    }
}

/// Render a complete capture file as text.
///
/// Amplitudes are scaled per step so the model's peak lands exactly on
/// `pedestal + gain·step`; sample values are rounded to the ADC grid and
/// clamped below full scale.
pub fn generate_capture_text(spec: &SampleSpec) -> Result<String, AppError> {
    if spec.offset % GROUP_CHANNELS != 0 || spec.offset >= BOARD_CHANNELS {
        return Err(AppError::new(2, "Invalid channel offset for generation."));
    }
    if spec.nstep == 0 || spec.ntrial == 0 || spec.nsample == 0 {
        return Err(AppError::new(2, "Capture geometry must be nonzero."));
    }
    if !(spec.noise.is_finite() && spec.noise >= 0.0) {
        return Err(AppError::new(2, "Invalid noise setting."));
    }
    if !(spec.pedestal.is_finite() && spec.gain.is_finite()) {
        return Err(AppError::new(2, "Invalid pedestal/gain settings."));
    }

    // Peak of the unit shape, so amplitudes can be solved from target heights.
    let x_peak = minimize_scalar(|x| -pulse(x, &UNIT_SHAPE), 5.0)
        .map_err(|e| AppError::new(4, format!("Unit-shape peak search failed: {e}")))?;
    let shape_peak = pulse(x_peak, &UNIT_SHAPE);

    let mut rng = StdRng::seed_from_u64(spec.seed);
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| AppError::new(4, format!("Noise distribution error: {e}")))?;

    let group = spec.offset / GROUP_CHANNELS;
    let words_per_line = GROUP_CHANNELS / 2;
    let filler_line = vec!["00000000"; words_per_line].join(" ");

    let mut out = String::new();
    out.push_str(&format!("BOARD_ID: {}\n", spec.serial));
    out.push_str(&format!("CHANNEL_OFFSET: {}\n", spec.offset));
    out.push_str(&format!("NSTEPS: {}\n", spec.nstep));
    out.push_str(&format!("NTRIALS: {}\n", spec.ntrial));
    out.push_str("NDACS: 1\n");
    out.push_str(&format!("NSAMPLES: {}\n", spec.nsample));
    out.push_str(&"-".repeat(32));
    out.push('\n');

    for step in 0..spec.nstep {
        let amplitude = spec.gain * step as f64 / shape_peak;
        let params = [
            amplitude,
            UNIT_SHAPE[1],
            UNIT_SHAPE[2],
            UNIT_SHAPE[3],
            spec.pedestal,
            UNIT_SHAPE[5],
            UNIT_SHAPE[6],
        ];

        for trial in 0..spec.ntrial {
            out.push_str(&format!("# step {step} trial {trial}\n"));
            out.push_str("----------------\n");

            for _ in 0..group * spec.nsample {
                out.push_str(&filler_line);
                out.push('\n');
            }

            for s in 0..spec.nsample {
                let clean = pulse(s as f64, &params);
                for j in 0..words_per_line {
                    let low = quantize(jitter(clean, spec.noise, &normal, &mut rng));
                    let high = quantize(jitter(clean, spec.noise, &normal, &mut rng));
                    out.push_str(&format!("{:08x}", (u32::from(high) << 16) | u32::from(low)));
                    out.push(if j + 1 == words_per_line { '\n' } else { ' ' });
                }
            }

            for _ in 0..(BOARD_CHANNELS / GROUP_CHANNELS - 1 - group) * spec.nsample {
                out.push_str(&filler_line);
                out.push('\n');
            }

            out.push_str("# end of trial\n");
            out.push_str("----------------\n");
        }
    }

    Ok(out)
}

/// Generate and write a capture file.
pub fn write_capture_file(path: &Path, spec: &SampleSpec) -> Result<(), AppError> {
    let text = generate_capture_text(spec)?;
    fs::write(path, text).map_err(|e| {
        AppError::new(
            2,
            format!("Failed to write capture '{}': {e}", path.display()),
        )
    })
}

fn jitter(clean: f64, noise: f64, normal: &Normal<f64>, rng: &mut StdRng) -> f64 {
    if noise == 0.0 {
        clean
    } else {
        clean + noise * normal.sample(rng)
    }
}

fn quantize(value: f64) -> u16 {
    value.round().clamp(0.0, 16383.0) as u16
}
