//! Trial-axis aggregation.

use crate::domain::{GROUP_CHANNELS, RawCapture, Waveforms};

/// Collapse the trial axis into per-(step, channel) mean and sigma
/// waveforms.
///
/// Sigma is the population standard deviation (divide by N, not N−1): the
/// trials are the whole population of captures at that step, not a sample
/// from a larger one. Pure function; always succeeds on well-shaped input.
pub fn aggregate(capture: &RawCapture) -> Waveforms {
    let m = &capture.meta;
    let (nstep, ntrial, nsample) = (m.nstep, m.ntrial, m.nsample);

    let mut mean = vec![0.0; nstep * GROUP_CHANNELS * nsample];
    let mut sigma = vec![0.0; nstep * GROUP_CHANNELS * nsample];

    for step in 0..nstep {
        for channel in 0..GROUP_CHANNELS {
            for s in 0..nsample {
                let mut sum = 0.0;
                for trial in 0..ntrial {
                    sum += capture.sample(step, trial, channel, s) as f64;
                }
                let mu = sum / ntrial as f64;

                let mut var = 0.0;
                for trial in 0..ntrial {
                    let d = capture.sample(step, trial, channel, s) as f64 - mu;
                    var += d * d;
                }

                let i = (step * GROUP_CHANNELS + channel) * nsample + s;
                mean[i] = mu;
                sigma[i] = (var / ntrial as f64).sqrt();
            }
        }
    }

    Waveforms {
        nstep,
        nsample,
        mean,
        sigma,
    }
}
