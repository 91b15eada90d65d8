//! Waveform reduction stages.
//!
//! Responsibilities:
//!
//! - collapse the trial axis to mean/sigma waveforms (`aggregate`)
//! - fit the pulse model to one waveform (`pulse`)
//! - classify and extract pulse heights for the full grid (`heights`)
//! - fit the per-channel calibration line (`linear`)

pub mod aggregate;
pub mod heights;
pub mod linear;
pub mod pulse;

pub use aggregate::*;
pub use heights::*;
pub use linear::*;
pub use pulse::*;
