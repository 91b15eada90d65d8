//! Model evaluation for the pulse shape and the calibration line.

pub mod pulse;

pub use pulse::*;
