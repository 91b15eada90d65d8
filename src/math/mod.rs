//! Numerical utilities: bounded least squares and scalar minimization.

pub mod lm;
pub mod minimize;

pub use lm::*;
pub use minimize::*;
