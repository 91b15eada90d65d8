//! Input/output helpers.
//!
//! - raw capture parsing (`capture`)
//! - entry JSON read/write and height CSV export (`export`)

pub mod capture;
pub mod export;

pub use capture::*;
pub use export::*;
