//! Worker readiness detection from startup log output.

mod detector;
mod state;

pub use detector::*;
pub use state::*;
