//! Tool worker process spawning and control.

mod launcher;
mod process;

pub use launcher::*;
pub use process::*;
