//! Worker lifecycle and the public tool-calling surface.

mod dispatcher;
mod error;
mod state;
mod supervisor;

pub use dispatcher::*;
pub use error::*;
pub use state::*;
pub use supervisor::*;
