//! JSON-RPC request multiplexing over a single worker channel.

mod error;
mod multiplexer;

pub use error::*;
pub use multiplexer::*;
