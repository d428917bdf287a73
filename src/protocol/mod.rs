//! Newline-delimited JSON-RPC 2.0 framing and message types.

mod codec;
mod messages;

pub use codec::*;
pub use messages::*;
