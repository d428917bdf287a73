//! Request-level error types.

use std::time::Duration;

/// Why a worker's request channel was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Replaced by a restart or by a worker for another user.
    Superseded,
    /// The worker process exited.
    ProcessExit { code: Option<i32> },
    /// The worker's output stream ended or failed.
    StreamClosed,
}

/// Failure of a single request or notification.
///
/// Cloneable so one failure can be delivered to every caller that shares an
/// outcome.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    /// No reply arrived within the request budget.
    #[error("Request '{method}' timed out after {}ms", .timeout.as_millis())]
    Timeout { method: String, timeout: Duration },

    /// The worker answered with a JSON-RPC error.
    #[error("Worker returned error {code}: {message}")]
    Remote { code: i64, message: String },

    /// The worker was torn down by a restart or a user switch.
    #[error("Request superseded by a worker restart")]
    Superseded,

    /// The worker process exited while the request was outstanding.
    #[error("Worker process exited{}", .code.map(|c| format!(" with code {c}")).unwrap_or_default())]
    ProcessExit { code: Option<i32> },

    /// The worker's output stream closed while the request was outstanding.
    #[error("Worker output stream closed")]
    StreamClosed,

    /// The channel is closed or was never opened.
    #[error("Worker channel unavailable")]
    Unavailable,

    /// Writing the request to the worker failed.
    #[error("Failed to write to worker: {0}")]
    Write(String),

    /// The request could not be encoded.
    #[error("Failed to encode request: {0}")]
    Encode(String),
}

impl From<CloseReason> for RpcError {
    fn from(reason: CloseReason) -> Self {
        match reason {
            CloseReason::Superseded => Self::Superseded,
            CloseReason::ProcessExit { code } => Self::ProcessExit { code },
            CloseReason::StreamClosed => Self::StreamClosed,
        }
    }
}
