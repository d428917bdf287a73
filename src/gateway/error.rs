//! Gateway-level errors.

use std::time::Duration;

use crate::rpc::RpcError;

/// Failure of a gateway operation.
///
/// Cloneable because an initialization outcome is shared by every caller
/// that joined it. Causes that are not `Clone` are kept as text.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// The worker could not be started, including when the user has no
    /// credential record.
    #[error("Failed to start tool worker: {0}")]
    SpawnFailure(String),

    /// The credential store could not be read.
    #[error("Credential lookup failed: {0}")]
    Credentials(String),

    /// The worker never announced readiness.
    #[error("Tool worker not ready after {}ms", .0.as_millis())]
    ReadinessTimeout(Duration),

    /// The worker reported a fatal startup problem.
    #[error("Tool worker failed during startup: {0}")]
    WorkerStartupFailed(String),

    /// The worker exited before it became ready.
    #[error("Tool worker exited during startup{}", .code.map(|c| format!(" with code {c}")).unwrap_or_default())]
    ProcessExit { code: Option<i32> },

    /// The `initialize` exchange failed.
    #[error("Handshake with tool worker failed: {0}")]
    HandshakeFailure(String),

    /// Another initialization replaced this one before it finished.
    #[error("Initialization superseded by another request")]
    Superseded,

    /// Tools are unavailable because no worker is ready.
    #[error("Tools unavailable: worker is not ready")]
    NotReady,

    /// The gateway has been shut down.
    #[error("Gateway is shut down")]
    ShutDown,

    /// A tool call failed at the transport or protocol level.
    #[error("Tool '{tool}' failed: {source}")]
    Invocation {
        tool: String,
        #[source]
        source: RpcError,
    },

    /// The worker ran the tool and reported an error.
    #[error("Tool '{tool}' reported an error: {message}")]
    ToolReported { tool: String, message: String },
}
