//! JSON-RPC 2.0 message types exchanged with the tool worker.
//!
//! Outgoing messages are always serialized as a single compact JSON object.
//! Incoming messages are classified by shape rather than deserialized into a
//! fixed type, because the worker may interleave responses, its own requests
//! and notifications on the same stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC error code for an unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Request sent to the worker that expects a correlated reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Fire-and-forget message without an ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Error object carried in a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Response to a request, in either direction.
///
/// The ID is kept as a raw JSON value: replies whose ID is not an unsigned
/// integer can never match a pending request and are dropped by the
/// multiplexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    /// Build a successful reply to a worker-initiated request.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error reply to a worker-initiated request.
    #[must_use]
    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Correlation ID, if it is a non-negative integer.
    #[must_use]
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.as_u64()
    }
}

/// Message originated by the worker: a request (has an ID) or a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerMessage {
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

/// Classification of one complete line read from a worker stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to one of our requests.
    Response(JsonRpcResponse),
    /// Request or notification sent by the worker.
    Worker(WorkerMessage),
    /// Valid JSON that is not a JSON-RPC message.
    Unexpected(Value),
    /// Free-form log text.
    Log(String),
}

impl Inbound {
    /// Classify a single line of worker output.
    #[must_use]
    pub fn classify(line: &str) -> Self {
        let trimmed = line.trim();
        if !trimmed.starts_with(['{', '[']) {
            return Self::Log(line.to_string());
        }

        let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
            return Self::Log(line.to_string());
        };

        Self::from_value(value)
    }

    /// Route an already-parsed JSON value by message shape.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::Unexpected(value);
        };

        if let Some(method) = object.get("method").and_then(Value::as_str) {
            return Self::Worker(WorkerMessage {
                id: object.get("id").filter(|id| !id.is_null()).cloned(),
                method: method.to_string(),
                params: object.get("params").cloned(),
            });
        }

        let is_response = object.contains_key("id")
            && (object.contains_key("result") || object.contains_key("error"));
        if !is_response {
            return Self::Unexpected(value);
        }

        match serde_json::from_value::<JsonRpcResponse>(value.clone()) {
            Ok(response) => Self::Response(response),
            Err(_) => Self::Unexpected(value),
        }
    }
}

/// Parameters of the `initialize` handshake request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

/// Client identity announced during the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: Value,
}
