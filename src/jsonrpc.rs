//! JSON-RPC 2.0 message types exchanged with the language server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Identifier allocated by the caller; echoed back in the response.
    pub id: i64,
    /// The method being invoked.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Builds a request with a caller-supplied id.
    #[must_use]
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification; no response is expected.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: &'static str,
    /// The method being invoked.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Builds a notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 error object, as embedded in a response.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcErrorObject {
    /// The error code.
    pub code: i64,
    /// A human-readable message.
    pub message: String,
    /// Optional structured error data.
    #[serde(default)]
    pub data: Option<Value>,
}

/// A decoded inbound message: a response, a notification, or a
/// server-initiated request.
///
/// The server side of the protocol may in principle issue its own requests
/// (e.g. `window/workDoneProgress/create`); the core does not service any of
/// them and logs-and-drops whatever arrives in that shape.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// A response to a request this client sent.
    Response {
        /// The request id this response answers.
        id: i64,
        /// The outcome: `Ok` for a `result` field, `Err` for an `error` field.
        outcome: Result<Value, JsonRpcErrorObject>,
    },
    /// A notification pushed by the server.
    Notification {
        /// The notification method.
        method: String,
        /// The notification parameters.
        params: Value,
    },
    /// A request issued by the server to the client.
    ServerRequest {
        /// The id the server expects echoed back.
        id: i64,
        /// The requested method.
        method: String,
    },
}

/// Raw shape used only to distinguish which variant a frame decodes to.
#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

impl InboundMessage {
    /// Parses a raw JSON frame into its message shape.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the bytes are not valid JSON.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: RawMessage = serde_json::from_slice(bytes)?;
        Ok(match (raw.id, raw.method) {
            (Some(id), Some(method)) => Self::ServerRequest { id, method },
            (Some(id), None) => Self::Response {
                id,
                outcome: match raw.error {
                    Some(error) => Err(error),
                    None => Ok(raw.result.unwrap_or(Value::Null)),
                },
            },
            (None, Some(method)) => Self::Notification {
                method,
                params: raw.params.unwrap_or(Value::Null),
            },
            (None, None) => Self::Notification {
                method: String::new(),
                params: Value::Null,
            },
        })
    }
}
