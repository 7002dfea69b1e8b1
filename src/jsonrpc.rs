//! JSON-RPC 2.0 message model for the MCP stdio transport.
//!
//! Outbound messages are built as [`serde_json::Value`]s so they can be
//! written verbatim to the transcript; inbound lines are classified by
//! [`parse_inbound_line`] into requests, notifications, and responses.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{AppError, Result};

/// Protocol version string carried in every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard error code for an unsupported method.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Request identifier. MCP allows integers and strings; never null.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id (what this tool always sends).
    Number(i64),
    /// String id.
    String(String),
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

/// The `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i64,
    /// Short description.
    pub message: String,
    /// Optional server-defined detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A response received from the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcResponse {
    /// Id of the request being answered; `None` when the server answered
    /// with `"id": null` (parse errors).
    pub id: Option<RequestId>,
    /// `result` member, when present (may be JSON `null`).
    pub result: Option<Value>,
    /// `error` member, when present.
    pub error: Option<JsonRpcError>,
    /// The message exactly as received.
    pub raw: Value,
}

impl JsonRpcResponse {
    /// Whether the server answered with an error object.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A notification received from the server (no id, no reply expected).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcNotification {
    /// Notification method, e.g. `notifications/message`.
    pub method: String,
    /// Params, when present.
    pub params: Option<Value>,
}

/// A request sent by the server to the client (e.g. `ping`, `roots/list`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcRequest {
    /// Id that the reply must echo.
    pub id: RequestId,
    /// Request method.
    pub method: String,
    /// Params, when present.
    pub params: Option<Value>,
}

/// One classified message from the server's stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Answer to one of our requests.
    Response(JsonRpcResponse),
    /// Server-originated notification.
    Notification(JsonRpcNotification),
    /// Server-originated request awaiting our reply.
    Request(JsonRpcRequest),
}

/// Parse a single stdout line into an [`InboundMessage`].
///
/// # Return value
///
/// - `Ok(Some(message))`: a well-formed JSON-RPC 2.0 message.
/// - `Ok(None)`: the line is empty or whitespace.
/// - `Err(AppError::Protocol(..))`: the line is not JSON, not an object,
///   lacks `"jsonrpc": "2.0"`, or matches no JSON-RPC message shape.
///
/// # Errors
///
/// See above; every error is a protocol violation by the server.
pub fn parse_inbound_line(line: &str) -> Result<Option<InboundMessage>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;

    classify(value).map(Some)
}

fn classify(value: Value) -> Result<InboundMessage> {
    let Value::Object(map) = &value else {
        return Err(AppError::Protocol(
            "expected a JSON object (batches are not supported)".into(),
        ));
    };

    match map.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        Some(other) => {
            return Err(AppError::Protocol(format!(
                "unsupported jsonrpc version `{other}`"
            )))
        }
        None => return Err(AppError::Protocol("missing `jsonrpc` member".into())),
    }

    if let Some(method) = map.get("method") {
        let method = method
            .as_str()
            .ok_or_else(|| AppError::Protocol("`method` must be a string".into()))?
            .to_owned();
        let params = map.get("params").cloned();

        return match map.get("id") {
            None => Ok(InboundMessage::Notification(JsonRpcNotification {
                method,
                params,
            })),
            Some(id) => Ok(InboundMessage::Request(JsonRpcRequest {
                id: parse_id(id)?.ok_or_else(|| {
                    AppError::Protocol(format!("request `{method}` has a null id"))
                })?,
                method,
                params,
            })),
        };
    }

    let has_result = map.contains_key("result");
    let error = match map.get("error") {
        Some(raw) => Some(
            serde_json::from_value::<JsonRpcError>(raw.clone())
                .map_err(|e| AppError::Protocol(format!("malformed error object: {e}")))?,
        ),
        None => None,
    };

    if has_result == error.is_some() {
        return Err(AppError::Protocol(
            "response must carry exactly one of `result` and `error`".into(),
        ));
    }

    let id = match map.get("id") {
        Some(raw) => parse_id(raw)?,
        None => return Err(AppError::Protocol("response is missing `id`".into())),
    };

    Ok(InboundMessage::Response(JsonRpcResponse {
        id,
        result: map.get("result").cloned(),
        error,
        raw: value.clone(),
    }))
}

fn parse_id(raw: &Value) -> Result<Option<RequestId>> {
    match raw {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .map(|n| Some(RequestId::Number(n)))
            .ok_or_else(|| AppError::Protocol(format!("non-integer id {n}"))),
        Value::String(s) => Ok(Some(RequestId::String(s.clone()))),
        other => Err(AppError::Protocol(format!("invalid id {other}"))),
    }
}

// ── Outbound builders ───────────────────────────────────────────────────────

/// Build a request message. `params` is omitted when `None`.
#[must_use]
pub fn request(id: &RequestId, method: &str, params: Option<Value>) -> Value {
    let mut msg = Map::new();
    msg.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
    msg.insert("id".into(), json!(id));
    msg.insert("method".into(), Value::from(method));
    if let Some(params) = params {
        msg.insert("params".into(), params);
    }
    Value::Object(msg)
}

/// Build a notification message. `params` is omitted when `None`.
#[must_use]
pub fn notification(method: &str, params: Option<Value>) -> Value {
    let mut msg = Map::new();
    msg.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
    msg.insert("method".into(), Value::from(method));
    if let Some(params) = params {
        msg.insert("params".into(), params);
    }
    Value::Object(msg)
}

/// Build a successful reply to a server-originated request.
#[must_use]
pub fn result_response(id: &RequestId, result: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result })
}

/// Build an error reply to a server-originated request.
#[must_use]
pub fn error_response(id: &RequestId, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": { "code": code, "message": message }
    })
}
