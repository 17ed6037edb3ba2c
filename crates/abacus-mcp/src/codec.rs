//! Encoding and decoding of protocol messages.
//!
//! Decoding is strict: anything that is not a well-formed message of the
//! expected shape becomes [`McpError::Protocol`], never a default value.

use std::collections::HashSet;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{McpError, Result};
use crate::protocol::{
    CallOutcome, CallToolParams, CorrelationId, JSONRPC_VERSION, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, ToolCallRequest, ToolDefinition,
};

/// A message sent from client to server.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// Expects a response.
    Request(JsonRpcRequest),
    /// Fire-and-forget.
    Notification(JsonRpcNotification),
}

/// Serialize any protocol message to a frame payload.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

fn parse_object(payload: &[u8]) -> Result<serde_json::Map<String, Value>> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| McpError::protocol(format!("invalid JSON: {}", e)))?;

    let Value::Object(object) = value else {
        return Err(McpError::protocol("message is not a JSON object"));
    };

    match object.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => Ok(object),
        Some(other) => Err(McpError::protocol(format!(
            "unsupported jsonrpc version '{}'",
            other
        ))),
        None => Err(McpError::protocol("missing jsonrpc version")),
    }
}

fn from_object<T: DeserializeOwned>(
    object: serde_json::Map<String, Value>,
    what: &str,
) -> Result<T> {
    serde_json::from_value(Value::Object(object))
        .map_err(|e| McpError::protocol(format!("malformed {}: {}", what, e)))
}

/// Decode a frame received by a server.
pub fn decode_client_message(payload: &[u8]) -> Result<ClientMessage> {
    let object = parse_object(payload)?;

    if !object.contains_key("method") {
        return Err(McpError::protocol("message has no method"));
    }

    if object.contains_key("id") {
        Ok(ClientMessage::Request(from_object(object, "request")?))
    } else {
        Ok(ClientMessage::Notification(from_object(
            object,
            "notification",
        )?))
    }
}

/// Best-effort recovery of a request id from an undecodable frame, so the
/// server can still address its error response.
pub fn peek_request_id(payload: &[u8]) -> Option<CorrelationId> {
    let value: Value = serde_json::from_slice(payload).ok()?;
    value
        .get("id")
        .and_then(Value::as_str)
        .map(CorrelationId::from)
}

/// Decode a frame received by a client.
///
/// A response must carry exactly one of `result` and `error`.
pub fn decode_response(payload: &[u8]) -> Result<JsonRpcResponse> {
    let object = parse_object(payload)?;

    if object.contains_key("method") {
        return Err(McpError::protocol(
            "server-initiated messages are not supported",
        ));
    }

    let response: JsonRpcResponse = from_object(object, "response")?;
    match (&response.result, &response.error) {
        (Some(_), None) | (None, Some(_)) => Ok(response),
        (Some(_), Some(_)) => Err(McpError::protocol(
            "response carries both result and error",
        )),
        (None, None) => Err(McpError::protocol(
            "response carries neither result nor error",
        )),
    }
}

/// Decode a discovery result, rejecting duplicate tool names.
pub fn decode_tools(result: Value) -> Result<Vec<ToolDefinition>> {
    let list: ListToolsResult = serde_json::from_value(result)
        .map_err(|e| McpError::protocol(format!("malformed discovery response: {}", e)))?;

    let mut seen = HashSet::new();
    for tool in &list.tools {
        if !seen.insert(tool.name.as_str()) {
            return Err(McpError::protocol(format!(
                "server advertised tool '{}' more than once",
                tool.name
            )));
        }
    }

    Ok(list.tools)
}

/// Decode a call result payload.
pub fn decode_call_outcome(result: Value) -> Result<CallOutcome> {
    serde_json::from_value(result)
        .map_err(|e| McpError::protocol(format!("malformed call response: {}", e)))
}

/// Extract the call carried by a `tools/call` request.
pub fn decode_call_request(request: &JsonRpcRequest) -> Result<ToolCallRequest> {
    let params = request
        .params
        .clone()
        .ok_or_else(|| McpError::protocol("tools/call requires params"))?;
    let params: CallToolParams = serde_json::from_value(params)
        .map_err(|e| McpError::protocol(format!("malformed tools/call params: {}", e)))?;

    Ok(ToolCallRequest {
        correlation_id: request.id.clone(),
        tool_name: params.name,
        arguments: params.arguments,
    })
}
