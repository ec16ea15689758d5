// src/mcp/protocol.rs

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::aggregate::AggregateError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn default_jsonrpc() -> String {
    "2.0".to_string()
}

impl Request {
    pub fn is_notification(&self) -> bool {
        self.id.is_null()
    }

    /// Rewrites a direct tool call (`{"method": "<tool>", "params": {..}}`)
    /// into the equivalent `tools/call` request.
    pub fn into_tool_call(self) -> Request {
        Request {
            jsonrpc: self.jsonrpc,
            id: self.id,
            params: Some(json!({
                "name": self.method,
                "arguments": self.params.unwrap_or_else(|| json!({}))
            })),
            method: "tools/call".to_string(),
        }
    }
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(ErrorObject {
                code,
                message,
                data: None,
            }),
        }
    }

    pub fn error_with_data(id: Value, code: i32, message: String, data: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(ErrorObject {
                code,
                message,
                data: Some(data),
            }),
        }
    }

    /// Error response for a failed aggregation; `data.kind` names the
    /// failure class.
    pub fn aggregate_error(id: Value, err: &AggregateError) -> Self {
        Self::error_with_data(
            id,
            error_codes::for_aggregate_error(err),
            err.to_string(),
            json!({ "kind": err.kind() }),
        )
    }
}

// Standard JSON-RPC error codes, plus server-defined ones in -32000..-32099
pub mod error_codes {
    use crate::aggregate::AggregateError;

    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    /// The SQL text was rejected or failed while running.
    pub const QUERY_REJECTED: i32 = -32001;
    /// The explorer API failed or returned unusable pages.
    pub const UPSTREAM_ERROR: i32 = -32002;
    pub const TIMEOUT: i32 = -32003;

    pub fn for_aggregate_error(err: &AggregateError) -> i32 {
        match err {
            AggregateError::DeniedOperation { .. }
            | AggregateError::Syntax(_)
            | AggregateError::Runtime(_) => QUERY_REJECTED,
            AggregateError::Upstream { .. }
            | AggregateError::MissingReference { .. }
            | AggregateError::MalformedPage { .. } => UPSTREAM_ERROR,
            AggregateError::Timeout(_) => TIMEOUT,
            AggregateError::InvalidArgument(_) | AggregateError::SchemaConflict(_) => INVALID_PARAMS,
            AggregateError::Storage(_) => INTERNAL_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_call_becomes_tool_call() {
        let req: Request = serde_json::from_value(json!({
            "id": 7,
            "method": "get_latest_block",
            "params": {"blockchain": "bitcoin"}
        }))
        .unwrap();
        let wrapped = req.into_tool_call();
        assert_eq!(wrapped.method, "tools/call");
        assert_eq!(wrapped.params.unwrap()["name"], json!("get_latest_block"));
    }

    #[test]
    fn test_aggregate_error_carries_kind() {
        let err = AggregateError::DeniedOperation {
            action: "DROP TABLE data".into(),
        };
        let resp = Response::aggregate_error(json!(1), &err);
        let error = resp.error.unwrap();
        assert_eq!(error.code, error_codes::QUERY_REJECTED);
        assert_eq!(error.data.unwrap()["kind"], json!("denied_operation"));
    }
}
