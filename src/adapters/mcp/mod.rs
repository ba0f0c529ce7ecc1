mod error_contract;
mod http;
mod rpc;
mod sse;
mod stdio;
mod transport;

use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::dispatch::ToolDispatcher;

use error_contract::domain_error_response;
use rpc::{RpcEnvelope, RpcRequest, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND};

pub use http::{router, serve_http};
pub use stdio::{serve_io, serve_stdio};

pub const SERVER_NAME: &str = "opensearch-mcp-server";
const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";
const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024; // 10 MiB

/// Transport-independent JSON-RPC handling over a fixed tool set.
#[derive(Clone)]
pub struct McpHandler {
    dispatcher: Arc<ToolDispatcher>,
}

impl McpHandler {
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Handles one decoded message or batch. `None` means nothing is sent
    /// back (notifications, or a batch made only of notifications).
    pub async fn handle_value(&self, message: Value) -> Option<Value> {
        match message {
            Value::Array(batch) if batch.is_empty() => Some(
                RpcEnvelope::rpc_error(Value::Null, INVALID_REQUEST, "empty batch").to_value(),
            ),
            Value::Array(batch) => {
                let mut replies = Vec::new();
                for item in batch {
                    if let Some(reply) = self.handle_single(item).await {
                        replies.push(reply);
                    }
                }
                (!replies.is_empty()).then_some(Value::Array(replies))
            }
            single => self.handle_single(single).await,
        }
    }

    async fn handle_single(&self, message: Value) -> Option<Value> {
        let request: RpcRequest = match serde_json::from_value(message) {
            Ok(request) => request,
            Err(e) => {
                return Some(
                    RpcEnvelope::rpc_error(
                        Value::Null,
                        INVALID_REQUEST,
                        format!("invalid request: {}", e),
                    )
                    .to_value(),
                )
            }
        };
        self.handle_request(&request)
            .await
            .map(|envelope| envelope.to_value())
    }

    async fn handle_request(&self, request: &RpcRequest) -> Option<RpcEnvelope> {
        let id = request.response_id();
        let params = request.params.clone().unwrap_or(Value::Null);

        let envelope = match request.method.as_str() {
            "initialize" => RpcEnvelope::success(
                id,
                json!({
                    "protocolVersion": initialize_protocol_version(request.params.as_ref()),
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": {
                        "name": SERVER_NAME,
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            ),
            "ping" => RpcEnvelope::success(id, json!({})),
            "notifications/initialized" | "initialized" => RpcEnvelope::success(id, Value::Null),
            "shutdown" | "exit" => RpcEnvelope::success(id, Value::Null),
            "tools/list" => {
                RpcEnvelope::success(id, json!({ "tools": self.dispatcher.list_tools() }))
            }
            "tools/call" => self.call_tool(id, &params).await,
            other => RpcEnvelope::rpc_error(
                id,
                METHOD_NOT_FOUND,
                format!("method not found: '{}'", other),
            ),
        };

        if request.is_notification() {
            None
        } else {
            Some(envelope)
        }
    }

    async fn call_tool(&self, id: Value, params: &Value) -> RpcEnvelope {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return RpcEnvelope::rpc_error(id, INVALID_PARAMS, "tool name is required");
        };
        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(args) if args.is_object() => args.clone(),
            Some(_) => {
                return RpcEnvelope::rpc_error(
                    id,
                    INVALID_PARAMS,
                    "tool arguments must be an object",
                )
            }
        };
        match self.dispatcher.call_tool(name, &arguments).await {
            Ok(content) => RpcEnvelope::success(id, json!({ "content": content, "isError": false })),
            Err(e) => {
                tracing::warn!("tools/call {} rejected: {}", name, e);
                domain_error_response(id, &e)
            }
        }
    }
}

fn initialize_protocol_version(request_params: Option<&Value>) -> &str {
    request_params
        .and_then(|value| value.get("protocolVersion"))
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .unwrap_or(DEFAULT_PROTOCOL_VERSION)
}
