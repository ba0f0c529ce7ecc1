use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;

use super::rpc::{RpcEnvelope, PARSE_ERROR};
use super::sse::{EventStream, SseSessions, MESSAGES_PATH, SSE_PATH};
use super::McpHandler;

#[derive(Clone)]
struct HttpState {
    handler: McpHandler,
    sessions: SseSessions,
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    session_id: Option<String>,
}

/// Streamable HTTP on `POST /mcp`, legacy SSE on `GET /sse` plus
/// `POST /messages/?session_id=`, and `GET /health` for health checks.
pub fn router(handler: McpHandler) -> Router {
    let state = HttpState {
        handler,
        sessions: SseSessions::default(),
    };
    Router::new()
        .route("/mcp", post(handle_rpc))
        .route(SSE_PATH, get(open_sse))
        .route(MESSAGES_PATH, post(handle_session_message))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn serve_http(handler: McpHandler, host: &str, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .map_err(|e| anyhow::anyhow!("http bind on {}:{} failed: {}", host, port, e))?;
    tracing::info!(
        "MCP HTTP transport listening on http://{}:{} (/mcp, {}, {})",
        host,
        port,
        SSE_PATH,
        MESSAGES_PATH
    );
    axum::serve(listener, router(handler))
        .await
        .map_err(|e| anyhow::anyhow!("http server failed: {}", e))
}

fn parse_error_response(e: serde_json::Error) -> Response {
    let envelope = RpcEnvelope::rpc_error(Value::Null, PARSE_ERROR, format!("parse error: {}", e));
    (StatusCode::BAD_REQUEST, Json(envelope.to_value())).into_response()
}

async fn handle_rpc(State(state): State<HttpState>, bytes: Bytes) -> Response {
    let message: Value = match serde_json::from_slice(&bytes) {
        Ok(message) => message,
        Err(e) => return parse_error_response(e),
    };
    match state.handler.handle_value(message).await {
        Some(reply) => (StatusCode::OK, Json(reply)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn open_sse(State(state): State<HttpState>) -> EventStream {
    let (_, stream) = state.sessions.open();
    stream
}

/// Accepts a message for an open SSE session. The reply, if any, is
/// delivered on that session's event stream.
async fn handle_session_message(
    State(state): State<HttpState>,
    Query(query): Query<MessagesQuery>,
    bytes: Bytes,
) -> Response {
    let Some(session_id) = query.session_id.filter(|id| !id.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "session_id is required").into_response();
    };
    if !state.sessions.contains(&session_id) {
        return (StatusCode::NOT_FOUND, "Could not find session").into_response();
    }
    let message: Value = match serde_json::from_slice(&bytes) {
        Ok(message) => message,
        Err(e) => return parse_error_response(e),
    };
    if let Some(reply) = state.handler.handle_value(message).await {
        if let Err(e) = state.sessions.send(&session_id, &reply).await {
            tracing::debug!("dropping reply for session {}: {:?}", session_id, e);
            return (StatusCode::NOT_FOUND, "Could not find session").into_response();
        }
    }
    (StatusCode::ACCEPTED, "Accepted").into_response()
}

async fn health() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mcp::tests::handler;
    use axum::body::{to_bytes, Body, BodyDataStream};
    use axum::http::Request;
    use serde_json::json;
    use tokio_stream::StreamExt;
    use tower::ServiceExt;

    async fn post_mcp(body: &str) -> (StatusCode, Bytes) {
        let response = router(handler())
            .oneshot(
                Request::post("/mcp")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = router(handler())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"OK");
    }

    #[tokio::test]
    async fn test_request_gets_json_reply() {
        let (status, bytes) = post_mcp(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).await;
        assert_eq!(status, StatusCode::OK);
        let reply: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["tools"][0]["name"], "GetShardsTool");
    }

    #[tokio::test]
    async fn test_notification_is_accepted_without_body() {
        let (status, bytes) =
            post_mcp(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(bytes.is_empty());
    }

    /// Next `(event, data)` pair on an SSE body, skipping keep-alive comments.
    async fn next_event(stream: &mut BodyDataStream) -> (String, String) {
        loop {
            let mut buf = String::new();
            while !buf.contains("\n\n") {
                let chunk = stream.next().await.unwrap().unwrap();
                buf.push_str(std::str::from_utf8(&chunk).unwrap());
            }
            let mut event = String::new();
            let mut data = String::new();
            for line in buf.lines() {
                if let Some(value) = line.strip_prefix("event:") {
                    event = value.trim_start().to_string();
                } else if let Some(value) = line.strip_prefix("data:") {
                    data = value.trim_start().to_string();
                }
            }
            if !event.is_empty() || !data.is_empty() {
                return (event, data);
            }
        }
    }

    async fn post_message(app: &Router, uri: &str, body: &str) -> StatusCode {
        app.clone()
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_sse_session_round_trip() {
        let app = router(handler());
        let response = app
            .clone()
            .oneshot(Request::get(SSE_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        let mut events = response.into_body().into_data_stream();

        let (event, endpoint) = next_event(&mut events).await;
        assert_eq!(event, "endpoint");
        assert!(endpoint.starts_with("/messages/?session_id="), "{}", endpoint);

        let status = post_message(
            &app,
            &endpoint,
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (event, data) = next_event(&mut events).await;
        assert_eq!(event, "message");
        let reply: Value = serde_json::from_str(&data).unwrap();
        assert_eq!(reply["id"], 7);
        assert_eq!(reply["result"]["tools"][0]["name"], "GetShardsTool");

        let status = post_message(
            &app,
            &endpoint,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_session_messages_need_a_known_session() {
        let app = router(handler());
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        assert_eq!(post_message(&app, "/messages/", body).await, StatusCode::BAD_REQUEST);
        assert_eq!(
            post_message(&app, "/messages/?session_id=missing", body).await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_malformed_body_is_a_parse_error() {
        let (status, bytes) = post_mcp("{oops").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let reply: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(reply["error"]["code"], json!(PARSE_ERROR));
    }
}
