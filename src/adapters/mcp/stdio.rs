use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufWriter};
use tokio::time::{Duration, Instant};

use super::rpc::{RpcEnvelope, PARSE_ERROR, SERVER_SHUT_DOWN};
use super::transport::{write_message, FrameMode, MessageReader};
use super::{McpHandler, MAX_FRAME_BYTES};

pub const INITIALIZE_TIMEOUT_ENV: &str = "OPENSEARCH_MCP_INITIALIZE_TIMEOUT_MS";
const MAX_CONSECUTIVE_FRAME_ERRORS: usize = 16;

fn parse_initialize_timeout_ms(raw: Option<&str>) -> Duration {
    const DEFAULT_SECS: u64 = 20;
    let parsed = raw
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0);
    match parsed {
        Some(ms) => Duration::from_millis(ms),
        None => Duration::from_secs(DEFAULT_SECS),
    }
}

fn initialize_timeout() -> Duration {
    let raw = std::env::var(INITIALIZE_TIMEOUT_ENV).ok();
    parse_initialize_timeout_ms(raw.as_deref())
}

pub async fn serve_stdio(handler: McpHandler) -> anyhow::Result<()> {
    serve_io(
        handler,
        tokio::io::stdin(),
        tokio::io::stdout(),
        initialize_timeout(),
    )
    .await
}

/// Serves one client over a byte stream until EOF or `exit`.
///
/// The first message fixes the reply framing. After `shutdown` only `exit`
/// is accepted. An I/O error on the input counts as end of input; malformed
/// frames are skipped until too many arrive in a row.
pub async fn serve_io<R, W>(
    handler: McpHandler,
    input: R,
    output: W,
    init_timeout: Duration,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = MessageReader::new(input, MAX_FRAME_BYTES);
    let mut writer = BufWriter::new(output);
    let init_deadline = Instant::now() + init_timeout;
    let mut initialized = false;
    let mut shutdown_requested = false;
    let mut reply_mode: Option<FrameMode> = None;
    let mut frame_errors = 0usize;

    loop {
        let next = if initialized {
            reader.next_message().await
        } else {
            match tokio::time::timeout_at(init_deadline, reader.next_message()).await {
                Ok(result) => result,
                Err(_) => anyhow::bail!(
                    "no initialize received within {:?}; closing server",
                    init_timeout
                ),
            }
        };

        let (raw, mode) = match next {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(e) if e.downcast_ref::<std::io::Error>().is_some() => {
                tracing::warn!("input closed after read error: {}", e);
                break;
            }
            Err(e) => {
                frame_errors += 1;
                tracing::warn!("frame read error: {}", e);
                if frame_errors >= MAX_CONSECUTIVE_FRAME_ERRORS {
                    anyhow::bail!("giving up after {} consecutive frame errors: {}", frame_errors, e);
                }
                continue;
            }
        };
        frame_errors = 0;
        let mode = *reply_mode.get_or_insert(mode);
        if raw.trim().is_empty() {
            continue;
        }

        let message: Value = match serde_json::from_str(&raw) {
            Ok(message) => message,
            Err(e) => {
                let envelope =
                    RpcEnvelope::rpc_error(Value::Null, PARSE_ERROR, format!("parse error: {}", e));
                write_message(&mut writer, &envelope.to_value(), mode).await?;
                continue;
            }
        };

        let method = message
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let request_id = message.get("id").cloned().unwrap_or(Value::Null);
        let is_notification = request_id.is_null();

        if method == "initialize" {
            initialized = true;
        }
        if method == "exit" {
            if !is_notification {
                let envelope = RpcEnvelope::success(request_id, Value::Null);
                write_message(&mut writer, &envelope.to_value(), mode).await?;
            }
            break;
        }
        if shutdown_requested {
            if !is_notification {
                let envelope = RpcEnvelope::rpc_error(
                    request_id,
                    SERVER_SHUT_DOWN,
                    "server is shut down; only 'exit' is accepted",
                );
                write_message(&mut writer, &envelope.to_value(), mode).await?;
            }
            continue;
        }
        if method == "shutdown" {
            shutdown_requested = true;
        }

        if let Some(reply) = handler.handle_value(message).await {
            write_message(&mut writer, &reply, mode).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mcp::tests::handler;
    use serde_json::json;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    struct BrokenInput;

    impl AsyncRead for BrokenInput {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "pipe closed",
            )))
        }
    }

    async fn run(input: &[u8]) -> (anyhow::Result<()>, Vec<u8>) {
        let mut output = Vec::new();
        let result = serve_io(handler(), input, &mut output, Duration::from_secs(5)).await;
        (result, output)
    }

    fn lines(output: &[u8]) -> Vec<Value> {
        String::from_utf8_lossy(output)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_parse_initialize_timeout_ms() {
        assert_eq!(parse_initialize_timeout_ms(None), Duration::from_secs(20));
        assert_eq!(
            parse_initialize_timeout_ms(Some("  250  ")),
            Duration::from_millis(250)
        );
        assert_eq!(parse_initialize_timeout_ms(Some("0")), Duration::from_secs(20));
        assert_eq!(
            parse_initialize_timeout_ms(Some("invalid")),
            Duration::from_secs(20)
        );
    }

    #[tokio::test]
    async fn test_session_lifecycle_over_json_lines() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#, "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"shutdown"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/list"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":5,"method":"exit"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":6,"method":"ping"}"#, "\n",
        );
        let (result, output) = run(input.as_bytes()).await;
        result.unwrap();
        let replies = lines(&output);
        let ids: Vec<_> = replies.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
        assert_eq!(replies[1]["result"]["tools"][0]["name"], "GetShardsTool");
        assert_eq!(replies[3]["error"]["code"], SERVER_SHUT_DOWN);
    }

    #[tokio::test]
    async fn test_framed_client_gets_framed_replies() {
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#;
        let input = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
        let (result, output) = run(input.as_bytes()).await;
        result.unwrap();
        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with("Content-Length: "), "{}", text);
    }

    #[tokio::test]
    async fn test_parse_error_is_reported() {
        let input = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\"}\n{not json}\n";
        let (result, output) = run(input).await;
        result.unwrap();
        let replies = lines(&output);
        assert_eq!(replies[1]["error"]["code"], PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_read_error_ends_the_session() {
        let mut output = Vec::new();
        let served = tokio::time::timeout(
            Duration::from_secs(1),
            serve_io(handler(), BrokenInput, &mut output, Duration::from_secs(5)),
        )
        .await
        .expect("serve_io must stop on a failing input");
        served.unwrap();
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_bad_frames_stop_the_loop() {
        let recovered = format!(
            "junk\njunk\n{}\n",
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#
        );
        let (result, output) = run(recovered.as_bytes()).await;
        result.unwrap();
        assert_eq!(lines(&output)[0]["id"], 1);

        let flood = "junk\n".repeat(MAX_CONSECUTIVE_FRAME_ERRORS + 4);
        let (result, _) = run(flood.as_bytes()).await;
        assert!(result.unwrap_err().to_string().contains("consecutive frame errors"));
    }

    #[tokio::test]
    async fn test_missing_initialize_times_out() {
        let (client, server) = tokio::io::duplex(64);
        let mut output = Vec::new();
        let result = serve_io(handler(), server, &mut output, Duration::from_millis(20)).await;
        drop(client);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("no initialize received"));
    }
}
