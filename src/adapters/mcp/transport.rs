use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// How a message arrived on a byte stream; replies use the same framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FrameMode {
    /// `Content-Length` header block followed by the body.
    Framed,
    /// One JSON document per line.
    JsonLine,
}

/// Reads MCP messages from a byte stream, detecting framing per message.
pub(super) struct MessageReader<R> {
    inner: BufReader<R>,
    max_bytes: usize,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub(super) fn new(reader: R, max_bytes: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            max_bytes,
        }
    }

    /// `Ok(None)` on clean EOF.
    pub(super) async fn next_message(&mut self) -> anyhow::Result<Option<(String, FrameMode)>> {
        let Some(first) = self.skip_whitespace().await? else {
            return Ok(None);
        };

        if first == b'{' || first == b'[' {
            let line = self.read_line().await?;
            let text = String::from_utf8_lossy(&line);
            return Ok(Some((
                text.trim_end_matches(['\r', '\n']).to_string(),
                FrameMode::JsonLine,
            )));
        }

        let mut content_length: Option<usize> = None;
        loop {
            let line = self.read_line().await?;
            if line.is_empty() {
                anyhow::bail!("unexpected EOF while reading frame headers");
            }
            let header = String::from_utf8_lossy(&line);
            let header = header.trim_end_matches(['\r', '\n']);
            if header.trim().is_empty() {
                break;
            }
            let (name, value) = header
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("invalid frame header '{}'", header))?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                let length = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| anyhow::anyhow!("invalid Content-Length value"))?;
                if length > self.max_bytes {
                    anyhow::bail!("frame too large: {} bytes (max {})", length, self.max_bytes);
                }
                content_length = Some(length);
            }
        }

        let length = content_length.ok_or_else(|| anyhow::anyhow!("missing Content-Length header"))?;
        let mut body = vec![0u8; length];
        self.inner.read_exact(&mut body).await?;
        Ok(Some((
            String::from_utf8_lossy(&body).into_owned(),
            FrameMode::Framed,
        )))
    }

    async fn skip_whitespace(&mut self) -> anyhow::Result<Option<u8>> {
        loop {
            let (skipped, first) = {
                let buf = self.inner.fill_buf().await?;
                if buf.is_empty() {
                    return Ok(None);
                }
                let skipped = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
                (skipped, buf.get(skipped).copied())
            };
            self.inner.consume(skipped);
            if let Some(byte) = first {
                return Ok(Some(byte));
            }
        }
    }

    /// One line including its terminator, bounded by `max_bytes`.
    async fn read_line(&mut self) -> anyhow::Result<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            let (done, used) = {
                let buf = self.inner.fill_buf().await?;
                if buf.is_empty() {
                    (true, 0)
                } else {
                    match buf.iter().position(|b| *b == b'\n') {
                        Some(end) => {
                            line.extend_from_slice(&buf[..=end]);
                            (true, end + 1)
                        }
                        None => {
                            line.extend_from_slice(buf);
                            (false, buf.len())
                        }
                    }
                }
            };
            self.inner.consume(used);
            if line.len() > self.max_bytes + 2 {
                anyhow::bail!("incoming frame too large (max {} bytes)", self.max_bytes);
            }
            if done {
                return Ok(line);
            }
        }
    }
}

pub(super) async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Value,
    mode: FrameMode,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(message)?;
    match mode {
        FrameMode::Framed => {
            let header = format!("Content-Length: {}\r\n\r\n", body.len());
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(&body).await?;
        }
        FrameMode::JsonLine => {
            writer.write_all(&body).await?;
            writer.write_all(b"\n").await?;
        }
    }
    writer.flush().await?;
    Ok(())
}
