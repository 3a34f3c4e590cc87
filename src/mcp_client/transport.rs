//! Newline-delimited JSON transport.
//!
//! One JSON value per line, UTF-8, `\n`-terminated. Used for a child
//! process's stdin/stdout on the client side and for the process's own
//! stdio on the server side. The framer knows nothing about JSON-RPC.

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use super::errors::McpError;

/// Longest slice of an offending line quoted in a parse error.
const MAX_LINE_PREVIEW: usize = 200;

/// Bi-directional line-framed JSON transport.
pub struct LineTransport<R, W> {
    /// Peer name, used for error context.
    peer: String,
    reader: Mutex<ReadState<R>>,
    /// `None` once the write half has been closed.
    writer: Mutex<Option<W>>,
}

/// Read half plus the bytes of a line not yet terminated.
///
/// Keeping `pending` outside the read future means a read cancelled by a
/// timeout resumes mid-line instead of losing what it already consumed.
struct ReadState<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Create a transport over a read half and a write half.
    pub fn new(peer: &str, reader: R, writer: W) -> Self {
        Self {
            peer: peer.to_string(),
            reader: Mutex::new(ReadState {
                reader: BufReader::new(reader),
                pending: Vec::new(),
            }),
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Serialize `message` as compact JSON and write it as one line.
    pub async fn write_message<T: Serialize>(&self, message: &T) -> Result<(), McpError> {
        let mut line = serde_json::to_string(message).map_err(|e| McpError::TransportWrite {
            server: self.peer.clone(),
            reason: format!("failed to serialize message: {e}"),
        })?;
        line.push('\n');

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| McpError::TransportWrite {
            server: self.peer.clone(),
            reason: "write half already closed".into(),
        })?;

        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::TransportWrite {
                server: self.peer.clone(),
                reason: format!("failed to write: {e}"),
            })?;
        writer.flush().await.map_err(|e| McpError::TransportWrite {
            server: self.peer.clone(),
            reason: format!("failed to flush: {e}"),
        })?;

        Ok(())
    }

    /// Read the next JSON value.
    ///
    /// Returns `Ok(None)` when the peer closes its end. Blank lines are
    /// skipped. Safe to cancel: a partially received line is kept and
    /// completed by the next call.
    pub async fn read_message(&self) -> Result<Option<serde_json::Value>, McpError> {
        let mut state = self.reader.lock().await;
        let ReadState { reader, pending } = &mut *state;

        loop {
            let bytes_read =
                reader
                    .read_until(b'\n', pending)
                    .await
                    .map_err(|e| McpError::TransportRead {
                        server: self.peer.clone(),
                        reason: format!("failed to read line: {e}"),
                    })?;

            if bytes_read == 0 && pending.is_empty() {
                return Ok(None);
            }

            let raw = std::mem::take(pending);
            let line = String::from_utf8(raw).map_err(|e| McpError::TransportParse {
                server: self.peer.clone(),
                reason: format!("line is not valid UTF-8: {e}"),
            })?;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            return serde_json::from_str(trimmed)
                .map(Some)
                .map_err(|e| McpError::TransportParse {
                    server: self.peer.clone(),
                    reason: format!("invalid JSON ({e}): {}", preview(trimmed)),
                });
        }
    }

    /// Shut down and drop the write half, signalling end-of-stream to the peer.
    ///
    /// Idempotent.
    pub async fn close_writer(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}

fn preview(line: &str) -> String {
    if line.len() <= MAX_LINE_PREVIEW {
        return line.to_string();
    }
    let mut end = MAX_LINE_PREVIEW;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    fn pair() -> (
        LineTransport<DuplexStream, DuplexStream>,
        DuplexStream,
        DuplexStream,
    ) {
        let (ours_read, theirs_write) = duplex(4096);
        let (theirs_read, ours_write) = duplex(4096);
        (
            LineTransport::new("peer", ours_read, ours_write),
            theirs_write,
            theirs_read,
        )
    }

    #[tokio::test]
    async fn test_write_message_is_one_compact_line() {
        let (transport, _theirs_write, mut theirs_read) = pair();
        transport
            .write_message(&serde_json::json!({"a": "line\nbreak", "b": [1, 2]}))
            .await
            .unwrap();
        transport.close_writer().await;

        let mut out = String::new();
        theirs_read.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "{\"a\":\"line\\nbreak\",\"b\":[1,2]}\n");
    }

    #[tokio::test]
    async fn test_read_message_skips_blank_lines_and_reports_eof() {
        let (transport, mut theirs_write, _theirs_read) = pair();
        theirs_write
            .write_all(b"\n  \n{\"id\":1}\n")
            .await
            .unwrap();
        drop(theirs_write);

        let first = transport.read_message().await.unwrap();
        assert_eq!(first, Some(serde_json::json!({"id": 1})));
        assert!(transport.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_read_keeps_partial_line() {
        let (transport, mut theirs_write, _theirs_read) = pair();
        theirs_write.write_all(b"{\"id\":").await.unwrap();

        let first = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            transport.read_message(),
        )
        .await;
        assert!(first.is_err(), "read should still be waiting for the newline");

        theirs_write.write_all(b"7}\n").await.unwrap();
        let msg = transport.read_message().await.unwrap();
        assert_eq!(msg, Some(serde_json::json!({"id": 7})));
    }

    #[tokio::test]
    async fn test_read_message_invalid_json() {
        let (transport, mut theirs_write, _theirs_read) = pair();
        theirs_write.write_all(b"Starting server...\n").await.unwrap();

        let err = transport.read_message().await.unwrap_err();
        match err {
            McpError::TransportParse { server, reason } => {
                assert_eq!(server, "peer");
                assert!(reason.contains("Starting server..."));
            }
            other => panic!("expected TransportParse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (transport, _theirs_write, _theirs_read) = pair();
        transport.close_writer().await;
        transport.close_writer().await;

        let err = transport
            .write_message(&serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::TransportWrite { .. }));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "é".repeat(150);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert!(p.len() <= MAX_LINE_PREVIEW + 3);
    }
}
