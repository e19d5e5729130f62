//! stdio transport for MCP server.
//!
//! This module implements the stdio transport as specified by MCP:
//!
//! - Messages are UTF-8 encoded JSON-RPC
//! - Messages are delimited by newlines
//! - Messages must not contain embedded newlines
//! - stdin: receives messages from client
//! - stdout: sends messages to client
//! - stderr: may be used for logging (not MCP messages)
//!
//! # Thread Safety
//!
//! Reading and writing are split. [`StdioTransport`] reads on the server
//! loop; [`StdioWriter`] owns stdout in its own task and drains a channel,
//! so replies and notifications from concurrent tool calls never interleave
//! within a line.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::mcp::protocol::OutgoingMessage;

/// Reads newline-delimited messages from stdin.
pub struct StdioTransport {
    /// Buffered reader for stdin.
    reader: BufReader<tokio::io::Stdin>,
}

impl StdioTransport {
    /// Creates a new stdio transport.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
        }
    }

    /// Reads the next message line from stdin.
    ///
    /// Returns `None` if stdin is closed (EOF).
    ///
    /// # Errors
    ///
    /// Returns an error if reading from stdin fails.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            // EOF - stdin closed
            return Ok(None);
        }

        Ok(Some(trim_line_ending(line)))
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn trim_line_ending(mut line: String) -> String {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    line
}

/// Writes outgoing messages, one per line.
pub struct StdioWriter<W = tokio::io::Stdout> {
    writer: W,
}

impl StdioWriter {
    /// Creates a writer on stdout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_writer(tokio::io::stdout())
    }
}

impl Default for StdioWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: AsyncWrite + Unpin> StdioWriter<W> {
    /// Creates a writer on any async sink.
    pub const fn with_writer(writer: W) -> Self {
        Self { writer }
    }

    /// Writes every message received until all senders are gone.
    ///
    /// A failed write (the client closed stdout) ends the loop; the caller
    /// notices EOF on stdin separately.
    pub async fn run(mut self, mut messages: mpsc::UnboundedReceiver<OutgoingMessage>) {
        while let Some(message) = messages.recv().await {
            if let Err(e) = self.write_message(&message).await {
                tracing::warn!(error = %e, "Failed to write to stdout");
                break;
            }
        }
    }

    /// Writes one message terminated with a newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_message(&mut self, message: &OutgoingMessage) -> io::Result<()> {
        let json = serde_json::to_string(message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        // stdio framing: one message per line, no embedded newlines
        debug_assert!(
            !json.contains('\n'),
            "JSON message must not contain embedded newlines"
        );

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// Consumes the writer and returns the underlying sink.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{JsonRpcError, JsonRpcResponse, OutgoingNotification, RequestId};

    #[test]
    fn transport_default() {
        // Just ensure Default is implemented and doesn't panic
        let _transport = StdioTransport::default();
    }

    #[test]
    fn line_endings_are_trimmed() {
        assert_eq!(trim_line_ending("{}\n".to_string()), "{}");
        assert_eq!(trim_line_ending("{}\r\n".to_string()), "{}");
        assert_eq!(trim_line_ending("{}".to_string()), "{}");
    }

    #[tokio::test]
    async fn messages_are_written_one_per_line() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(
            JsonRpcResponse::success(
                RequestId::Number(1),
                serde_json::json!({
                    "message": "hello\nworld",
                    "nested": {"key": "value"}
                }),
            )
            .into(),
        )
        .unwrap();
        tx.send(OutgoingNotification::progress(&serde_json::json!("t"), 5, 100).into())
            .unwrap();
        tx.send(JsonRpcError::method_not_found(RequestId::Number(2), "test/method").into())
            .unwrap();
        drop(tx);

        let mut writer = StdioWriter::with_writer(Vec::new());
        let mut rx = rx;
        while let Some(message) = rx.recv().await {
            writer.write_message(&message).await.unwrap();
        }
        let output = String::from_utf8(writer.into_inner()).unwrap();

        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in lines {
            serde_json::from_str::<serde_json::Value>(line).unwrap();
        }
    }

    #[tokio::test]
    async fn run_stops_when_senders_are_gone() {
        let (tx, rx) = mpsc::unbounded_channel::<OutgoingMessage>();
        drop(tx);
        StdioWriter::with_writer(Vec::new()).run(rx).await;
    }
}
