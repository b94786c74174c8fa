use std::io;

use axum::http::StatusCode;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Error;

/// The write half of a connection.
pub type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Content type for plain text bodies.
pub const TEXT: &str = "text/plain; charset=utf-8";

/// Content type for JSON bodies.
pub const JSON: &str = "application/json";

/// Writes an HTTP/1.0 response.
///
/// There is no `Content-Length`: the body ends when the connection closes.
pub struct Response {
    writer: Option<Writer>,
    started: bool,
}

impl Response {
    pub(crate) fn new(writer: Writer) -> Self {
        Self {
            writer: Some(writer),
            started: false,
        }
    }

    fn writer(&mut self) -> Result<&mut Writer, Error> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "response detached").into())
    }

    /// Has the status line been written?
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Write the status line and the content type.
    pub async fn start(&mut self, status: StatusCode, content_type: &str) -> Result<(), Error> {
        let head = format!(
            "HTTP/1.0 {} {}\r\nContent-Type: {content_type}\r\n\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("NA"),
        );

        self.started = true;
        self.writer()?.write_all(head.as_bytes()).await?;

        Ok(())
    }

    /// Write part of the body.
    pub async fn write_str(&mut self, body: &str) -> Result<(), Error> {
        self.writer()?.write_all(body.as_bytes()).await?;

        Ok(())
    }

    /// A complete `200 OK` plain text response.
    pub async fn text(&mut self, body: &str) -> Result<(), Error> {
        self.start(StatusCode::OK, TEXT).await?;
        self.write_str(body).await
    }

    /// A complete `200 OK` JSON response.
    pub async fn json<T: Serialize>(&mut self, value: &T) -> Result<(), Error> {
        let body = serde_json::to_string(value)?;

        self.start(StatusCode::OK, JSON).await?;
        self.write_str(&body).await
    }

    /// A complete error response whose body is the status code.
    pub async fn error(&mut self, status: StatusCode) -> Result<(), Error> {
        self.start(status, TEXT).await?;
        self.write_str(&format!("{}\n", status.as_u16())).await
    }

    /// Take the stream over. The router will not close it.
    pub fn detach(&mut self) -> Option<Writer> {
        self.writer.take()
    }

    /// Flush and shut the stream down.
    pub async fn close(&mut self) -> Result<(), Error> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
            writer.shutdown().await?;
        }

        Ok(())
    }
}
