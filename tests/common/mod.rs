#![allow(dead_code)]

use std::time::Duration;

use color_eyre::Result;
use gc10_link::{
    config::Config,
    mock::{MockBuilder, MockHandle},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
    time::timeout,
};
use tracing::{info, Level};

pub const API_KEY: &str = "test-key";

pub fn config() -> Config {
    Config {
        api_key: API_KEY.into(),
        query_timeout_ms: 300,
        banner: "Test banner\n".into(),
        ..Default::default()
    }
}

pub async fn start_server_with_transport<T>(io: T) -> u16
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    gc10_link::logging::init(Level::DEBUG, None).await;

    let (port_tx, port_rx) = oneshot::channel();

    tokio::spawn(async move { gc10_link::server::run_any_port(config(), io, port_tx).await });
    port_rx
        .await
        .expect("Server should reply with allocated port")
}

pub async fn start_server_with_mock(mock: MockBuilder) -> (u16, MockHandle) {
    let (io, handle) = mock.build();
    let port = start_server_with_transport(io).await;

    (port, handle)
}

pub async fn start_server() -> (u16, MockHandle) {
    start_server_with_mock(MockBuilder::new()).await
}

/// A response as seen by a client.
#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub head: String,
    pub body: String,
}

impl Reply {
    pub fn json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Send raw bytes, read until the server closes.
pub async fn raw(port: u16, request: &str) -> Result<Reply> {
    info!("Requesting on port {port}");
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;

    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    timeout(Duration::from_secs(5), stream.read_to_string(&mut response)).await??;

    let (head, body) = response
        .split_once("\r\n\r\n")
        .ok_or_else(|| color_eyre::eyre::eyre!("No header end in {response:?}"))?;

    let status = head
        .split(' ')
        .nth(1)
        .ok_or_else(|| color_eyre::eyre::eyre!("No status in {head:?}"))?
        .parse()?;

    Ok(Reply {
        status,
        head: head.to_owned(),
        body: body.to_owned(),
    })
}

fn authorization(token: Option<&str>) -> String {
    token
        .map(|token| format!("Authorization: Bearer {token}\r\n"))
        .unwrap_or_default()
}

pub async fn get(port: u16, path: &str, token: Option<&str>) -> Result<Reply> {
    raw(
        port,
        &format!(
            "GET {path} HTTP/1.0\r\nHost: gc10\r\n{}\r\n",
            authorization(token)
        ),
    )
    .await
}

pub async fn post(port: u16, path: &str, token: Option<&str>, body: &str) -> Result<Reply> {
    raw(
        port,
        &format!(
            "POST {path} HTTP/1.0\r\nHost: gc10\r\n{}Content-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{body}",
            authorization(token),
            body.len()
        ),
    )
    .await
}

/// Read exactly `n` bytes off the instrument side of a stream.
pub async fn read_exactly<R: AsyncRead + Unpin>(instrument: &mut R, n: usize) -> Result<String> {
    let mut buf = vec![0; n];
    timeout(Duration::from_secs(2), instrument.read_exact(&mut buf)).await??;

    Ok(String::from_utf8(buf)?)
}

/// Nothing more arrives on the instrument side for a while.
pub async fn assert_quiet<R: AsyncRead + Unpin>(instrument: &mut R) {
    let mut buf = [0; 64];
    let read = timeout(Duration::from_millis(200), instrument.read(&mut buf)).await;

    assert!(read.is_err(), "Expected silence, got {read:?}");
}
