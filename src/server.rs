use std::{net::SocketAddr, time::Duration};

use futures::FutureExt;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::oneshot,
};
use tokio_serial::SerialStream;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    api,
    config::Config,
    error::Error,
    http::router::Router,
    scheduler::{self, BridgeHandle, Reopen},
    serial::serial_port,
};

/// How long to wait before binding the listening socket again.
pub const BIND_RETRY_PERIOD: Duration = Duration::from_secs(3);

/// Build the router for a running bridge.
pub fn router(config: &Config, bridge: BridgeHandle) -> Router {
    Router::new(api::routes(bridge, &config.api_key, &config.banner))
}

async fn bind(addr: SocketAddr) -> TcpListener {
    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => return listener,
            Err(e) => {
                warn!(%addr, %e, "Could not listen, retrying in {BIND_RETRY_PERIOD:?}");
                tokio::time::sleep(BIND_RETRY_PERIOD).await;
            }
        }
    }
}

async fn run<T>(
    config: Config,
    io: T,
    reopen: Option<Reopen<T>>,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
) -> Result<(), Error>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    config.validate()?;

    let bridge = match reopen {
        Some(reopen) => scheduler::spawn_reopening(io, config.settings(), reopen),
        None => scheduler::spawn(io, config.settings()),
    };
    let router = router(&config, bridge);

    let listener = bind(SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(0)))).await;
    let addr = listener.local_addr()?;

    if let Some(port_reply) = allocated_port {
        if port_reply.send(addr.port()).is_err() {
            warn!("Nobody wanted to know the allocated port");
        }
    }

    info!("listening on {}", addr);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(%e, "Could not accept connection");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        debug!(%peer, "Accepted");
        let router = router.clone();

        tokio::spawn(
            async move {
                let (reader, writer) = stream.into_split();
                router.dispatch(reader, writer).await;
            }
            .instrument(info_span!("conn", %peer)),
        );
    }
}

/// Start the server on an arbitrary available port, talking to the
/// instrument over `io`.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port<T>(
    config: Config,
    io: T,
    allocated_port: oneshot::Sender<u16>,
) -> Result<(), Error>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    run(config, io, None, None, Some(allocated_port)).await
}

/// Start the server on the given port, talking to the instrument over `io`.
pub async fn run_with_transport<T>(config: Config, io: T, port: u16) -> Result<(), Error>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    run(config, io, None, Some(port), None).await
}

/// Open the configured serial port, then start the server on the given port.
///
/// Should the port fail or go away later, it is opened again.
pub async fn run_on_port(config: Config, port: u16) -> Result<(), Error> {
    config.validate()?;

    let serial = serial_port::open_with_retry(&config.serial_port, config.baud).await;

    let path = config.serial_port.clone();
    let baud = config.baud;
    let reopen: Reopen<SerialStream> = Box::new(move || {
        let path = path.clone();
        async move {
            tokio::time::sleep(serial_port::RETRY_PERIOD).await;
            serial_port::open_with_retry(&path, baud).await
        }
        .boxed()
    });

    run(config, serial, Some(reopen), Some(port), None).await
}
