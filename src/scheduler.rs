//! The scheduler is the single task that owns the serial bridge.
//!
//! Each tick it first drains an available telemetry line. When nothing is
//! waiting it refreshes liveness, runs maintenance at most once per period,
//! and then sleeps until serial bytes, a handler request or the maintenance
//! timer wake it up.
//!
//! Handlers never touch the serial channel. They hold a [`BridgeHandle`] and
//! queue [`BridgeRequest`]s, which the scheduler serves one at a time. This
//! makes a status dump exclusive: while it runs no other command can be
//! written, and every line read belongs to it or to passive telemetry.
//!
//! If the serial stream fails or ends and a [`Reopen`] was given, the
//! scheduler keeps serving handlers while it waits for a fresh stream. The
//! cached device state survives the swap.

use std::{fmt::Display, time::Duration};

use futures::future::BoxFuture;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, oneshot, watch},
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    device::{DeviceState, Snapshot, Status, DEFAULT_STALE_AFTER},
    serial::{bridge::SerialBridge, error::SerialPortError, Command},
};

/// Timing knobs for the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Quiet time after which the instrument counts as disconnected.
    pub stale_after: Duration,

    /// Upper bound on a full status dump.
    pub query_timeout: Duration,

    /// How often maintenance may run.
    pub maintenance_period: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
            query_timeout: Duration::from_secs(3),
            maintenance_period: Duration::from_secs(1),
        }
    }
}

/// What a handler can ask of the serial channel.
#[derive(Debug)]
pub(crate) enum BridgeRequest {
    /// Write a command.
    Command {
        command: Command,
        reply: oneshot::Sender<Result<(), SerialPortError>>,
    },

    /// Run a full `show` exchange.
    QueryAll {
        reply: oneshot::Sender<Result<(), SerialPortError>>,
    },
}

impl Display for BridgeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeRequest::Command { command, .. } => write!(f, "command `{command}`"),
            BridgeRequest::QueryAll { .. } => write!(f, "query all"),
        }
    }
}

/// A cheap, cloneable way to reach the bridge.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    requests: mpsc::UnboundedSender<BridgeRequest>,
    state: watch::Receiver<DeviceState>,
    started: Instant,
    stale_after: Duration,
}

impl BridgeHandle {
    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<(), SerialPortError>>) -> BridgeRequest,
    ) -> Result<(), SerialPortError> {
        let (tx, rx) = oneshot::channel();

        self.requests
            .send(make(tx))
            .map_err(|_| SerialPortError::BridgeStopped)?;

        rx.await.map_err(|_| SerialPortError::BridgeStopped)?
    }

    async fn command(&self, command: Command) -> Result<(), SerialPortError> {
        self.request(|reply| BridgeRequest::Command { command, reply })
            .await
    }

    /// Refresh every field with a full dump from the instrument.
    /// Fails with [`SerialPortError::Timeout`] if the dump does not complete.
    pub async fn query_all(&self) -> Result<(), SerialPortError> {
        self.request(|reply| BridgeRequest::QueryAll { reply }).await
    }

    /// Set the gain/mode setting.
    pub async fn set_gms(&self, value: i64) -> Result<(), SerialPortError> {
        self.command(Command::SetGms(value)).await
    }

    /// Set the alarm threshold.
    pub async fn set_atc(&self, value: i64) -> Result<(), SerialPortError> {
        self.command(Command::SetAtc(value)).await
    }

    /// Switch the buzzer. The cached value changes before this returns.
    pub async fn set_snd(&self, on: bool) -> Result<(), SerialPortError> {
        self.command(Command::SetSnd(on)).await
    }

    /// Persist settings on the instrument.
    pub async fn save(&self) -> Result<(), SerialPortError> {
        self.command(Command::Save).await
    }

    /// The current view of the instrument. Liveness is computed now.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(
            &self.state.borrow(),
            Instant::now(),
            self.started,
            self.stale_after,
        )
    }

    /// Raw access to the cached state.
    pub fn state(&self) -> DeviceState {
        self.state.borrow().clone()
    }
}

/// Produces a fresh stream once the current one is gone.
pub type Reopen<T> = Box<dyn FnMut() -> BoxFuture<'static, T> + Send>;

pub(crate) struct Scheduler<T> {
    bridge: SerialBridge<T>,
    reopen: Option<Reopen<T>>,
    requests: mpsc::UnboundedReceiver<BridgeRequest>,
    state: watch::Receiver<DeviceState>,
    settings: Settings,
    last_status: Option<Status>,
    last_maintenance: Option<Instant>,
}

/// Start the scheduler on the given byte stream.
///
/// It runs until every [`BridgeHandle`] is dropped.
/// Once the stream ends, commands fail with [`SerialPortError::Disconnected`].
pub fn spawn<T>(io: T, settings: Settings) -> BridgeHandle
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    spawn_inner(io, settings, None)
}

/// Like [`spawn`], but a failed or ended stream is replaced by whatever
/// `reopen` produces next.
pub fn spawn_reopening<T>(io: T, settings: Settings, reopen: Reopen<T>) -> BridgeHandle
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    spawn_inner(io, settings, Some(reopen))
}

fn spawn_inner<T>(io: T, settings: Settings, reopen: Option<Reopen<T>>) -> BridgeHandle
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(DeviceState::default());

    let mut scheduler = Scheduler {
        bridge: SerialBridge::new(io, state_tx),
        reopen,
        requests: requests_rx,
        state: state_rx.clone(),
        settings,
        last_status: None,
        last_maintenance: None,
    };

    tokio::spawn(async move { scheduler.run().await }.instrument(info_span!("scheduler")));

    BridgeHandle {
        requests: requests_tx,
        state: state_rx,
        started: Instant::now(),
        stale_after: settings.stale_after,
    }
}

impl<T> Scheduler<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) async fn run(&mut self) {
        info!(?self.settings, "Scheduler running");

        let mut maintenance = tokio::time::interval(self.settings.maintenance_period);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut reopening: Option<BoxFuture<'static, T>> = None;

        loop {
            // Telemetry has priority: keep draining while lines are ready.
            match self.bridge.poll_once() {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => warn!(%e, "Problem reading from instrument"),
            }

            self.refresh_liveness();
            self.maintain();

            let serial_open = !self.bridge.is_closed();

            if !serial_open && reopening.is_none() {
                if let Some(reopen) = self.reopen.as_mut() {
                    warn!("Serial stream gone, reopening");
                    reopening = Some(reopen());
                }
            }

            tokio::select! {
                biased;

                line = self.bridge.next_line(), if serial_open => match line {
                    Ok(line) => self.bridge.ingest(&line),
                    Err(e) => warn!(%e, "Problem reading from instrument"),
                },
                request = self.requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => {
                        info!("All handles dropped, scheduler stopping");
                        break;
                    }
                },
                io = reopened(&mut reopening) => {
                    reopening = None;
                    info!("Serial stream reopened");
                    self.bridge.replace_io(io);
                }
                _ = maintenance.tick() => {}
            }
        }
    }

    async fn handle(&mut self, request: BridgeRequest) {
        debug!(%request, "Serving");

        let (result, reply) = match request {
            BridgeRequest::Command { command, reply } => {
                (self.bridge.execute(command).await, reply)
            }
            BridgeRequest::QueryAll { reply } => {
                (self.bridge.query_all(self.settings.query_timeout).await, reply)
            }
        };

        if let Err(e) = &result {
            error!(%e, "Request to instrument failed");
        }

        if reply.send(result).is_err() {
            debug!("Requester left before the reply");
        }
    }

    fn refresh_liveness(&mut self) {
        let status = self
            .state
            .borrow()
            .status_at(Instant::now(), self.settings.stale_after);

        if status != self.last_status {
            match status {
                Some(Status::Disconnected) => warn!("Instrument went quiet"),
                Some(status) => info!(%status, "Instrument liveness"),
                None => {}
            }
            self.last_status = status;
        }
    }

    fn maintain(&mut self) {
        let now = Instant::now();

        if let Some(last) = self.last_maintenance {
            if now.saturating_duration_since(last) < self.settings.maintenance_period {
                return;
            }
        }

        self.bridge.compact();
        self.last_maintenance = Some(now);
    }
}

/// Resolves with the new stream, or never if no reopen is under way.
async fn reopened<T>(reopening: &mut Option<BoxFuture<'static, T>>) -> T {
    match reopening {
        Some(reopening) => reopening.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use pretty_assertions::assert_eq;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    use super::*;
    use crate::serial::bridge::tests::Flaky;

    fn settings() -> Settings {
        Settings {
            query_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    async fn wait_for(handle: &BridgeHandle, check: impl Fn(&DeviceState) -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            let mut state = handle.state.clone();
            while !check(&state.borrow_and_update()) {
                state.changed().await.unwrap();
            }
        })
        .await
        .expect("State should change in time");
    }

    #[tokio::test]
    async fn passive_telemetry_reaches_the_cache() {
        let (ours, mut instrument) = duplex(256);
        let handle = spawn(ours, settings());

        assert_eq!(handle.snapshot().status, None);

        instrument.write_all(b"25\r\n").await.unwrap();
        wait_for(&handle, |state| state.cpm == Some(25)).await;

        assert_eq!(handle.snapshot().status, Some(Status::Ok));
    }

    #[tokio::test]
    async fn query_all_is_served_through_the_handle() {
        let (ours, instrument) = duplex(256);
        let handle = spawn(ours, settings());

        let (read, mut write) = tokio::io::split(instrument);
        let mut read = BufReader::new(read);

        tokio::spawn(async move {
            let mut line = String::new();
            read.read_line(&mut line).await.unwrap();
            assert_eq!(line, "show\r\n");

            write
                .write_all(b"ttc: 1\r\ngms: 2\r\natc: 3\r\nhvg: 4\r\n")
                .await
                .unwrap();
        });

        handle.query_all().await.unwrap();

        let snapshot = handle.snapshot();
        assert_eq!(
            (snapshot.ttc, snapshot.gms, snapshot.atc, snapshot.hvg),
            (Some(1), Some(2), Some(3), Some(4))
        );
    }

    #[tokio::test]
    async fn query_all_timeout_is_reported() {
        let (ours, _instrument) = duplex(256);
        let handle = spawn(ours, settings());

        let result = handle.query_all().await;

        assert!(matches!(result, Err(SerialPortError::Timeout(_))));
    }

    #[tokio::test]
    async fn requests_are_served_in_order() {
        let (ours, instrument) = duplex(256);
        let handle = spawn(ours, settings());
        let mut read = BufReader::new(instrument);

        let (a, b, c) = tokio::join!(handle.set_gms(1), handle.set_atc(2), handle.save());
        a.unwrap();
        b.unwrap();
        c.unwrap();

        let mut lines = vec![];
        for _ in 0..3 {
            let mut line = String::new();
            read.read_line(&mut line).await.unwrap();
            lines.push(line);
        }

        assert_eq!(lines, vec!["set gms=1\r\n", "set atc=2\r\n", "save\r\n"]);
    }

    #[tokio::test]
    async fn set_snd_is_visible_in_the_snapshot_when_it_returns() {
        let (ours, _instrument) = duplex(256);
        let handle = spawn(ours, settings());

        handle.set_snd(true).await.unwrap();

        assert_eq!(handle.snapshot().snd, Some(true));
    }

    #[tokio::test]
    async fn closed_serial_stream_fails_commands_but_keeps_running() {
        let (ours, instrument) = duplex(256);
        let handle = spawn(ours, settings());
        drop(instrument);

        assert!(handle.query_all().await.is_err());
        // Still alive and answering.
        assert!(matches!(
            handle.save().await,
            Err(SerialPortError::Disconnected)
        ));
        assert_eq!(handle.snapshot().cpm, None);
    }

    #[tokio::test]
    async fn read_error_reopens_and_keeps_the_cache() {
        let (first, mut first_instrument) = duplex(256);
        let (instruments_tx, mut instruments) = mpsc::unbounded_channel();

        let reopen: Reopen<Flaky> = Box::new(move || {
            let (ours, instrument) = duplex(256);
            instruments_tx.send(instrument).unwrap();
            async move { Flaky::steady(ours) }.boxed()
        });

        // Readings before the glitch must survive it.
        first_instrument.write_all(b"gms: 3\r\n").await.unwrap();
        let handle = spawn_reopening(Flaky::steady(first), settings(), reopen);
        wait_for(&handle, |state| state.gms == Some(3)).await;

        // End the first stream, then talk over the reopened one.
        drop(first_instrument);
        let mut instrument = instruments.recv().await.unwrap();

        instrument.write_all(b"42\r\n").await.unwrap();
        wait_for(&handle, |state| state.cpm == Some(42)).await;
        assert_eq!(handle.snapshot().gms, Some(3));

        handle.save().await.unwrap();
        let mut line = String::new();
        BufReader::new(instrument).read_line(&mut line).await.unwrap();
        assert_eq!(line, "save\r\n");
    }

    #[tokio::test]
    async fn transient_read_error_is_not_fatal() {
        let (first, _first_instrument) = duplex(256);
        let (instruments_tx, mut instruments) = mpsc::unbounded_channel();

        let reopen: Reopen<Flaky> = Box::new(move || {
            let (ours, instrument) = duplex(256);
            instruments_tx.send(instrument).unwrap();
            async move { Flaky::steady(ours) }.boxed()
        });

        let handle = spawn_reopening(Flaky::glitching(first), settings(), reopen);

        let mut instrument = instruments.recv().await.unwrap();
        instrument.write_all(b"42\r\n").await.unwrap();
        wait_for(&handle, |state| state.cpm == Some(42)).await;

        handle.set_gms(2).await.unwrap();
    }
}
