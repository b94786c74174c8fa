//! The serial bridge owns the byte stream to the instrument.
//!
//! It classifies incoming lines into the [`DeviceState`] and writes
//! [`Command`]s. Only one bridge exists per channel, and it is driven by the
//! [`crate::scheduler`], so passive reads and command exchanges never overlap.

use std::time::Duration;

use bytes::BytesMut;
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
    time::Instant,
};
use tokio_util::codec::{Framed, FramedParts};
use tracing::{debug, trace, warn};

use crate::{
    device::{self, DeviceState, Reading},
    serial::{codecs::lines::LinesCodec, error::SerialPortError, Command},
};

/// Read buffers above this size are shrunk when idle.
const COMPACT_ABOVE: usize = 1024;

/// What an idle read buffer is shrunk to.
const COMPACTED_CAPACITY: usize = 128;

/// Reads telemetry from and writes commands to one instrument.
pub struct SerialBridge<T> {
    lines: Framed<T, LinesCodec>,
    state: watch::Sender<DeviceState>,
    closed: bool,
}

impl<T> SerialBridge<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a byte stream. All readings are published on `state`.
    pub fn new(io: T, state: watch::Sender<DeviceState>) -> Self {
        Self {
            lines: Framed::new(io, LinesCodec::default()),
            state,
            closed: false,
        }
    }

    /// Has the instrument side of the stream ended or failed?
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Continue on a fresh stream, such as a reopened port.
    ///
    /// The device state is kept. Anything buffered from the old stream is lost.
    pub fn replace_io(&mut self, io: T) {
        debug!("Bridge continues on a new stream");
        self.lines = Framed::new(io, LinesCodec::default());
        self.closed = false;
    }

    /// Ingest one line if it is available right now, without waiting.
    ///
    /// Returns `Ok(None)` when no complete line could be read.
    pub fn poll_once(&mut self) -> Result<Option<String>, SerialPortError> {
        if self.closed {
            return Ok(None);
        }

        match self.lines.next().now_or_never() {
            None => Ok(None),
            Some(next) => {
                let line = self.take(next)?;
                self.ingest(&line);
                Ok(Some(line))
            }
        }
    }

    /// Wait for the next line. Has no timeout of its own.
    ///
    /// The line is not classified; see [`SerialBridge::ingest`].
    pub async fn next_line(&mut self) -> Result<String, SerialPortError> {
        if self.closed {
            return Err(SerialPortError::Disconnected);
        }

        let next = self.lines.next().await;
        self.take(next)
    }

    fn take(
        &mut self,
        next: Option<Result<String, SerialPortError>>,
    ) -> Result<String, SerialPortError> {
        match next {
            Some(Ok(line)) => Ok(line),
            // The framed stream yields nothing more after an error.
            Some(Err(e)) => {
                warn!(%e, "Serial stream failed");
                self.closed = true;
                Err(e)
            }
            None => {
                warn!("Serial stream ended");
                self.closed = true;
                Err(SerialPortError::Disconnected)
            }
        }
    }

    /// Record liveness and apply whatever reading the line carries.
    ///
    /// Malformed readings are dropped with a warning.
    pub fn ingest(&mut self, line: &str) {
        trace!(%line, "From instrument");
        let now = Instant::now();

        self.state.send_modify(|state| {
            state.mark_seen(now);

            match state.classify_and_apply(line) {
                Ok(Some(Reading::Cpm(cpm))) => trace!(%cpm, "Count"),
                Ok(Some(Reading::Field(field, value))) => debug!(%field, %value, "Field"),
                Ok(None) => trace!("Not a reading"),
                Err(e) => warn!(%e, "Dropping malformed line"),
            }
        });
    }

    /// Put a command on the wire. Does not wait for any reply.
    pub async fn send(&mut self, command: Command) -> Result<(), SerialPortError> {
        if self.closed {
            return Err(SerialPortError::Disconnected);
        }

        debug!(%command, "To instrument");
        self.lines.send(command.to_string()).await
    }

    /// Ask for a full dump and read until its last line.
    ///
    /// Lines read along the way are ingested as usual, including any
    /// unrelated telemetry.
    pub async fn query_all(&mut self, timeout: Duration) -> Result<(), SerialPortError> {
        self.send(Command::Show).await?;

        let exchange = async {
            loop {
                let line = self.next_line().await?;
                self.ingest(&line);

                if device::is_sentinel(&line) {
                    return Ok::<_, SerialPortError>(());
                }
            }
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!(?timeout, "Instrument did not finish its dump");
                Err(SerialPortError::Timeout(timeout))
            }
        }
    }

    /// Set the gain/mode setting.
    pub async fn set_gms(&mut self, value: i64) -> Result<(), SerialPortError> {
        self.send(Command::SetGms(value)).await
    }

    /// Set the alarm threshold.
    pub async fn set_atc(&mut self, value: i64) -> Result<(), SerialPortError> {
        self.send(Command::SetAtc(value)).await
    }

    /// Switch the buzzer.
    ///
    /// The instrument never reports this setting, so the cache is
    /// updated as soon as the command is written.
    pub async fn set_snd(&mut self, on: bool) -> Result<(), SerialPortError> {
        self.send(Command::SetSnd(on)).await?;
        self.state.send_modify(|state| state.snd = Some(on));

        Ok(())
    }

    /// Persist settings on the instrument.
    pub async fn save(&mut self) -> Result<(), SerialPortError> {
        self.send(Command::Save).await
    }

    /// Run a command through the matching operation.
    pub async fn execute(&mut self, command: Command) -> Result<(), SerialPortError> {
        match command {
            Command::SetGms(value) => self.set_gms(value).await,
            Command::SetAtc(value) => self.set_atc(value).await,
            Command::SetSnd(on) => self.set_snd(on).await,
            Command::Save => self.save().await,
            Command::Show => self.send(Command::Show).await,
        }
    }

    /// Release an oversized read buffer if nothing is pending in it.
    ///
    /// Returns true if memory was released.
    pub fn compact(&mut self) -> bool {
        let buffer = self.lines.read_buffer();
        if !buffer.is_empty() || buffer.capacity() <= COMPACT_ABOVE {
            return false;
        }

        debug!(capacity = buffer.capacity(), "Releasing read buffer");
        *self.lines.read_buffer_mut() = BytesMut::with_capacity(COMPACTED_CAPACITY);

        true
    }

    /// Take the underlying stream back, along with anything still buffered.
    pub fn into_parts(self) -> FramedParts<T, LinesCodec> {
        self.lines.into_parts()
    }
}
