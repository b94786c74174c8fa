//! A mock instrument, useful to run and test the server without a GC10 attached.
//!
//! The mock speaks the same line protocol over an in-memory stream:
//! it answers `show` with a full dump, applies `set` commands, accepts `save`
//! and can emit counts on its own.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::{
    io::{duplex, DuplexStream},
    sync::{broadcast, mpsc, watch},
    time::MissedTickBehavior,
};
use tokio_util::codec::Framed;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::serial::codecs::lines::LinesCodec;

/// What the mock currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockSettings {
    /// Reported as `ttc:`.
    pub ttc: i64,

    /// Reported as `gms:`.
    pub gms: i64,

    /// Reported as `atc:`.
    pub atc: i64,

    /// Reported as `hvg:`.
    pub hvg: i64,

    /// Buzzer. Never reported.
    pub snd: bool,

    /// How many times `save` was received.
    pub saves: usize,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            ttc: 60,
            gms: 1,
            atc: 100,
            hvg: 400,
            snd: false,
            saves: 0,
        }
    }
}

impl MockSettings {
    fn apply(&mut self, command: &str) -> bool {
        if command == "save" {
            self.saves += 1;
            return true;
        }

        let Some((key, value)) = command
            .strip_prefix("set ")
            .and_then(|assignment| assignment.split_once('='))
        else {
            return false;
        };

        match (key, value) {
            ("snd", "on") => self.snd = true,
            ("snd", "off") => self.snd = false,
            ("gms", value) | ("atc", value) => {
                let Ok(value) = value.parse() else {
                    return false;
                };

                if key == "gms" {
                    self.gms = value;
                } else {
                    self.atc = value;
                }
            }
            _ => return false,
        }

        true
    }

    fn dump(&self) -> [String; 5] {
        [
            "GC10 settings".into(),
            format!("ttc: {}", self.ttc),
            format!("gms: {}", self.gms),
            format!("atc: {}", self.atc),
            format!("hvg: {}", self.hvg),
        ]
    }
}

/// Builder for a [`MockHandle`].
#[derive(Debug, Default)]
pub struct MockBuilder {
    settings: MockSettings,
    counts: Option<(Duration, i64)>,
    silent: bool,
}

impl MockBuilder {
    /// A mock with default settings, which only speaks when spoken to.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from these settings.
    pub fn settings(mut self, settings: MockSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Emit `cpm` as a bare count every `period`.
    pub fn counts(mut self, period: Duration, cpm: i64) -> Self {
        self.counts = Some((period, cpm));
        self
    }

    /// Never say anything, not even in reply to `show`.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Start the mock.
    ///
    /// Returns the stream to hand to the bridge, and a handle to observe and
    /// poke the mock.
    #[must_use]
    pub fn build(self) -> (DuplexStream, MockHandle) {
        info!(?self, "Running mock instrument");

        let (ours, theirs) = duplex(1024);

        let (commands_tx, _) = broadcast::channel(64);
        let (state_tx, state_rx) = watch::channel(self.settings.clone());
        let (emit_tx, emit_rx) = mpsc::unbounded_channel();

        let mock = Mock {
            lines: Framed::new(ours, LinesCodec::default()),
            commands: commands_tx.clone(),
            state: state_tx,
            emit: emit_rx,
            counts: self.counts,
            silent: self.silent,
        };

        tokio::spawn(mock.run().instrument(info_span!("mock")));

        (
            theirs,
            MockHandle {
                commands: commands_tx,
                state: state_rx,
                emit: emit_tx,
            },
        )
    }
}

/// Observes and controls a running mock.
#[derive(Debug, Clone)]
pub struct MockHandle {
    commands: broadcast::Sender<String>,
    state: watch::Receiver<MockSettings>,
    emit: mpsc::UnboundedSender<String>,
}

impl MockHandle {
    /// Every command line the mock receives from now on.
    pub fn commands(&self) -> broadcast::Receiver<String> {
        self.commands.subscribe()
    }

    /// The mock's current settings.
    pub fn settings(&self) -> MockSettings {
        self.state.borrow().clone()
    }

    /// Make the mock put an arbitrary line on the wire.
    /// Silent mocks do this too.
    pub fn emit(&self, line: impl Into<String>) {
        if self.emit.send(line.into()).is_err() {
            warn!("Mock is gone, line not emitted");
        }
    }
}

struct Mock {
    lines: Framed<DuplexStream, LinesCodec>,
    commands: broadcast::Sender<String>,
    state: watch::Sender<MockSettings>,
    emit: mpsc::UnboundedReceiver<String>,
    counts: Option<(Duration, i64)>,
    silent: bool,
}

impl Mock {
    async fn run(mut self) {
        let (period, cpm) = self.counts.unwrap_or((Duration::from_secs(3600), 0));
        let mut counts = tokio::time::interval(period);
        counts.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick is immediate.
        counts.tick().await;

        let mut can_emit = true;

        loop {
            tokio::select! {
                command = self.lines.next() => match command {
                    Some(Ok(command)) => self.on_command(command).await,
                    Some(Err(e)) => warn!(%e, "Mock could not read"),
                    None => break,
                },
                line = self.emit.recv(), if can_emit => match line {
                    Some(line) => self.put(line).await,
                    None => can_emit = false,
                },
                _ = counts.tick(), if self.counts.is_some() && !self.silent => {
                    self.put(cpm.to_string()).await;
                }
            }
        }

        debug!("Mock instrument stopped");
    }

    async fn put(&mut self, line: String) {
        trace!(%line, "Mock says");

        if let Err(e) = self.lines.send(line).await {
            warn!(%e, "Mock could not write");
        }
    }

    async fn on_command(&mut self, command: String) {
        debug!(%command, "Mock got");

        // Nobody listening is fine.
        let _ = self.commands.send(command.clone());

        if command == "show" {
            if self.silent {
                return;
            }

            let dump = self.state.borrow().dump();
            for line in dump {
                self.put(line).await;
            }
            return;
        }

        let mut applied = false;
        self.state.send_modify(|state| applied = state.apply(&command));

        if !applied {
            warn!(%command, "Mock does not understand");
        }
    }
}
