//! The cached view of the instrument.
//!
//! Every line the instrument emits is classified here. Lines carrying a
//! reading overwrite the matching field of [`DeviceState`]; anything else is
//! ignored.

use std::{fmt::Display, num::ParseIntError, time::Duration};

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

/// How long the instrument may stay quiet before it is considered gone.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(10);

/// A tagged field in the instrument's status dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// `ttc:`
    Ttc,

    /// `gms:`, the gain/mode setting.
    Gms,

    /// `atc:`, the alarm threshold.
    Atc,

    /// `hvg:`, the high voltage reading.
    /// Always the last line of a full dump.
    Hvg,
}

impl Field {
    /// Every tagged field, in dump order.
    pub const ALL: [Field; 4] = [Field::Ttc, Field::Gms, Field::Atc, Field::Hvg];

    /// The tag as it appears on the wire.
    pub fn tag(&self) -> &'static str {
        match self {
            Field::Ttc => "ttc",
            Field::Gms => "gms",
            Field::Atc => "atc",
            Field::Hvg => "hvg",
        }
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// A reading recognized in a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    /// A bare number, counts per minute.
    Cpm(i64),

    /// A tagged field.
    Field(Field, i64),
}

/// A line looked like a reading but its value was unusable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A tag was recognized but the remainder is not a decimal integer.
    #[error("Field `{field}` carries a bad value `{value}`: {problem}")]
    BadField {
        /// The tagged field.
        field: Field,

        /// The text following the tag.
        value: String,

        /// Why parsing failed.
        problem: ParseIntError,
    },

    /// A run of digits which does not fit a count.
    #[error("Count `{value}` is not usable: {problem}")]
    BadCount {
        /// The digits.
        value: String,

        /// Why parsing failed.
        problem: ParseIntError,
    },
}

/// Classify one line of instrument output.
///
/// `Ok(None)` means the line is outside the monitored set.
pub fn classify(line: &str) -> Result<Option<Reading>, ProtocolError> {
    if !line.is_empty() && line.bytes().all(|byte| byte.is_ascii_digit()) {
        return line
            .parse()
            .map(|cpm| Some(Reading::Cpm(cpm)))
            .map_err(|problem| ProtocolError::BadCount {
                value: line.to_owned(),
                problem,
            });
    }

    for field in Field::ALL {
        let Some(value) = line
            .strip_prefix(field.tag())
            .and_then(|rest| rest.strip_prefix(": "))
        else {
            continue;
        };

        return value
            .parse()
            .map(|value| Some(Reading::Field(field, value)))
            .map_err(|problem| ProtocolError::BadField {
                field,
                value: value.to_owned(),
                problem,
            });
    }

    Ok(None)
}

/// Does this line end a full status dump?
pub fn is_sentinel(line: &str) -> bool {
    line.starts_with("hvg:")
}

/// Whether the instrument is talking to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// A line arrived recently.
    Ok,

    /// Nothing arrived for at least the staleness timeout.
    Disconnected,
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Ok => write!(f, "ok"),
            Status::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Last known readings of the instrument.
///
/// Fields are `None` until the instrument has reported them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    /// Counts per minute.
    pub cpm: Option<i64>,

    /// See [`Field::Ttc`].
    pub ttc: Option<i64>,

    /// See [`Field::Gms`].
    pub gms: Option<i64>,

    /// See [`Field::Atc`].
    pub atc: Option<i64>,

    /// See [`Field::Hvg`].
    pub hvg: Option<i64>,

    /// Whether the buzzer is enabled.
    /// Only known once it has been set through us.
    pub snd: Option<bool>,

    /// When the last line arrived.
    pub last_seen: Option<Instant>,
}

impl DeviceState {
    /// Classify a line and store any reading it carries.
    ///
    /// On error nothing is changed.
    pub fn classify_and_apply(&mut self, line: &str) -> Result<Option<Reading>, ProtocolError> {
        let reading = classify(line)?;

        match reading {
            Some(Reading::Cpm(cpm)) => self.cpm = Some(cpm),
            Some(Reading::Field(field, value)) => *self.field_mut(field) = Some(value),
            None => {}
        }

        Ok(reading)
    }

    fn field_mut(&mut self, field: Field) -> &mut Option<i64> {
        match field {
            Field::Ttc => &mut self.ttc,
            Field::Gms => &mut self.gms,
            Field::Atc => &mut self.atc,
            Field::Hvg => &mut self.hvg,
        }
    }

    /// Record that the instrument produced a line at `now`.
    pub fn mark_seen(&mut self, now: Instant) {
        self.last_seen = Some(now);
    }

    /// Liveness at `now`.
    /// `None` if the instrument has never been heard from.
    pub fn status_at(&self, now: Instant, stale_after: Duration) -> Option<Status> {
        let last_seen = self.last_seen?;

        if now.saturating_duration_since(last_seen) < stale_after {
            Some(Status::Ok)
        } else {
            Some(Status::Disconnected)
        }
    }
}

/// What `/status` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// Liveness, `null` before anything was heard.
    pub status: Option<Status>,

    /// Seconds since the bridge started.
    pub uptime: u64,

    /// See [`DeviceState::cpm`].
    pub cpm: Option<i64>,

    /// See [`DeviceState::ttc`].
    pub ttc: Option<i64>,

    /// See [`DeviceState::gms`].
    pub gms: Option<i64>,

    /// See [`DeviceState::atc`].
    pub atc: Option<i64>,

    /// See [`DeviceState::hvg`].
    pub hvg: Option<i64>,

    /// See [`DeviceState::snd`].
    pub snd: Option<bool>,
}

impl Snapshot {
    /// Take a snapshot of `state` as seen at `now`.
    pub fn new(state: &DeviceState, now: Instant, started: Instant, stale_after: Duration) -> Self {
        Self {
            status: state.status_at(now, stale_after),
            uptime: now.saturating_duration_since(started).as_secs(),
            cpm: state.cpm,
            ttc: state.ttc,
            gms: state.gms,
            atc: state.atc,
            hvg: state.hvg,
            snd: state.snd,
        }
    }
}
