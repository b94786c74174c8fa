use std::fmt::Display;

/// Serial port related errors.
pub mod error;

/// Opening the physical serial port.
pub mod serial_port;

/// Codecs for encoding/decoding messages to/from wire.
pub mod codecs;

/// The owner of the serial channel.
pub mod bridge;

/// A directive sent to the instrument.
///
/// None of these are acknowledged directly.
/// Their effect shows up in later telemetry, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Ask for a full status dump, which ends with `hvg:`.
    Show,

    /// Persist the current settings on the instrument.
    Save,

    /// Set the gain/mode setting.
    SetGms(i64),

    /// Set the alarm threshold.
    SetAtc(i64),

    /// Enable or disable the buzzer.
    SetSnd(bool),
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Show => write!(f, "show"),
            Command::Save => write!(f, "save"),
            Command::SetGms(value) => write!(f, "set gms={value}"),
            Command::SetAtc(value) => write!(f, "set atc={value}"),
            Command::SetSnd(on) => write!(f, "set snd={}", if *on { "on" } else { "off" }),
        }
    }
}
