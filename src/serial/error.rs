use std::{io, time::Duration};

use thiserror::Error;

/// Errors relating to the serial channel and the bridge that owns it.
#[derive(Debug, Error)]
pub enum SerialPortError {
    /// IO related errors.
    #[error("Underlying IO problem")]
    IO(#[from] io::Error),

    /// The byte stream from the instrument ended.
    #[error("Serial port disconnected")]
    Disconnected,

    /// The instrument did not finish its reply in time.
    #[error("Instrument did not reply within {0:?}")]
    Timeout(Duration),

    /// The scheduler task owning the serial channel is gone.
    #[error("The serial bridge is not running")]
    BridgeStopped,
}
