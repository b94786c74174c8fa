use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::Error, scheduler::Settings};

/// The default HTTP port.
pub const DEFAULT_PORT: u16 = 80;

/// The default serial device.
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";

/// The instrument talks 8N1 at this rate.
pub const DEFAULT_BAUD: u32 = 9600;

/// The configuration used for running the server.
///
/// Every field may be left out of a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The serial device the instrument is attached to.
    /// Likely "/dev/ttyUSBx" or "COMx".
    pub serial_port: String,

    /// Baud rate of the serial device.
    pub baud: u32,

    /// The HTTP port to listen on.
    pub port: u16,

    /// Secret expected in `Authorization: Bearer <api_key>`.
    pub api_key: String,

    /// Seconds of silence after which the instrument is reported as
    /// disconnected.
    pub stale_after_secs: u64,

    /// Upper bound on a full status exchange, in milliseconds.
    pub query_timeout_ms: u64,

    /// Body of `GET /`.
    pub banner: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial_port: DEFAULT_SERIAL_PORT.into(),
            baud: DEFAULT_BAUD,
            port: DEFAULT_PORT,
            api_key: "changeme".into(),
            stale_after_secs: 10,
            query_timeout_ms: 3000,
            banner: "GC10 link\n".into(),
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Ok(Self::ron().from_str::<Config>(input)?)
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            serial_port: "/dev/ttyUSB1".into(),
            api_key: "some-long-random-secret".into(),
            banner: "Counter in the basement\n".into(),
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .unwrap_or_else(|e| format!("/* {e} */"))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let s = std::fs::read_to_string(p)?;

        Self::deserialize(&s)
    }

    /// Check that the configuration can be used.
    pub fn validate(&self) -> Result<(), Error> {
        if self.api_key.is_empty() {
            return Err(Error::BadConfig("The API key must not be empty".into()));
        }

        if self.baud == 0 {
            return Err(Error::BadConfig("The baud rate must not be zero".into()));
        }

        if self.stale_after_secs == 0 || self.query_timeout_ms == 0 {
            return Err(Error::BadConfig("Timeouts must not be zero".into()));
        }

        if self.serial_port.is_empty() {
            return Err(Error::BadConfig("No serial port given".into()));
        }

        Ok(())
    }

    /// Scheduler timing derived from this configuration.
    pub fn settings(&self) -> Settings {
        Settings {
            stale_after: Duration::from_secs(self.stale_after_secs),
            query_timeout: Duration::from_millis(self.query_timeout_ms),
            ..Default::default()
        }
    }
}
