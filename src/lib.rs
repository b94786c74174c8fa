#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

/// The HTTP routes and their handlers.
pub mod api;

/// The command line interface.
pub mod cli;

/// Relates to config files.
pub mod config;

/// Line classification and the cached view of the instrument.
pub mod device;

/// Possible errors in this library.
pub mod error;

/// The minimal HTTP server the API is served with.
pub mod http;

/// Logging/tracing setup.
pub mod logging;

/// Simulated instrument.
pub mod mock;

/// Runs the serial bridge and serves requests to it.
pub mod scheduler;

/// Serial port driver.
pub mod serial;

/// Code relating to setting up the server which accepts connections and
/// spawns handlers for them.
pub mod server;
