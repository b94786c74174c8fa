use std::io;

use axum::http::StatusCode;
use thiserror::Error;

use crate::serial::error::SerialPortError;

/// Errors thay may occur in this library.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration can not be used.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// The request could not be understood.
    #[error("The request did not conform to valid usage. Problem: `{0}`")]
    BadRequest(String),

    /// A body was expected but its length is unknown.
    #[error("The request body needs a Content-Length header")]
    LengthRequired,

    /// A form field is missing or unusable.
    #[error("Form field `{key}` is not usable. Problem: {problem}")]
    BadForm {
        /// The field.
        key: String,

        /// What is wrong with it.
        problem: String,
    },

    /// The request was refused with this status.
    #[error("Request refused with status {0}")]
    Rejected(StatusCode),

    /// A handler panicked.
    #[error("The handler panicked")]
    HandlerPanicked,

    /// Talking to the instrument failed.
    #[error("Instrument problem: {0}")]
    Serial(#[from] SerialPortError),

    /// IO on the connection failed.
    #[error("Underlying IO problem")]
    IO(#[from] io::Error),

    /// A response could not be serialized.
    #[error("Problem with JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A configuration file could not be parsed.
    #[error("Problem with RON: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

impl Error {
    /// The status to answer with, if nothing was written yet.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) | Error::BadForm { .. } => StatusCode::BAD_REQUEST,
            Error::LengthRequired => StatusCode::LENGTH_REQUIRED,
            Error::Rejected(status) => *status,
            Error::Serial(SerialPortError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            Error::Serial(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::BadConfig(_)
            | Error::HandlerPanicked
            | Error::IO(_)
            | Error::Json(_)
            | Error::Ron(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the message if this is a [`Error::BadConfig`].
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }
}
