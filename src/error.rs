//! Error types.

use thiserror::Error;

/// Contract violations of [`RateTracker`](crate::RateTracker) and [`Measure`](crate::Measure).
/// These point at a programming error or a misbehaving clock and should not be ignored.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeasureError {
    #[error("sample at {timestamp}ms is out of order, previous sample was recorded at {previous}ms")]
    OutOfOrderSample { timestamp: i64, previous: i64 },

    #[error("cannot add a dynamic measure value when the key of the dynamic measure is empty")]
    MissingDynamicKey,

    #[error("cannot add a dynamic measure value when the name of the dynamic measure is not set")]
    MissingDynamicName,
}

impl MeasureError {
    /// Whether the error is a violated precondition of the caller, as opposed to invalid
    /// tracker state.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::MissingDynamicKey | Self::MissingDynamicName)
    }
}

/// Top-level error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Measure error: {0}")]
    Measure(#[from] MeasureError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Had HTTP status {status} for request: {url}, response: {reason}")]
    Status {
        url: String,
        status: u16,
        reason: String,
    },

    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
