//! error.rs
//! Error taxonomy for the acquisition core.
//!
//! - Configuration: invalid frequency, channel list or calibration; fatal before acquisition starts.
//! - Hardware: gateway unreachable or channel misconfigured; fatal for the session.
//! - Io / Csv: persistence failures; the log is handed back so a retry can be attempted.
//!
//! Per-reading sensor faults are not errors. They travel as the `Quality` tag of a `Reading`.

use thiserror::Error;

pub type AcqResult<T> = Result<T, AcqError>;

#[derive(Error, Debug)]
pub enum AcqError {
    #[error("Configuration error in `{param}`: {reason}")]
    Configuration { param: &'static str, reason: String },

    #[error("Hardware error on {channel}: {reason}")]
    Hardware { channel: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration file could not be parsed: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Edge source error: {0}")]
    EdgeSource(String),
}

impl AcqError {
    pub fn configuration(param: &'static str, reason: impl Into<String>) -> Self {
        AcqError::Configuration {
            param,
            reason: reason.into(),
        }
    }

    pub fn hardware(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        AcqError::Hardware {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Session-fatal errors force the safety outputs off before they are surfaced.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, AcqError::Hardware { .. } | AcqError::EdgeSource(_))
    }
}
