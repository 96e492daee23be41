//! Error taxonomy for engine calls.
//!
//! Only two kinds of failure are fatal to a call:
//! - [`EngineError::Config`]: an option outside its documented range.
//! - [`EngineError::Data`]: a snapshot that is internally inconsistent.
//!
//! Everything else is a graceful path: all-zero exposure returns a
//! well-formed `collecting_data` result, and a degenerate historical prior
//! silently falls back to the platform default.

use thiserror::Error;

/// Fatal errors surfaced to the caller. The engine never retries and never
/// logs; diagnostics travel as fields of the result.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A configuration option is outside its documented range.
    #[error("config option `{option}` out of range: {reason}")]
    Config {
        /// The offending option name.
        option: &'static str,
        /// Human-readable description of the violation.
        reason: String,
    },

    /// The snapshot is internally inconsistent (counts, keys, or non-finite
    /// numeric inputs).
    #[error("invalid snapshot data: {0}")]
    Data(String),
}

impl EngineError {
    pub(crate) fn config(option: &'static str, reason: impl Into<String>) -> Self {
        Self::Config {
            option,
            reason: reason.into(),
        }
    }

    pub(crate) fn data(reason: impl Into<String>) -> Self {
        Self::Data(reason.into())
    }
}
