//! Error taxonomy shared by every engine operation.

use thiserror::Error;

/// Errors surfaced by the erosion engine.
///
/// Only [`ErosionError::ExternalAssetMissing`] is ever recovered locally (a
/// missing hardness or water-source image behaves like a neutral map); all
/// other variants abort the current operation without touching the map cache.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ErosionError {
    /// A field allocation would exceed the configured memory budget.
    #[error("resource exhausted: requested {requested} bytes with {in_use} of {budget} bytes in use")]
    ResourceExhausted {
        /// Bytes requested by the failing allocation
        requested: u64,
        /// Bytes already held by live fields
        in_use: u64,
        /// Configured budget
        budget: u64,
    },

    /// A solver ran without a prepared height field, or a map id was stale.
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// Fields exported to images must have one or four channels.
    #[error("unsupported channel count: {0}")]
    UnsupportedChannelCount(u8),

    /// A referenced auxiliary image no longer exists.
    #[error("external asset missing: {0}")]
    ExternalAssetMissing(String),

    /// Settings or configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Compute backend failure (device lost, readback failed, ...).
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for ErosionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl ErosionError {
    pub(crate) fn invalid_source(msg: impl Into<String>) -> Self {
        Self::InvalidSource(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ErosionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = ErosionError::ResourceExhausted {
            requested: 16,
            in_use: 8,
            budget: 20,
        };
        assert_eq!(
            err.to_string(),
            "resource exhausted: requested 16 bytes with 8 of 20 bytes in use"
        );
        assert_eq!(
            ErosionError::UnsupportedChannelCount(3).to_string(),
            "unsupported channel count: 3"
        );
        assert_eq!(
            ErosionError::invalid_source("no base map").to_string(),
            "invalid source: no base map"
        );
    }
}
