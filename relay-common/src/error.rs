//! Error types for the chat relay.

use thiserror::Error;

/// Result type alias using the relay error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for relay services.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed request fields
    #[error("{0}")]
    Validation(String),

    /// Required configuration (e.g. the model credential) is absent
    #[error("{0}")]
    Configuration(String),

    /// The remote model service failed
    #[error("{0}")]
    Upstream(String),
}

impl Error {
    /// Check if this is a validation error.
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is a configuration error.
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Get HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Configuration(_) => 500,
            Self::Upstream(_) => 502,
        }
    }

    /// Stable machine-readable code, sent alongside the message in error bodies.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Configuration(_) => "configuration_error",
            Self::Upstream(_) => "upstream_error",
        }
    }
}
