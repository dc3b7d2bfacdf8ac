//! Configuration validation.
//!
//! A missing model credential is deliberately not checked here: it must not
//! prevent startup and only surfaces when a chat request needs it.

use thiserror::Error;

use crate::config::{Config, ModelConfig, ObservabilityConfig, ServerConfig, SessionConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16 },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    fn validate(&self) -> ValidationResult<()>;
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["json", "pretty"];

impl Validate for ServerConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort { port: self.port });
        }
        if self.bind.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "server.bind".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ModelConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.default_model.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "model.default_model".into(),
            });
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ValidationError::InvalidValue {
                field: "model.base_url".into(),
                reason: format!("'{}' is not an http(s) URL", self.base_url),
            });
        }
        Ok(())
    }
}

impl Validate for SessionConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.max_turns == 0 {
            return Err(ValidationError::InvalidValue {
                field: "session.max_turns".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("expected one of {LOG_LEVELS:?}"),
            });
        }
        if !LOG_FORMATS.contains(&self.log_format.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("expected one of {LOG_FORMATS:?}"),
            });
        }
        Ok(())
    }
}

impl Validate for Config {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors: Vec<ValidationError> = [
            self.server.validate(),
            self.model.validate(),
            self.session.validate(),
            self.observability.validate(),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn missing_api_key_is_not_an_error() {
        let mut config = Config::default();
        config.model.api_key = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidPort { port: 0 })
        ));
    }

    #[test]
    fn zero_max_turns_is_rejected() {
        let mut config = Config::default();
        config.session.max_turns = 0;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidValue { ref field, .. }) if field == "session.max_turns"
        ));
    }

    #[test]
    fn errors_are_collected() {
        let mut config = Config::default();
        config.server.port = 0;
        config.observability.log_format = "xml".into();
        config.model.default_model = String::new();

        match config.validate() {
            Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected Multiple, got {other:?}"),
        }
    }
}
