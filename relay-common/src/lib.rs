//! Relay Common - Shared configuration, errors, and logging for the chat relay.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - Error taxonomy with HTTP status mapping
//! - Logging setup and trace ID helpers

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::{Config, ConfigSource, ModelConfig, ObservabilityConfig, ServerConfig, SessionConfig};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};
