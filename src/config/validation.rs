//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Check that related values agree (connect timeout within transfer timeout)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;

/// A single semantic problem, naming the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.address.trim().is_empty() {
        errors.push(ValidationError::new("listener.address", "must not be empty"));
    }
    if config.listener.port == 0 {
        errors.push(ValidationError::new("listener.port", "must be non-zero"));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "listener.request_timeout_secs",
            "must be greater than zero",
        ));
    }

    if config.target.address.trim().is_empty() {
        errors.push(ValidationError::new("target.address", "must not be empty"));
    }
    if config.target.port == 0 {
        errors.push(ValidationError::new("target.port", "must be non-zero"));
    }

    let engine = &config.engine;
    if engine.connect_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "engine.connect_timeout_ms",
            "must be greater than zero",
        ));
    }
    if engine.transfer_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "engine.transfer_timeout_ms",
            "must be greater than zero",
        ));
    }
    if engine.connect_timeout_ms > engine.transfer_timeout_ms {
        errors.push(ValidationError::new(
            "engine.connect_timeout_ms",
            format!(
                "{}ms exceeds transfer timeout of {}ms",
                engine.connect_timeout_ms, engine.transfer_timeout_ms
            ),
        ));
    }

    if config.response.server_name.trim().is_empty() {
        errors.push(ValidationError::new("response.server_name", "must not be empty"));
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
