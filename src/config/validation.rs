//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, endpoints and value ranges
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SidecarConfig → Result<(), Vec<ValidationError>>
//! - `initial_capacity > container_concurrency` is not an error; the breaker clamps it

use std::net::SocketAddr;

use axum::http::Uri;

use crate::config::schema::SidecarConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    Address { field: &'static str, value: String },
    #[error("freezer.endpoint: invalid http URI {0:?}")]
    FreezerEndpoint(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("admin.api_key must be set when the admin API is enabled")]
    MissingApiKey,
    #[error("observability.log_format: unknown format {0:?}")]
    LogFormat(String),
}

pub fn validate_config(config: &SidecarConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_address(&mut errors, "backend.address", &config.backend.address);
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::MissingApiKey);
        }
    }

    if let Some(endpoint) = &config.freezer.endpoint {
        let valid = endpoint
            .parse::<Uri>()
            .map(|uri| uri.scheme_str() == Some("http") && uri.authority().is_some())
            .unwrap_or(false);
        if !valid {
            errors.push(ValidationError::FreezerEndpoint(endpoint.clone()));
        }
        if config.freezer.timeout_ms == 0 {
            errors.push(ValidationError::Zero("freezer.timeout_ms"));
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.request_secs"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.connect_secs"));
    }
    if config.admission.queue_timeout_ms == Some(0) {
        errors.push(ValidationError::Zero("admission.queue_timeout_ms"));
    }

    match config.observability.log_format.as_str() {
        "pretty" | "json" => {}
        other => errors.push(ValidationError::LogFormat(other.to_string())),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::Address {
            field,
            value: value.to_string(),
        });
    }
}
