//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the sidecar.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::admission::BreakerParams;

/// Queue depth per unit of container concurrency when none is configured.
pub const DEFAULT_QUEUE_DEPTH_FACTOR: usize = 10;

/// Root configuration for the sidecar.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SidecarConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// The single backing application process.
    pub backend: BackendConfig,

    /// Admission control (breaker) settings.
    pub admission: AdmissionConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Freezer relay for pause/resume.
    pub freezer: FreezerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8012").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8012".to_string(),
        }
    }
}

/// Backing application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend address (e.g., "127.0.0.1:8080").
    pub address: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Admission control configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum concurrent requests forwarded to the backend. 0 = unbounded.
    pub container_concurrency: usize,

    /// Callers allowed to wait once saturated.
    /// Defaults to `DEFAULT_QUEUE_DEPTH_FACTOR * container_concurrency`.
    pub queue_depth: Option<usize>,

    /// Starting capacity. Defaults to `container_concurrency`.
    pub initial_capacity: Option<usize>,

    /// Longest a request may wait in the queue, in milliseconds.
    pub queue_timeout_ms: Option<u64>,
}

impl AdmissionConfig {
    /// Breaker parameters, or `None` when concurrency is unbounded.
    pub fn breaker_params(&self) -> Option<BreakerParams> {
        if self.container_concurrency == 0 {
            return None;
        }

        Some(BreakerParams {
            queue_depth: self
                .queue_depth
                .unwrap_or(DEFAULT_QUEUE_DEPTH_FACTOR * self.container_concurrency),
            max_concurrency: self.container_concurrency,
            initial_capacity: self.initial_capacity(),
        })
    }

    pub fn initial_capacity(&self) -> usize {
        self.initial_capacity.unwrap_or(self.container_concurrency)
    }

    pub fn queue_timeout(&self) -> Option<Duration> {
        self.queue_timeout_ms.map(Duration::from_millis)
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout to the backend in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 300,
        }
    }
}

/// Freezer relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FreezerConfig {
    /// Endpoint receiving pause/resume actions. Disabled when absent.
    pub endpoint: Option<String>,

    /// File holding the token sent in the `Token` header.
    pub token_path: Option<String>,

    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for FreezerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token_path: None,
            timeout_ms: 5_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format ("pretty" or "json").
    pub log_format: String,

    /// Emit a span per proxied request.
    pub trace_requests: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            trace_requests: true,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9091".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8022".to_string(),
        }
    }
}
