//! Telemetry configuration from environment variables.

use serde::{Deserialize, Serialize};
use std::env;

/// Configuration for the logging stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error) or a full
    /// `EnvFilter` directive string
    pub log_level: String,

    /// Whether to enable console output
    pub console_output: bool,

    /// Whether to enable JSON formatted logs
    pub json_logs: bool,

    /// Include payloads of custom events in the kernel event log
    pub log_payloads: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "scope-kernel".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            log_payloads: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SCOPE_SERVICE_NAME`: Service name (default: scope-kernel)
    /// - `SCOPE_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `SCOPE_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `SCOPE_JSON_LOGS`: Enable JSON logs (default: false in dev, true in containers)
    /// - `SCOPE_LOG_PAYLOADS`: Log custom event payloads (default: false)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("SCOPE_SERVICE_NAME")
                .unwrap_or_else(|_| "scope-kernel".to_string()),

            log_level: env::var("SCOPE_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("SCOPE_CONSOLE_OUTPUT")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),

            json_logs: env::var("SCOPE_JSON_LOGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(is_container),

            log_payloads: env::var("SCOPE_LOG_PAYLOADS")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
        }
    }

    /// Configuration for one embedding application.
    pub fn for_service(name: &str) -> Self {
        let mut config = Self::from_env();
        config.service_name = name.to_string();
        config
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
