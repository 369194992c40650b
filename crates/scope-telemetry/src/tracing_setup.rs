//! Subscriber setup.
//!
//! One registry with an `EnvFilter` and either a pretty or a JSON fmt
//! layer. The global variant is meant for binaries; the scoped variant
//! installs the subscriber for the current thread only and is what tests
//! and embedded hosts use.

use tracing::dispatcher::DefaultGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Guard returned by the init functions. Dropping a scoped guard restores
/// the previous thread-local subscriber.
pub struct TracingGuard {
    service: String,
    scoped: Option<DefaultGuard>,
}

impl TracingGuard {
    /// Whether the subscriber is installed for this thread only.
    pub fn is_scoped(&self) -> bool {
        self.scoped.is_some()
    }
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        tracing::debug!(service = %self.service, "Tracing guard released");
    }
}

/// Parse the configured level into a filter.
pub fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(&config.log_level).map_err(|e| TelemetryError::Filter(e.to_string()))
}

fn build_subscriber(
    config: &TelemetryConfig,
) -> Result<impl tracing::Subscriber + Send + Sync + 'static, TelemetryError> {
    let filter = build_filter(config)?;

    // JSON output for containers
    let json_layer = (config.console_output && config.json_logs).then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });

    // Pretty output for development
    let pretty_layer = (config.console_output && !config.json_logs).then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(true)
    });

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(pretty_layer))
}

/// Install the subscriber process-wide.
pub fn init_tracing(config: &TelemetryConfig) -> Result<TracingGuard, TelemetryError> {
    build_subscriber(config)?
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        json = config.json_logs,
        level = %config.log_level,
        "Tracing initialized"
    );

    Ok(TracingGuard {
        service: config.service_name.clone(),
        scoped: None,
    })
}

/// Install the subscriber for the current thread until the guard drops.
pub fn init_scoped(config: &TelemetryConfig) -> Result<TracingGuard, TelemetryError> {
    let guard = build_subscriber(config)?.set_default();
    Ok(TracingGuard {
        service: config.service_name.clone(),
        scoped: Some(guard),
    })
}
