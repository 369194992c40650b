//! # Scope Telemetry
//!
//! Logging setup for hosts embedding the scope kernel.
//!
//! ## Components
//!
//! - `tracing` subscriber with an `EnvFilter` and a pretty or JSON fmt layer
//! - [`EventLogger`]: a kernel listener that journals every broadcast
//! - `log_*_event!` macros with consistent structured fields
//!
//! ## Usage
//!
//! ```rust,ignore
//! use scope_telemetry::{TelemetryConfig, init_telemetry};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let _guard = init_telemetry(config).expect("Failed to init telemetry");
//!
//!     // Your application code here
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SCOPE_SERVICE_NAME` | `scope-kernel` | Service name in logs |
//! | `SCOPE_LOG_LEVEL` | `info` | Log level filter |
//! | `SCOPE_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `SCOPE_JSON_LOGS` | `false` | JSON output (on by default in containers) |
//! | `SCOPE_LOG_PAYLOADS` | `false` | Include custom event payloads |

mod config;
mod logging;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use logging::EventLogger;
pub use tracing_setup::{build_filter, init_scoped, init_tracing, TracingGuard};

use scope_kernel::{Context, Disposer};
use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(String),

    #[error("Invalid log filter: {0}")]
    Filter(String),
}

/// Install the process-wide subscriber.
///
/// Returns a guard that should be held for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let tracing_guard = tracing_setup::init_tracing(&config)?;
    Ok(TelemetryGuard {
        config,
        _tracing: tracing_guard,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    config: TelemetryConfig,
    _tracing: TracingGuard,
}

impl TelemetryGuard {
    /// Journal the kernel events of `ctx` with this guard's settings.
    pub fn journal(&self, ctx: &Context) -> Disposer {
        EventLogger::new(&self.config).attach(ctx)
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}

/// Convenience macro for creating a span with plugin context.
///
/// # Example
///
/// ```rust,ignore
/// use scope_telemetry::scope_span;
///
/// fn reload() {
///     let _span = scope_span!("reload", plugin = "db", state = 3).entered();
/// }
/// ```
#[macro_export]
macro_rules! scope_span {
    ($name:expr, $($field:tt)*) => {
        tracing::info_span!($name, $($field)*)
    };
}
