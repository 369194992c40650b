//! Structured logging for kernel activity.
//!
//! Every line carries a `scope` field so log pipelines can group output by
//! plugin. The macros below are also exported for plugin authors.

use scope_kernel::{Context, Disposer, EventFilter, KernelEvent};

use crate::TelemetryConfig;

/// Helper to create structured log entries with consistent formatting.
#[macro_export]
macro_rules! log_scope_event {
    ($level:ident, $scope:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            target: "scope_events",
            scope = %$scope,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a lifecycle event of a runtime or fork with standard fields.
#[macro_export]
macro_rules! log_state_event {
    ($level:ident, $scope:expr, $msg:expr, $state:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            target: "scope_events",
            scope = %$scope,
            state = %$state,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a service binding event with standard fields.
#[macro_export]
macro_rules! log_service_event {
    ($level:ident, $msg:expr, $service:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            target: "scope_events",
            service = %$service,
            $($($field)*,)?
            $msg
        )
    };
}

/// Journal of kernel broadcasts.
pub struct EventLogger {
    service: String,
    log_payloads: bool,
}

impl EventLogger {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            service: config.service_name.clone(),
            log_payloads: config.log_payloads,
        }
    }

    /// Listen to every broadcast under `ctx`. The listener goes away when
    /// the returned handle is disposed or `ctx`'s state is cleared.
    pub fn attach(self, ctx: &Context) -> Disposer {
        tracing::debug!(service = %self.service, "Kernel event log attached");
        ctx.on(EventFilter::all(), move |event| self.record(event))
    }

    /// Write one event.
    pub fn record(&self, event: &KernelEvent) {
        match event {
            KernelEvent::Ready => {
                log_scope_event!(info, self.service, "Kernel ready");
            }
            KernelEvent::RuntimeCreated { runtime, plugin } => {
                log_state_event!(debug, plugin, "Runtime created", runtime);
            }
            KernelEvent::RuntimeDisposed { runtime, plugin } => {
                log_state_event!(debug, plugin, "Runtime disposed", runtime);
            }
            KernelEvent::ForkCreated { fork, plugin } => {
                log_state_event!(debug, plugin, "Fork created", fork);
            }
            KernelEvent::ForkDisposed { fork, plugin } => {
                log_state_event!(debug, plugin, "Fork disposed", fork);
            }
            KernelEvent::ConfigUpdated { state, config } => {
                log_state_event!(debug, self.service, "Config updated", state, config = %config);
            }
            KernelEvent::ServiceBound { name } => {
                log_service_event!(debug, "Service bound", name);
            }
            KernelEvent::ServiceUnbinding { name } => {
                log_service_event!(debug, "Service unbinding", name);
            }
            KernelEvent::Anomaly(anomaly) => {
                log_scope_event!(debug, self.service, "Anomaly reported", kind = anomaly.kind());
            }
            KernelEvent::PluginFailed {
                state,
                plugin,
                message,
            } => {
                log_state_event!(warn, plugin, "Plugin body failed", state, error = %message);
            }
            KernelEvent::Custom { name, payload } => {
                if self.log_payloads {
                    let payload = serde_json::to_string(payload).unwrap_or_default();
                    log_scope_event!(debug, self.service, "Custom event", event = %name, payload = %payload);
                } else {
                    log_scope_event!(debug, self.service, "Custom event", event = %name);
                }
            }
        }
    }
}
