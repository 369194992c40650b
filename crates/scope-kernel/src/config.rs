//! # Kernel Configuration
//!
//! Runtime switches for the kernel itself. Plugin configuration is not
//! described here; plugins receive plain JSON values.

use serde::{Deserialize, Serialize};
use std::env;

/// Kernel-wide behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Log anomalies with `tracing::warn!`. Anomalies are broadcast
    /// regardless of this flag.
    pub report_anomalies: bool,

    /// Reject runtime-level updates of forkable plugins instead of applying
    /// them best-effort.
    pub strict_forkable_updates: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            report_anomalies: true,
            strict_forkable_updates: false,
        }
    }
}

impl KernelConfig {
    /// Load from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SCOPE_KERNEL_REPORT_ANOMALIES`: log anomalies (default: true)
    /// - `SCOPE_KERNEL_STRICT_FORKABLE_UPDATES`: reject ambiguous updates (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            report_anomalies: env_flag("SCOPE_KERNEL_REPORT_ANOMALIES")
                .unwrap_or(defaults.report_anomalies),
            strict_forkable_updates: env_flag("SCOPE_KERNEL_STRICT_FORKABLE_UPDATES")
                .unwrap_or(defaults.strict_forkable_updates),
        }
    }

    /// Builder-style method to toggle anomaly logging.
    #[must_use]
    pub fn with_report_anomalies(mut self, enabled: bool) -> Self {
        self.report_anomalies = enabled;
        self
    }

    /// Builder-style method to toggle strict forkable updates.
    #[must_use]
    pub fn with_strict_forkable_updates(mut self, enabled: bool) -> Self {
        self.strict_forkable_updates = enabled;
        self
    }
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}
