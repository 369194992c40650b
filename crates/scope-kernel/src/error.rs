//! # Error Types
//!
//! Two categories, mirroring the kernel's error taxonomy:
//!
//! - [`KernelError`]: programming errors. Returned synchronously to the
//!   caller of the offending operation.
//! - [`Anomaly`]: non-fatal reports. Broadcast on the anomaly channel and
//!   logged; the operation still completes with best-effort semantics.

use thiserror::Error;

use crate::state::StateId;

/// Errors returned by kernel operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KernelError {
    /// A service slot is occupied by a different value.
    #[error("service `{name}` has already been bound")]
    ServiceOverwrite { name: String },

    /// The plugin's validator rejected the configuration.
    #[error("invalid config for plugin `{plugin}`: {reason}")]
    InvalidConfig { plugin: String, reason: String },

    /// A plugin definition was registered twice.
    #[error("plugin `{plugin}` is already registered")]
    AlreadyRegistered { plugin: String },

    /// The target state has been disposed.
    #[error("scope {0} has been disposed")]
    Disposed(StateId),

    /// Direct runtime update of a forkable plugin in strict mode.
    #[error("refusing to update forkable plugin `{plugin}` through its runtime")]
    AmbiguousUpdate { plugin: String },

    /// A data service was invoked.
    #[error("service `{name}` is not invocable")]
    NotInvocable { name: String },

    /// An alias name is already taken by another service or alias.
    #[error("cannot alias `{alias}`: name is already taken by `{target}`")]
    AliasConflict { alias: String, target: String },

    /// `Context::spawn` was called outside an async runtime.
    #[error("no async runtime available to spawn `{label}`")]
    NoAsyncRuntime { label: String },
}

/// Result alias for kernel operations.
pub type Result<T> = std::result::Result<T, KernelError>;

/// Non-fatal conditions reported through the anomaly channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Anomaly {
    /// Read of a name that is neither bound, declared, nor a plain property.
    #[error("property `{name}` is not registered, declare it as `inject` to suppress this warning")]
    UndeclaredAccess { name: String },

    /// Write of a non-service name; stored as a plain property.
    #[error("property `{name}` is not a service, it will not be tracked by the lifecycle")]
    PlainPropertyWrite { name: String },

    /// Write of a service name the writing scope did not declare.
    #[error("service `{name}` is written by a scope that does not inject it")]
    UndeclaredServiceWrite { name: String },

    /// Attempt to replace a bound service with a different value.
    #[error("service `{name}` cannot be overwritten while bound")]
    ServiceOverwrite { name: String },

    /// Runtime-level update of a plugin whose forks own their config.
    #[error("attempting to update forkable plugin `{plugin}`, which may lead to unexpected behavior")]
    ForkableRuntimeUpdate { plugin: String },

    /// Second registration of a non-forkable plugin.
    #[error("duplicate plugin `{plugin}` detected")]
    DuplicatePlugin { plugin: String },
}

impl Anomaly {
    /// Short machine-readable kind, used as a structured log field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UndeclaredAccess { .. } => "undeclared-access",
            Self::PlainPropertyWrite { .. } => "plain-property-write",
            Self::UndeclaredServiceWrite { .. } => "undeclared-service-write",
            Self::ServiceOverwrite { .. } => "service-overwrite",
            Self::ForkableRuntimeUpdate { .. } => "forkable-runtime-update",
            Self::DuplicatePlugin { .. } => "duplicate-plugin",
        }
    }
}
