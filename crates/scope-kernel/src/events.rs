//! # Kernel Events
//!
//! Defines every event that flows through the kernel broadcast, the topics
//! used to subscribe to them, and the two kinds of filters:
//!
//! - [`EventFilter`]: chosen by the listener, selects which events it wants.
//! - [`ScopeFilter`]: chosen by the emitter, selects which contexts may
//!   observe the event at all.

use serde_json::Value;

use crate::context::ContextNode;
use crate::error::Anomaly;
use crate::service::Token;
use crate::state::{Config, StateId};

/// All events that can be broadcast by the kernel.
#[derive(Debug, Clone)]
pub enum KernelEvent {
    /// The root context has been started.
    Ready,

    /// A fork was created and registered under its runtime.
    ForkCreated { fork: StateId, plugin: String },

    /// A fork finished disposing.
    ForkDisposed { fork: StateId, plugin: String },

    /// A runtime was created for a new plugin definition.
    RuntimeCreated { runtime: StateId, plugin: String },

    /// A runtime finished disposing and left the registry.
    RuntimeDisposed { runtime: StateId, plugin: String },

    /// A state adopted a new configuration.
    ConfigUpdated { state: StateId, config: Config },

    /// A service was bound. Scoped to contexts resolving `name` to the
    /// bound token.
    ServiceBound { name: String },

    /// A service is about to be unbound; the old value is still readable.
    ServiceUnbinding { name: String },

    /// A non-fatal anomaly was reported.
    Anomaly(Anomaly),

    /// A plugin body failed or panicked.
    PluginFailed {
        state: StateId,
        plugin: String,
        message: String,
    },

    /// Application-defined event.
    Custom { name: String, payload: Value },
}

impl KernelEvent {
    /// Get the topic for this event (for filtering).
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::Ready => EventTopic::Ready,
            Self::ForkCreated { .. } => EventTopic::ForkCreated,
            Self::ForkDisposed { .. } => EventTopic::ForkDisposed,
            Self::RuntimeCreated { .. } => EventTopic::RuntimeCreated,
            Self::RuntimeDisposed { .. } => EventTopic::RuntimeDisposed,
            Self::ConfigUpdated { .. } => EventTopic::ConfigUpdated,
            Self::ServiceBound { .. } => EventTopic::ServiceBound,
            Self::ServiceUnbinding { .. } => EventTopic::ServiceUnbinding,
            Self::Anomaly(_) => EventTopic::Anomaly,
            Self::PluginFailed { .. } => EventTopic::PluginFailed,
            Self::Custom { .. } => EventTopic::Custom,
        }
    }

    /// Convenience constructor for application events.
    pub fn custom(name: impl Into<String>, payload: Value) -> Self {
        Self::Custom {
            name: name.into(),
            payload,
        }
    }
}

/// Event topics for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventTopic {
    Ready,
    ForkCreated,
    ForkDisposed,
    RuntimeCreated,
    RuntimeDisposed,
    ConfigUpdated,
    ServiceBound,
    ServiceUnbinding,
    Anomaly,
    PluginFailed,
    Custom,
    /// All events (no filtering).
    All,
}

/// Listener-side filter.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Topics to include. Empty means all topics.
    pub topics: Vec<EventTopic>,
    /// Custom event names to include. Empty means all names.
    pub names: Vec<String>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific topics.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self {
            topics,
            names: Vec::new(),
        }
    }

    /// Create a filter for one custom event name.
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        Self {
            topics: vec![EventTopic::Custom],
            names: vec![name.into()],
        }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &KernelEvent) -> bool {
        let topic_match = self.topics.is_empty()
            || self.topics.contains(&EventTopic::All)
            || self.topics.contains(&event.topic());

        let name_match = match event {
            KernelEvent::Custom { name, .. } => {
                self.names.is_empty() || self.names.iter().any(|n| n == name)
            }
            _ => true,
        };

        topic_match && name_match
    }
}

/// Emitter-side filter deciding which contexts observe a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeFilter {
    /// Only contexts whose isolate map resolves `name` to `token`.
    Isolate { name: String, token: Token },
}

impl ScopeFilter {
    pub(crate) fn admits(&self, node: &ContextNode) -> bool {
        match self {
            Self::Isolate { name, token } => node.token(name) == *token,
        }
    }
}
