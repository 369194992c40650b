//! # Plugin Definitions
//!
//! A [`Plugin`] is an immutable definition: name, declared dependencies,
//! reusable flag, bodies and an optional config validator. Identity is the
//! definition itself; cloning a `Plugin` yields the same definition, and the
//! registry keys runtimes by [`PluginId`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::context::Context;
use crate::error::{KernelError, Result};
use crate::state::Config;

static NEXT_PLUGIN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of a plugin definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(u64);

/// Plugin body, run with the scope it should act on and its resolved config.
pub type PluginBody = Arc<dyn Fn(&Context, &Value) -> anyhow::Result<()> + Send + Sync>;

/// Config validator. Receives the raw config and returns the normalised one.
pub type Validator = Arc<dyn Fn(Value) -> std::result::Result<Value, String> + Send + Sync>;

struct PluginInner {
    id: PluginId,
    name: String,
    inject: Vec<String>,
    reusable: bool,
    apply: Option<PluginBody>,
    fork: Option<PluginBody>,
    validator: Option<Validator>,
}

/// A plugin definition.
#[derive(Clone)]
pub struct Plugin {
    inner: Arc<PluginInner>,
}

impl Plugin {
    pub fn builder(name: impl Into<String>) -> PluginBuilder {
        PluginBuilder::new(name)
    }

    /// Plugin made of a single non-reusable apply body.
    pub fn function<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Context, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::builder(name).apply(body).build()
    }

    #[must_use]
    pub fn id(&self) -> PluginId {
        self.inner.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Declared dependencies.
    #[must_use]
    pub fn inject(&self) -> &[String] {
        &self.inner.inject
    }

    #[must_use]
    pub fn is_reusable(&self) -> bool {
        self.inner.reusable
    }

    pub(crate) fn apply_body(&self) -> Option<PluginBody> {
        self.inner.apply.clone()
    }

    pub(crate) fn fork_body(&self) -> Option<PluginBody> {
        self.inner.fork.clone()
    }

    /// Normalise a raw config: `null` becomes `{}`, then the validator runs.
    pub fn resolve_config(&self, config: Value) -> Result<Config> {
        let config = match config {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };
        let config = match &self.inner.validator {
            Some(validate) => validate(config).map_err(|reason| KernelError::InvalidConfig {
                plugin: self.inner.name.clone(),
                reason,
            })?,
            None => config,
        };
        Ok(Arc::new(config))
    }
}

impl PartialEq for Plugin {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Plugin {}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("inject", &self.inner.inject)
            .field("reusable", &self.inner.reusable)
            .finish()
    }
}

/// Builder for [`Plugin`].
pub struct PluginBuilder {
    name: String,
    inject: Vec<String>,
    reusable: bool,
    apply: Option<PluginBody>,
    fork: Option<PluginBody>,
    validator: Option<Validator>,
}

impl PluginBuilder {
    fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            name: if name.is_empty() {
                "anonymous".to_string()
            } else {
                name
            },
            inject: Vec::new(),
            reusable: false,
            apply: None,
            fork: None,
            validator: None,
        }
    }

    /// Services that must be bound before the plugin runs.
    #[must_use]
    pub fn inject<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inject = names.into_iter().map(Into::into).collect();
        self
    }

    /// Run the apply body once per fork instead of once per runtime.
    #[must_use]
    pub fn reusable(mut self) -> Self {
        self.reusable = true;
        self
    }

    #[must_use]
    pub fn apply<F>(mut self, body: F) -> Self
    where
        F: Fn(&Context, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.apply = Some(Arc::new(body));
        self
    }

    /// Per-fork entry, run for every fork in addition to the apply body.
    #[must_use]
    pub fn fork<F>(mut self, body: F) -> Self
    where
        F: Fn(&Context, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.fork = Some(Arc::new(body));
        self
    }

    #[must_use]
    pub fn validator<F>(mut self, validate: F) -> Self
    where
        F: Fn(Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validate));
        self
    }

    /// Validate and normalise configs through a serde type. Missing fields
    /// with `#[serde(default)]` are filled in.
    #[must_use]
    pub fn schema<T>(self) -> Self
    where
        T: DeserializeOwned + Serialize,
    {
        self.validator(|raw| {
            let typed: T = serde_json::from_value(raw).map_err(|e| e.to_string())?;
            serde_json::to_value(typed).map_err(|e| e.to_string())
        })
    }

    #[must_use]
    pub fn build(self) -> Plugin {
        Plugin {
            inner: Arc::new(PluginInner {
                id: PluginId(NEXT_PLUGIN_ID.fetch_add(1, Ordering::Relaxed)),
                name: self.name,
                inject: self.inject,
                reusable: self.reusable,
                apply: self.apply,
                fork: self.fork,
                validator: self.validator,
            }),
        }
    }
}
