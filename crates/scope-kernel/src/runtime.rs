//! # Runtime
//!
//! One runtime exists per registered plugin definition. It owns the forks
//! created from that definition and the config they share by default.
//!
//! A non-reusable plugin runs its apply body once, on the runtime context,
//! and watches its dependencies there. A reusable plugin runs the apply body
//! once per fork instead, and every fork watches its own dependencies.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::acceptor::{diff, Acceptor};
use crate::context::{Context, ContextNode, Overrides};
use crate::error::{Anomaly, KernelError, Result};
use crate::events::KernelEvent;
use crate::fork::Fork;
use crate::kernel::Kernel;
use crate::plugin::Plugin;
use crate::state::{read_state, Config, Forkable, RuntimeNode, StateId, StateKind, StateNode};

impl Kernel {
    /// Register `plugin` and bring up its runtime under the registering
    /// scope, whose isolation the runtime context inherits.
    pub(crate) fn create_runtime(
        self: &Arc<Self>,
        plugin: &Plugin,
        parent: &Arc<ContextNode>,
        config: Config,
    ) -> Result<StateId> {
        let id = {
            let mut inner = self.lock();
            let id = inner.registry.next_id();
            inner.registry.set(plugin, id)?;
            let using: Vec<String> = plugin
                .inject()
                .iter()
                .map(|name| inner.services.canonical(name))
                .collect();
            for name in &using {
                inner.services.provide(name);
            }

            let mut forkables = Vec::new();
            if plugin.is_reusable() {
                if let Some(apply) = plugin.apply_body() {
                    forkables.push(Forkable { id: None, body: apply });
                }
            }
            if let Some(fork) = plugin.fork_body() {
                forkables.push(Forkable { id: None, body: fork });
            }

            let context = ContextNode::child(parent, id, id, Overrides::new().inject(&using));
            let runtime = RuntimeNode {
                plugin: Some(plugin.clone()),
                using,
                forkables,
                children: Vec::new(),
                reusable: plugin.is_reusable(),
            };
            inner.states.insert(
                id,
                StateNode::new(id, StateKind::Runtime(runtime), context, Arc::clone(parent), config),
            );
            id
        };

        info!("[Runtime] Created runtime {} for plugin {}", id, plugin.name());
        self.broadcast(
            &KernelEvent::RuntimeCreated {
                runtime: id,
                plugin: plugin.name().to_string(),
            },
            None,
        );
        if !plugin.is_reusable() {
            self.arm_dependency_hooks(id);
        }
        self.restart(id);
        Ok(id)
    }

    /// Tear down a runtime and every fork under it. Idempotent.
    pub(crate) fn dispose_runtime(self: &Arc<Self>, id: StateId) -> bool {
        let plugin = {
            let mut inner = self.lock();
            let Some(node) = inner.states.get_mut(&id) else {
                return false;
            };
            let plugin = node.as_runtime().and_then(|r| r.plugin.clone());
            // the root runtime lives as long as the kernel
            if node.disposed || plugin.is_none() {
                return false;
            }
            node.disposed = true;
            plugin
        };

        self.clear(id, false);
        let children = self
            .lock()
            .states
            .get(&id)
            .and_then(StateNode::as_runtime)
            .map(|r| r.children.clone())
            .unwrap_or_default();
        for child in children {
            self.dispose_fork(child);
        }

        let name = {
            let mut inner = self.lock();
            if let Some(plugin) = &plugin {
                inner.registry.remove(plugin.id());
            }
            inner.states.remove(&id);
            plugin.map_or_else(|| "root".to_string(), |p| p.name().to_string())
        };
        info!("[Runtime] Disposed runtime {} of plugin {}", id, name);
        self.broadcast(
            &KernelEvent::RuntimeDisposed {
                runtime: id,
                plugin: name,
            },
            None,
        );
        true
    }

    /// Replace the shared default config of a runtime.
    pub(crate) fn update_runtime(self: &Arc<Self>, id: StateId, config: Value) -> Result<()> {
        let (plugin, forkable, old, acceptors) = {
            let inner = self.lock();
            let node = inner
                .states
                .get(&id)
                .filter(|node| !node.disposed)
                .ok_or(KernelError::Disposed(id))?;
            let runtime = node.as_runtime().ok_or(KernelError::Disposed(id))?;
            (
                runtime.plugin.clone(),
                runtime.is_forkable(),
                Arc::clone(&node.config),
                node.acceptors.iter().map(|(_, a)| a.clone()).collect::<Vec<Acceptor>>(),
            )
        };
        let name = plugin
            .as_ref()
            .map_or_else(|| "root".to_string(), |p| p.name().to_string());

        if forkable {
            self.report(Anomaly::ForkableRuntimeUpdate {
                plugin: name.clone(),
            });
            if self.config.strict_forkable_updates {
                return Err(KernelError::AmbiguousUpdate { plugin: name });
            }
        }

        let resolved = match &plugin {
            Some(plugin) => plugin.resolve_config(config)?,
            None => Arc::new(config),
        };
        let should_restart = diff(&old, &resolved, &acceptors);

        let updated = {
            let mut inner = self.lock();
            let Some(node) = inner.states.get_mut(&id) else {
                return Ok(());
            };
            node.config = Arc::clone(&resolved);
            let children = node
                .as_runtime()
                .map(|r| r.children.clone())
                .unwrap_or_default();
            let mut updated = Vec::new();
            for child in children {
                if let Some(fork) = inner.states.get_mut(&child) {
                    if Arc::ptr_eq(&fork.config, &old) {
                        fork.config = Arc::clone(&resolved);
                        updated.push(child);
                    }
                }
            }
            updated
        };

        for fork in updated {
            self.broadcast(
                &KernelEvent::ConfigUpdated {
                    state: fork,
                    config: Arc::clone(&resolved),
                },
                None,
            );
        }
        debug!(runtime = %id, plugin = %name, restart = should_restart, "Runtime config updated");
        if should_restart {
            self.restart(id);
        }
        Ok(())
    }
}

/// Handle to a runtime.
#[derive(Clone)]
pub struct Runtime {
    kernel: Arc<Kernel>,
    id: StateId,
}

impl Runtime {
    pub(crate) fn new(kernel: Arc<Kernel>, id: StateId) -> Self {
        Self { kernel, id }
    }

    /// `None` once disposed.
    #[must_use]
    pub fn uid(&self) -> Option<StateId> {
        read_state(&self.kernel, self.id, |_, node| node.id)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.uid().is_some()
    }

    /// Shared default config. `null` once disposed.
    #[must_use]
    pub fn config(&self) -> Config {
        read_state(&self.kernel, self.id, |_, node| Arc::clone(&node.config))
            .unwrap_or_else(|| Arc::new(Value::Null))
    }

    /// Update the shared default config and every fork still using it.
    pub fn update(&self, config: Value) -> Result<()> {
        self.kernel.update_runtime(self.id, config)
    }

    pub fn restart(&self) {
        if self.is_active() {
            self.kernel.restart(self.id);
        }
    }

    pub fn dispose(&self) -> bool {
        self.kernel.dispose_runtime(self.id)
    }

    /// Number of outstanding disposables.
    #[must_use]
    pub fn disposables(&self) -> usize {
        read_state(&self.kernel, self.id, |_, node| node.ledger.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn disposable_labels(&self) -> Vec<String> {
        read_state(&self.kernel, self.id, |_, node| node.ledger.labels()).unwrap_or_default()
    }

    #[must_use]
    pub fn children(&self) -> Vec<Fork> {
        read_state(&self.kernel, self.id, |_, node| {
            node.as_runtime()
                .map(|r| r.children.clone())
                .unwrap_or_default()
        })
        .unwrap_or_default()
        .into_iter()
        .map(|id| Fork::new(Arc::clone(&self.kernel), id, self.id))
        .collect()
    }

    /// Whether forks run their own bodies (and own their config).
    #[must_use]
    pub fn is_forkable(&self) -> bool {
        self.read_runtime(RuntimeNode::is_forkable).unwrap_or(false)
    }

    #[must_use]
    pub fn is_reusable(&self) -> bool {
        self.read_runtime(|r| r.reusable).unwrap_or(false)
    }

    /// Declared dependencies.
    #[must_use]
    pub fn using(&self) -> Vec<String> {
        self.read_runtime(|r| r.using.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.read_runtime(RuntimeNode::name)
            .unwrap_or_else(|| "disposed".to_string())
    }

    #[must_use]
    pub fn plugin(&self) -> Option<Plugin> {
        self.read_runtime(|r| r.plugin.clone()).flatten()
    }

    /// Scope the runtime was first registered from.
    #[must_use]
    pub fn parent(&self) -> Option<Context> {
        read_state(&self.kernel, self.id, |_, node| Arc::clone(&node.parent))
            .map(|node| Context::from_parts(Arc::clone(&self.kernel), node))
    }

    /// The runtime's own context.
    #[must_use]
    pub fn context(&self) -> Option<Context> {
        read_state(&self.kernel, self.id, |_, node| Arc::clone(&node.context))
            .map(|node| Context::from_parts(Arc::clone(&self.kernel), node))
    }

    fn read_runtime<T>(&self, read: impl FnOnce(&RuntimeNode) -> T) -> Option<T> {
        read_state(&self.kernel, self.id, |_, node| node.as_runtime().map(read)).flatten()
    }
}

impl PartialEq for Runtime {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.kernel, &other.kernel) && self.id == other.id
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.id)
            .field("name", &self.name())
            .finish()
    }
}
