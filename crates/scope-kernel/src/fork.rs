//! # Fork
//!
//! A fork is one activation of a plugin under a parent scope. It owns a
//! child context, its own ledger and acceptors, and either shares its
//! runtime's default config or carries a diverged one.
//!
//! A fork is disposed from two places: the parent state's ledger (when the
//! scope that created it is cleared) and the runtime's ledger (when the
//! runtime goes away). Whichever runs first detaches the other.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::acceptor::{diff, Acceptor};
use crate::context::{Context, ContextNode, Overrides};
use crate::error::{KernelError, Result};
use crate::events::KernelEvent;
use crate::kernel::Kernel;
use crate::ledger::DisposeAction;
use crate::plugin::Plugin;
use crate::runtime::Runtime;
use crate::state::{read_state, Config, ForkNode, StateId, StateKind, StateNode};

impl Kernel {
    /// Create and start a fork of `runtime` under `parent`.
    pub(crate) fn fork(
        self: &Arc<Self>,
        runtime: StateId,
        parent: &Arc<ContextNode>,
        config: Config,
    ) -> Result<StateId> {
        let (id, name, reusable) = {
            let mut inner = self.lock();
            if !inner.states.get(&parent.state).is_some_and(|n| !n.disposed) {
                return Err(KernelError::Disposed(parent.state));
            }
            let (using, name, reusable) = inner
                .states
                .get(&runtime)
                .filter(|node| !node.disposed)
                .and_then(StateNode::as_runtime)
                .map(|r| (r.using.clone(), r.name(), r.reusable))
                .ok_or(KernelError::Disposed(runtime))?;

            let id = inner.registry.next_id();
            let context = ContextNode::child(parent, id, runtime, Overrides::new().inject(&using));
            let node = ForkNode {
                runtime,
                entries: Vec::new(),
            };
            inner.states.insert(
                id,
                StateNode::new(id, StateKind::Fork(node), context, Arc::clone(parent), config),
            );
            if let Some(r) = inner
                .states
                .get_mut(&runtime)
                .and_then(StateNode::as_runtime_mut)
            {
                r.children.push(id);
            }
            (id, name, reusable)
        };

        let label = format!("fork <{name}>");
        let parent_entry = self.collect(parent.state, label.clone(), Some(runtime), self.fork_disposer(id));
        let runtime_entry = self.collect(runtime, label, Some(runtime), self.fork_disposer(id));
        {
            let mut inner = self.lock();
            let entries: Vec<(StateId, _)> = [(parent.state, parent_entry.id()), (runtime, runtime_entry.id())]
                .into_iter()
                .filter_map(|(state, entry)| entry.map(|entry| (state, entry)))
                .collect();
            if let Some(StateKind::Fork(fork)) = inner.states.get_mut(&id).map(|n| &mut n.kind) {
                fork.entries = entries;
            }
        }

        info!("[Fork] Created fork {} of plugin {}", id, name);
        self.broadcast(&KernelEvent::ForkCreated { fork: id, plugin: name }, None);
        if reusable {
            self.arm_dependency_hooks(id);
        }
        self.start(id);
        Ok(id)
    }

    fn fork_disposer(self: &Arc<Self>, fork: StateId) -> DisposeAction {
        let weak = Arc::downgrade(self);
        Box::new(move || weak.upgrade().is_some_and(|kernel| kernel.dispose_fork(fork)))
    }

    /// Tear down a fork. Idempotent. Deletes the runtime when this was its
    /// last fork.
    pub(crate) fn dispose_fork(self: &Arc<Self>, id: StateId) -> bool {
        {
            let mut inner = self.lock();
            let Some(node) = inner.states.get_mut(&id) else {
                return false;
            };
            if node.disposed || node.as_fork().is_none() {
                return false;
            }
            node.disposed = true;
        }

        self.clear(id, false);

        let (name, orphaned) = {
            let mut inner = self.lock();
            let Some((runtime, entries)) = inner
                .states
                .get(&id)
                .and_then(StateNode::as_fork)
                .map(|f| (f.runtime, f.entries.clone()))
            else {
                return false;
            };
            for (state, entry) in entries {
                if let Some(node) = inner.states.get_mut(&state) {
                    // detach without running
                    node.ledger.remove(entry);
                }
            }
            let name = inner.plugin_name(id);
            let orphaned = match inner
                .states
                .get_mut(&runtime)
                .and_then(StateNode::as_runtime_mut)
            {
                Some(r) => {
                    let before = r.children.len();
                    r.children.retain(|child| *child != id);
                    let removed = r.children.len() != before;
                    if removed && r.children.is_empty() {
                        r.plugin.as_ref().map(Plugin::id)
                    } else {
                        None
                    }
                }
                None => None,
            };
            (name, orphaned)
        };

        if let Some(plugin) = orphaned {
            debug!(fork = %id, "last fork gone, deleting runtime");
            self.registry_delete(plugin);
        }

        info!("[Fork] Disposed fork {} of plugin {}", id, name);
        self.broadcast(&KernelEvent::ForkDisposed { fork: id, plugin: name }, None);
        self.lock().states.remove(&id);
        true
    }

    pub(crate) fn update_fork(self: &Arc<Self>, id: StateId, config: Value, silent: bool) -> Result<()> {
        let (runtime, forkable, shares_default, plugin, old, acceptors) = {
            let inner = self.lock();
            let node = inner
                .states
                .get(&id)
                .filter(|node| !node.disposed)
                .ok_or(KernelError::Disposed(id))?;
            let fork = node.as_fork().ok_or(KernelError::Disposed(id))?;
            let runtime_node = inner
                .states
                .get(&fork.runtime)
                .ok_or(KernelError::Disposed(id))?;
            let runtime = runtime_node.as_runtime().ok_or(KernelError::Disposed(id))?;
            let forkable = runtime.is_forkable();
            // a shared instance is diffed against the runtime's acceptors
            let acceptors = if forkable { &node.acceptors } else { &runtime_node.acceptors };
            (
                fork.runtime,
                forkable,
                Arc::ptr_eq(&node.config, &runtime_node.config),
                runtime.plugin.clone(),
                Arc::clone(&node.config),
                acceptors.iter().map(|(_, a)| a.clone()).collect::<Vec<Acceptor>>(),
            )
        };

        let resolved = match &plugin {
            Some(plugin) => plugin.resolve_config(config)?,
            None => Arc::new(config),
        };

        if !forkable && !shares_default {
            debug!(fork = %id, "fork no longer shares the runtime config, update ignored");
            return Ok(());
        }

        let should_restart = diff(&old, &resolved, &acceptors);
        self.set_config(id, &resolved);
        if !forkable {
            self.set_config(runtime, &resolved);
        }
        if !silent {
            self.broadcast(
                &KernelEvent::ConfigUpdated {
                    state: id,
                    config: Arc::clone(&resolved),
                },
                None,
            );
        }
        debug!(fork = %id, restart = should_restart, "Fork config updated");
        if should_restart {
            self.restart(if forkable { id } else { runtime });
        }
        Ok(())
    }

    fn set_config(&self, id: StateId, config: &Config) {
        if let Some(node) = self.lock().states.get_mut(&id) {
            node.config = Arc::clone(config);
        }
    }
}

/// Handle to a fork.
#[derive(Clone)]
pub struct Fork {
    kernel: Arc<Kernel>,
    id: StateId,
    runtime: StateId,
}

impl Fork {
    pub(crate) fn new(kernel: Arc<Kernel>, id: StateId, runtime: StateId) -> Self {
        Self {
            kernel,
            id,
            runtime,
        }
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

    /// Current config. `null` once disposed.
    #[must_use]
    pub fn config(&self) -> Config {
        read_state(&self.kernel, self.id, |_, node| Arc::clone(&node.config))
            .unwrap_or_else(|| Arc::new(Value::Null))
    }

    /// The fork's own context.
    #[must_use]
    pub fn context(&self) -> Option<Context> {
        read_state(&self.kernel, self.id, |_, node| Arc::clone(&node.context))
            .map(|node| Context::from_parts(Arc::clone(&self.kernel), node))
    }

    /// Scope the fork was created under.
    #[must_use]
    pub fn parent(&self) -> Option<Context> {
        read_state(&self.kernel, self.id, |_, node| Arc::clone(&node.parent))
            .map(|node| Context::from_parts(Arc::clone(&self.kernel), node))
    }

    #[must_use]
    pub fn runtime(&self) -> Runtime {
        Runtime::new(Arc::clone(&self.kernel), self.runtime)
    }

    /// Services the plugin depends on.
    #[must_use]
    pub fn using(&self) -> Vec<String> {
        self.runtime().using()
    }

    /// Apply a new config and broadcast `ConfigUpdated`.
    pub fn update(&self, config: Value) -> Result<()> {
        self.kernel.update_fork(self.id, config, false)
    }

    /// Apply a new config without broadcasting.
    pub fn update_silently(&self, config: Value) -> Result<()> {
        self.kernel.update_fork(self.id, config, true)
    }

    pub fn restart(&self) {
        if self.is_active() {
            self.kernel.restart(self.id);
        }
    }

    pub fn dispose(&self) -> bool {
        self.kernel.dispose_fork(self.id)
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
}

impl PartialEq for Fork {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.kernel, &other.kernel) && self.id == other.id
    }
}

impl fmt::Debug for Fork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fork")
            .field("id", &self.id)
            .field("runtime", &self.runtime)
            .finish()
    }
}
