//! # Lifecycle States
//!
//! Runtimes and forks share one contract: a ledger of side effects, a list
//! of acceptors, a config snapshot and a dependency check. Both live in the
//! kernel's state arena as [`StateNode`]s; the public [`Fork`] and
//! [`Runtime`] types are handles into that arena.
//!
//! The operations shared by both kinds are implemented here:
//!
//! - `collect`: register a disposable on a state.
//! - `clear`: drain a ledger, optionally keeping the state's own hooks.
//! - `check`: every declared dependency resolves to a bound service.
//! - `start` / `restart`: run the bodies if `check` passes.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error};

use crate::acceptor::Acceptor;
use crate::bus::Callback;
use crate::context::{Context, ContextNode};
use crate::events::{EventFilter, EventTopic, KernelEvent};
use crate::fork::Fork;
use crate::kernel::{Inner, Kernel};
use crate::ledger::{guard, panic_message, DisposableId, DisposeAction, Disposer, Ledger, LedgerEntry};
use crate::plugin::{Plugin, PluginBody};
use crate::runtime::Runtime;

/// Resolved configuration snapshot. Replaced, never mutated.
pub type Config = Arc<Value>;

/// Identifier issued by the registry counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub(crate) u64);

impl StateId {
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Entry run for every fork of a runtime.
pub(crate) struct Forkable {
    /// Ledger entry removing this forkable; `None` for setup-time entries.
    pub(crate) id: Option<DisposableId>,
    pub(crate) body: PluginBody,
}

pub(crate) struct RuntimeNode {
    /// `None` for the root runtime.
    pub(crate) plugin: Option<Plugin>,
    pub(crate) using: Vec<String>,
    pub(crate) forkables: Vec<Forkable>,
    pub(crate) children: Vec<StateId>,
    pub(crate) reusable: bool,
}

impl RuntimeNode {
    pub(crate) fn root() -> Self {
        Self {
            plugin: None,
            using: Vec::new(),
            forkables: Vec::new(),
            children: Vec::new(),
            reusable: false,
        }
    }

    pub(crate) fn name(&self) -> String {
        self.plugin
            .as_ref()
            .map_or_else(|| "root".to_string(), |p| p.name().to_string())
    }

    pub(crate) fn is_forkable(&self) -> bool {
        !self.forkables.is_empty()
    }
}

pub(crate) struct ForkNode {
    pub(crate) runtime: StateId,
    /// Disposer entries in the parent state's ledger and the runtime ledger.
    pub(crate) entries: Vec<(StateId, DisposableId)>,
}

pub(crate) enum StateKind {
    Runtime(RuntimeNode),
    Fork(ForkNode),
}

pub(crate) struct StateNode {
    pub(crate) id: StateId,
    pub(crate) kind: StateKind,
    pub(crate) context: Arc<ContextNode>,
    pub(crate) parent: Arc<ContextNode>,
    pub(crate) config: Config,
    pub(crate) ledger: Ledger,
    pub(crate) acceptors: Vec<(DisposableId, Acceptor)>,
    pub(crate) disposed: bool,
}

impl StateNode {
    pub(crate) fn new(
        id: StateId,
        kind: StateKind,
        context: Arc<ContextNode>,
        parent: Arc<ContextNode>,
        config: Config,
    ) -> Self {
        Self {
            id,
            kind,
            context,
            parent,
            config,
            ledger: Ledger::default(),
            acceptors: Vec::new(),
            disposed: false,
        }
    }

    /// Runtime owning this state (itself for runtimes).
    pub(crate) fn runtime_id(&self) -> StateId {
        match &self.kind {
            StateKind::Runtime(_) => self.id,
            StateKind::Fork(fork) => fork.runtime,
        }
    }

    pub(crate) fn as_runtime(&self) -> Option<&RuntimeNode> {
        match &self.kind {
            StateKind::Runtime(runtime) => Some(runtime),
            StateKind::Fork(_) => None,
        }
    }

    pub(crate) fn as_runtime_mut(&mut self) -> Option<&mut RuntimeNode> {
        match &mut self.kind {
            StateKind::Runtime(runtime) => Some(runtime),
            StateKind::Fork(_) => None,
        }
    }

    pub(crate) fn as_fork(&self) -> Option<&ForkNode> {
        match &self.kind {
            StateKind::Fork(fork) => Some(fork),
            StateKind::Runtime(_) => None,
        }
    }
}

impl Inner {
    /// Runtime node owning `state`.
    pub(crate) fn runtime_of(&self, state: StateId) -> Option<&RuntimeNode> {
        let runtime = self.states.get(&state)?.runtime_id();
        self.states.get(&runtime)?.as_runtime()
    }

    pub(crate) fn runtime_of_mut(&mut self, state: StateId) -> Option<&mut RuntimeNode> {
        let runtime = self.states.get(&state)?.runtime_id();
        self.states.get_mut(&runtime)?.as_runtime_mut()
    }

    pub(crate) fn plugin_name(&self, state: StateId) -> String {
        self.runtime_of(state)
            .map_or_else(|| "unknown".to_string(), RuntimeNode::name)
    }
}

enum StartPlan {
    Skip,
    Fork {
        context: Arc<ContextNode>,
        config: Config,
        bodies: Vec<PluginBody>,
    },
    Runtime {
        context: Arc<ContextNode>,
        config: Config,
        apply: Option<PluginBody>,
    },
}

impl Kernel {
    /// Register a disposable on `state`. A missing or disposed state runs
    /// the action right away and returns an inert handle.
    pub(crate) fn collect(
        self: &Arc<Self>,
        state: StateId,
        label: impl Into<String>,
        owner: Option<StateId>,
        action: DisposeAction,
    ) -> Disposer {
        let label = label.into();
        let mut inner = self.lock();
        let id = inner.next_disposable_id();
        match inner.states.get_mut(&state) {
            Some(node) if !node.disposed => {
                node.ledger.push(LedgerEntry::new(id, label, owner, action));
                Disposer::new(Arc::downgrade(self), state, id)
            }
            _ => {
                drop(inner);
                debug!(state = %state, label, "collect on inactive state, running now");
                guard(&label, false, action);
                Disposer::inert()
            }
        }
    }

    /// Drain the ledger of `state`. With `preserve`, entries owned by the
    /// state itself survive. Clearing a runtime also clears its forks.
    pub(crate) fn clear(self: &Arc<Self>, state: StateId, preserve: bool) {
        let entries = {
            let mut inner = self.lock();
            let Some(node) = inner.states.get_mut(&state) else {
                return;
            };
            node.ledger.drain(preserve.then_some(state))
        };
        for entry in entries {
            entry.run();
        }

        let children = {
            let inner = self.lock();
            inner
                .states
                .get(&state)
                .and_then(StateNode::as_runtime)
                .map(|runtime| runtime.children.clone())
                .unwrap_or_default()
        };
        for child in children {
            self.clear(child, preserve);
        }
    }

    /// Every declared dependency resolves to a bound service.
    pub(crate) fn check(&self, state: StateId) -> bool {
        let inner = self.lock();
        let (Some(node), Some(runtime)) = (inner.states.get(&state), inner.runtime_of(state)) else {
            return false;
        };
        runtime
            .using
            .iter()
            .all(|name| inner.services.contains(&node.context.token(name)))
    }

    pub(crate) fn start(self: &Arc<Self>, state: StateId) {
        let plan = {
            let inner = self.lock();
            match inner.states.get(&state) {
                None => StartPlan::Skip,
                Some(node) if node.disposed => StartPlan::Skip,
                Some(node) => match &node.kind {
                    StateKind::Fork(_) => StartPlan::Fork {
                        context: Arc::clone(&node.context),
                        config: Arc::clone(&node.config),
                        bodies: inner
                            .runtime_of(state)
                            .map(|r| r.forkables.iter().map(|f| Arc::clone(&f.body)).collect())
                            .unwrap_or_default(),
                    },
                    StateKind::Runtime(runtime) => StartPlan::Runtime {
                        context: Arc::clone(&node.context),
                        config: Arc::clone(&node.config),
                        apply: if runtime.reusable {
                            None
                        } else {
                            runtime.plugin.as_ref().and_then(Plugin::apply_body)
                        },
                    },
                },
            }
        };
        if matches!(plan, StartPlan::Skip) {
            return;
        }
        if !self.check(state) {
            debug!(state = %state, "dependencies not satisfied, start deferred");
            return;
        }

        match plan {
            StartPlan::Skip => {}
            StartPlan::Fork {
                context,
                config,
                bodies,
            } => {
                for body in bodies {
                    self.invoke(state, &context, &config, &body);
                }
            }
            StartPlan::Runtime {
                context,
                config,
                apply,
            } => {
                if let Some(apply) = apply {
                    self.invoke(state, &context, &config, &apply);
                }
                let children = self
                    .lock()
                    .states
                    .get(&state)
                    .and_then(StateNode::as_runtime)
                    .map(|r| r.children.clone())
                    .unwrap_or_default();
                for child in children {
                    self.start(child);
                }
            }
        }
    }

    pub(crate) fn restart(self: &Arc<Self>, state: StateId) {
        self.clear(state, true);
        self.start(state);
    }

    /// Run a plugin body. Errors and panics are reported, never propagated.
    fn invoke(
        self: &Arc<Self>,
        state: StateId,
        context: &Arc<ContextNode>,
        config: &Config,
        body: &PluginBody,
    ) {
        let ctx = Context::from_parts(Arc::clone(self), Arc::clone(context));
        let message = match catch_unwind(AssertUnwindSafe(|| body(&ctx, &**config))) {
            Ok(Ok(())) => return,
            Ok(Err(err)) => format!("{err:#}"),
            Err(payload) => panic_message(payload),
        };
        let plugin = self.lock().plugin_name(state);
        error!(plugin = %plugin, state = %state, error = %message, "[Runtime] plugin body failed");
        self.broadcast(
            &KernelEvent::PluginFailed {
                state,
                plugin,
                message,
            },
            None,
        );
    }

    /// Watch the declared dependencies of `state`: losing one soft-clears
    /// the state, regaining one starts it again.
    pub(crate) fn arm_dependency_hooks(self: &Arc<Self>, state: StateId) {
        let (context, using) = {
            let inner = self.lock();
            let (Some(node), Some(runtime)) = (inner.states.get(&state), inner.runtime_of(state))
            else {
                return;
            };
            (Arc::clone(&node.context), runtime.using.clone())
        };
        if using.is_empty() {
            return;
        }
        let using = Arc::new(using);

        let weak = Arc::downgrade(self);
        let watched = Arc::clone(&using);
        let on_unbinding: Callback = Arc::new(move |event| {
            let KernelEvent::ServiceUnbinding { name } = event else {
                return;
            };
            if !watched.contains(name) {
                return;
            }
            if let Some(kernel) = weak.upgrade() {
                debug!(state = %state, service = %name, "dependency lost, clearing");
                kernel.clear(state, true);
            }
        });
        self.listen(
            &context,
            EventFilter::topics(vec![EventTopic::ServiceUnbinding]),
            Some(state),
            on_unbinding,
        );

        let weak = Arc::downgrade(self);
        let on_bound: Callback = Arc::new(move |event| {
            let KernelEvent::ServiceBound { name } = event else {
                return;
            };
            if !using.contains(name) {
                return;
            }
            if let Some(kernel) = weak.upgrade() {
                debug!(state = %state, service = %name, "dependency bound, starting");
                kernel.start(state);
            }
        });
        self.listen(
            &context,
            EventFilter::topics(vec![EventTopic::ServiceBound]),
            Some(state),
            on_bound,
        );
    }
}

/// Either kind of lifecycle state.
#[derive(Clone, Debug)]
pub enum State {
    Runtime(Runtime),
    Fork(Fork),
}

impl State {
    /// `None` once disposed.
    #[must_use]
    pub fn uid(&self) -> Option<StateId> {
        match self {
            Self::Runtime(runtime) => runtime.uid(),
            Self::Fork(fork) => fork.uid(),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.uid().is_some()
    }

    #[must_use]
    pub fn config(&self) -> Config {
        match self {
            Self::Runtime(runtime) => runtime.config(),
            Self::Fork(fork) => fork.config(),
        }
    }

    pub fn update(&self, config: Value) -> crate::error::Result<()> {
        match self {
            Self::Runtime(runtime) => runtime.update(config),
            Self::Fork(fork) => fork.update(config),
        }
    }

    pub fn restart(&self) {
        match self {
            Self::Runtime(runtime) => runtime.restart(),
            Self::Fork(fork) => fork.restart(),
        }
    }

    pub fn dispose(&self) -> bool {
        match self {
            Self::Runtime(runtime) => runtime.dispose(),
            Self::Fork(fork) => fork.dispose(),
        }
    }

    #[must_use]
    pub fn disposables(&self) -> usize {
        match self {
            Self::Runtime(runtime) => runtime.disposables(),
            Self::Fork(fork) => fork.disposables(),
        }
    }

    #[must_use]
    pub fn disposable_labels(&self) -> Vec<String> {
        match self {
            Self::Runtime(runtime) => runtime.disposable_labels(),
            Self::Fork(fork) => fork.disposable_labels(),
        }
    }

    /// Runtime owning this state.
    #[must_use]
    pub fn runtime(&self) -> Runtime {
        match self {
            Self::Runtime(runtime) => runtime.clone(),
            Self::Fork(fork) => fork.runtime(),
        }
    }

    #[must_use]
    pub fn as_fork(&self) -> Option<&Fork> {
        match self {
            Self::Fork(fork) => Some(fork),
            Self::Runtime(_) => None,
        }
    }
}

/// Shared read-only accessors used by the handle types.
pub(crate) fn read_state<T>(
    kernel: &Kernel,
    id: StateId,
    read: impl FnOnce(&Inner, &StateNode) -> T,
) -> Option<T> {
    let inner = kernel.lock();
    let node = inner.states.get(&id)?;
    if node.disposed {
        return None;
    }
    Some(read(&inner, node))
}
