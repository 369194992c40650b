//! # Context
//!
//! A context is a node in the scope tree. Every node carries a few override
//! tables that read through to its parent unless overridden locally:
//!
//! - isolate map: which [`Realm`] a service name resolves to
//! - intercept map: per-service config overrides
//! - declared dependencies (`inject`)
//! - plain properties
//!
//! [`Context`] pairs a node with the kernel it belongs to and is the surface
//! plugin bodies work with: services, events, disposables, acceptors and
//! nested plugins.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::acceptor::Acceptor;
use crate::config::KernelConfig;
use crate::error::{Anomaly, KernelError, Result};
use crate::events::{EventFilter, EventTopic, KernelEvent, ScopeFilter};
use crate::fork::Fork;
use crate::kernel::Kernel;
use crate::ledger::{guard, Disposer};
use crate::plugin::{Plugin, PluginBody};
use crate::registry::Registry;
use crate::runtime::Runtime;
use crate::service::{Realm, Service, ServiceDefinition, ServiceSlot, Token};
use crate::state::{read_state, Config, Forkable, State, StateId};

#[derive(Debug, Clone)]
enum IsolateRule {
    Shared,
    Named(String),
    Private,
}

/// Local overrides for [`Context::extend`].
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    isolate: Vec<(String, IsolateRule)>,
    intercept: Vec<(String, Value)>,
    inject: Option<BTreeSet<String>>,
}

impl Overrides {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `name` in a realm shared by every context using `label`.
    #[must_use]
    pub fn isolate(mut self, name: impl Into<String>, label: impl Into<String>) -> Self {
        self.isolate
            .push((name.into(), IsolateRule::Named(label.into())));
        self
    }

    /// Resolve `name` in a realm private to the extended subtree.
    #[must_use]
    pub fn isolate_private(mut self, name: impl Into<String>) -> Self {
        self.isolate.push((name.into(), IsolateRule::Private));
        self
    }

    /// Undo an inherited isolation of `name`.
    #[must_use]
    pub fn share(mut self, name: impl Into<String>) -> Self {
        self.isolate.push((name.into(), IsolateRule::Shared));
        self
    }

    #[must_use]
    pub fn intercept(mut self, name: impl Into<String>, value: Value) -> Self {
        self.intercept.push((name.into(), value));
        self
    }

    /// Declare the dependencies of the extended subtree.
    #[must_use]
    pub fn inject<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inject = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

/// One node of the scope tree.
pub struct ContextNode {
    parent: Option<Arc<ContextNode>>,
    pub(crate) state: StateId,
    pub(crate) runtime: StateId,
    isolate: HashMap<String, Realm>,
    intercept: HashMap<String, Value>,
    inject: Option<BTreeSet<String>>,
    properties: Mutex<HashMap<String, Service>>,
}

impl ContextNode {
    pub(crate) fn root(state: StateId) -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            state,
            runtime: state,
            isolate: HashMap::new(),
            intercept: HashMap::new(),
            inject: None,
            properties: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn child(
        parent: &Arc<Self>,
        state: StateId,
        runtime: StateId,
        overrides: Overrides,
    ) -> Arc<Self> {
        let isolate = overrides
            .isolate
            .into_iter()
            .map(|(name, rule)| {
                let realm = match rule {
                    IsolateRule::Shared => Realm::Shared,
                    IsolateRule::Named(label) => Realm::Named(label),
                    IsolateRule::Private => Realm::Private(Uuid::new_v4()),
                };
                (name, realm)
            })
            .collect();
        Arc::new(Self {
            parent: Some(Arc::clone(parent)),
            state,
            runtime,
            isolate,
            intercept: overrides.intercept.into_iter().collect(),
            inject: overrides.inject,
            properties: Mutex::new(HashMap::new()),
        })
    }

    fn ancestors(&self) -> impl Iterator<Item = &ContextNode> {
        std::iter::successors(Some(self), |node| node.parent.as_deref())
    }

    /// Identity token `name` resolves to here.
    pub(crate) fn token(&self, name: &str) -> Token {
        let realm = self
            .ancestors()
            .find_map(|node| node.isolate.get(name))
            .cloned()
            .unwrap_or(Realm::Shared);
        Token {
            name: name.to_string(),
            realm,
        }
    }

    pub(crate) fn intercept(&self, name: &str) -> Option<Value> {
        self.ancestors()
            .find_map(|node| node.intercept.get(name))
            .cloned()
    }

    /// Declared by the nearest ancestor that declares anything.
    pub(crate) fn is_declared(&self, name: &str) -> bool {
        self.ancestors()
            .find_map(|node| node.inject.as_ref())
            .is_some_and(|inject| inject.contains(name))
    }

    pub(crate) fn property(&self, name: &str) -> Option<Service> {
        self.ancestors()
            .find_map(|node| node.properties.lock().get(name).cloned())
    }

    fn set_property(&self, name: &str, value: Service) {
        self.properties.lock().insert(name.to_string(), value);
    }
}

impl fmt::Debug for ContextNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextNode")
            .field("state", &self.state)
            .field("isolate", &self.isolate)
            .field("inject", &self.inject)
            .finish()
    }
}

/// Context reference that does not keep the kernel alive.
#[derive(Clone)]
pub(crate) struct WeakContext {
    kernel: Weak<Kernel>,
    node: Arc<ContextNode>,
}

impl WeakContext {
    pub(crate) fn upgrade(&self) -> Option<Context> {
        self.kernel
            .upgrade()
            .map(|kernel| Context::from_parts(kernel, Arc::clone(&self.node)))
    }
}

/// A scope in the context tree.
#[derive(Clone)]
pub struct Context {
    kernel: Arc<Kernel>,
    node: Arc<ContextNode>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Root context with the default kernel configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(KernelConfig::default())
    }

    #[must_use]
    pub fn with_config(config: KernelConfig) -> Self {
        let (kernel, node) = Kernel::bootstrap(config);
        info!("[Kernel] Root context created");
        Self { kernel, node }
    }

    pub(crate) fn from_parts(kernel: Arc<Kernel>, node: Arc<ContextNode>) -> Self {
        Self { kernel, node }
    }

    pub(crate) fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub(crate) fn downgrade(&self) -> WeakContext {
        WeakContext {
            kernel: Arc::downgrade(&self.kernel),
            node: Arc::clone(&self.node),
        }
    }

    /// Child scope sharing this context's state.
    #[must_use]
    pub fn extend(&self, overrides: Overrides) -> Context {
        let overrides = self.canonical_overrides(overrides);
        let node = ContextNode::child(&self.node, self.node.state, self.node.runtime, overrides);
        Self::from_parts(Arc::clone(&self.kernel), node)
    }

    /// Names in `overrides` with aliases resolved.
    fn canonical_overrides(&self, mut overrides: Overrides) -> Overrides {
        let inner = self.kernel.lock();
        for (name, _) in &mut overrides.isolate {
            *name = inner.services.canonical(name);
        }
        for (name, _) in &mut overrides.intercept {
            *name = inner.services.canonical(name);
        }
        if let Some(inject) = overrides.inject.take() {
            overrides.inject = Some(inject.iter().map(|name| inner.services.canonical(name)).collect());
        }
        overrides
    }

    fn canonical(&self, name: &str) -> String {
        self.kernel.lock().services.canonical(name)
    }

    #[must_use]
    pub fn token(&self, name: &str) -> Token {
        self.node.token(&self.canonical(name))
    }

    /// Config override for service `name`, as set by
    /// [`Overrides::intercept`] on this scope or an ancestor.
    #[must_use]
    pub fn intercept(&self, name: &str) -> Option<Value> {
        self.node.intercept(&self.canonical(name))
    }

    #[must_use]
    pub fn is_declared(&self, name: &str) -> bool {
        self.node.is_declared(&self.canonical(name))
    }

    /// Whether both handles point at the same scope node.
    #[must_use]
    pub fn same_scope(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    // ------------------------------------------------------------------
    // Services
    // ------------------------------------------------------------------

    /// Mark `name` as a service slot.
    pub fn provide(&self, name: &str) {
        let mut inner = self.kernel.lock();
        let name = inner.services.canonical(name);
        inner.services.provide(&name);
    }

    /// Make every name in `aliases` resolve to the same slot as `name`.
    ///
    /// Aliases are kernel-wide. Names declared or isolated before the alias
    /// was registered keep their literal spelling.
    pub fn alias<I, S>(&self, name: &str, aliases: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inner = self.kernel.lock();
        for alias in aliases {
            inner.services.alias(name, alias.as_ref())?;
        }
        Ok(())
    }

    /// Read a service or plain property.
    ///
    /// Unknown names that are neither declared nor set as properties are
    /// reported as an anomaly.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Service> {
        let name = &self.canonical(name);
        let token = self.node.token(name);
        if let Some(slot) = self.kernel.lock().services.get(&token) {
            return Some(slot.value.clone());
        }
        if self.node.is_declared(name) {
            return None;
        }
        if let Some(value) = self.node.property(name) {
            return Some(value);
        }
        self.kernel.report(Anomaly::UndeclaredAccess {
            name: name.to_string(),
        });
        None
    }

    /// Whether `name` is bound here or set as a property. Never reports.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        let name = &self.canonical(name);
        let token = self.node.token(name);
        self.kernel.lock().services.contains(&token) || self.node.property(name).is_some()
    }

    /// Plain property lookup. Never reports.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<Service> {
        self.node.property(&self.canonical(name))
    }

    /// Bind (`Some`) or unbind (`None`) a service.
    ///
    /// Binding the value that is already bound is a no-op. Binding a
    /// different value over an occupied slot fails with
    /// [`KernelError::ServiceOverwrite`]. A successful bind returns the
    /// handle of the ledger entry that unbinds it.
    pub fn set(&self, name: &str, value: Option<Service>) -> Result<Option<Disposer>> {
        let name = &self.canonical(name);
        let token = self.node.token(name);
        let current = self
            .kernel
            .lock()
            .services
            .get(&token)
            .map(|slot| slot.value.clone());

        match (current, value) {
            (None, None) => Ok(None),
            (Some(current), Some(value)) if current.same(&value) => Ok(None),
            (Some(_), Some(_)) => {
                self.kernel.report(Anomaly::ServiceOverwrite {
                    name: name.to_string(),
                });
                Err(KernelError::ServiceOverwrite {
                    name: name.to_string(),
                })
            }
            (Some(current), None) => {
                self.kernel.unbind(&token, &current);
                Ok(None)
            }
            (None, Some(value)) => Ok(Some(self.kernel.bind(&self.node, token, value))),
        }
    }

    /// Dynamic write. Service names go through [`Context::set`]; anything
    /// else becomes a plain property outside lifecycle tracking.
    pub fn assign(&self, name: &str, value: Service) -> Result<()> {
        let name = &self.canonical(name);
        let token = self.node.token(name);
        let known = {
            let inner = self.kernel.lock();
            inner.services.is_provided(name) || inner.services.contains(&token)
        };
        if known {
            if !self.node.is_declared(name) {
                self.kernel.report(Anomaly::UndeclaredServiceWrite {
                    name: name.to_string(),
                });
            }
            return self.set(name, Some(value)).map(|_| ());
        }
        self.kernel.report(Anomaly::PlainPropertyWrite {
            name: name.to_string(),
        });
        self.node.set_property(name, value);
        Ok(())
    }

    /// Context that owns the binding `name` resolves to.
    #[must_use]
    pub fn provider(&self, name: &str) -> Option<Context> {
        let token = self.token(name);
        let owner = self
            .kernel
            .lock()
            .services
            .get(&token)
            .map(|slot| Arc::clone(&slot.owner))?;
        Some(Self::from_parts(Arc::clone(&self.kernel), owner))
    }

    /// Call an invocable service.
    pub fn invoke(&self, name: &str, args: &Value) -> Result<Option<Value>> {
        match self.get(name) {
            Some(service) => service.invoke(name, args).map(Some),
            None => Ok(None),
        }
    }

    /// Register a service definition on this scope.
    ///
    /// Immediate services are bound now; the rest are bound when the kernel
    /// starts. Start and stop hooks follow the same timing.
    pub fn provide_service(&self, definition: ServiceDefinition) -> Result<()> {
        self.provide(&definition.name);
        if definition.immediate {
            self.set(&definition.name, Some(definition.value.clone()))?;
        }

        let weak = self.downgrade();
        let deferred = definition.clone();
        self.on_ready(move || {
            let Some(ctx) = weak.upgrade() else {
                return;
            };
            if let Some(start) = &deferred.on_start {
                start(&ctx);
            }
            if !deferred.immediate {
                if let Err(err) = ctx.set(&deferred.name, Some(deferred.value.clone())) {
                    warn!(service = %deferred.name, error = %err, "deferred bind failed");
                }
            }
        });

        if let Some(stop) = definition.on_stop {
            let weak = self.downgrade();
            self.on_dispose(move || {
                if let Some(ctx) = weak.upgrade() {
                    stop(&ctx);
                }
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Listen for events under this scope. The listener is removed when the
    /// scope's state is cleared.
    pub fn on<F>(&self, filter: EventFilter, callback: F) -> Disposer
    where
        F: Fn(&KernelEvent) + Send + Sync + 'static,
    {
        self.kernel
            .listen(&self.node, filter, None, Arc::new(callback))
    }

    /// Listen for one custom event.
    pub fn on_event<F>(&self, name: &str, callback: F) -> Disposer
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on(EventFilter::custom(name), move |event| {
            if let KernelEvent::Custom { payload, .. } = event {
                callback(payload);
            }
        })
    }

    /// Broadcast to every listener. Returns the number of receivers.
    pub fn emit(&self, event: KernelEvent) -> usize {
        self.kernel.broadcast(&event, None)
    }

    /// Broadcast only to listeners admitted by `scope`.
    pub fn emit_scoped(&self, event: KernelEvent, scope: ScopeFilter) -> usize {
        self.kernel.broadcast(&event, Some(&scope))
    }

    pub fn emit_custom(&self, name: &str, payload: Value) -> usize {
        self.emit(KernelEvent::custom(name, payload))
    }

    /// Run `callback` once the kernel is started, or now if it already is.
    pub fn on_ready<F>(&self, callback: F) -> Disposer
    where
        F: Fn() + Send + Sync + 'static,
    {
        if self.is_ready() {
            guard("ready", (), callback);
            return Disposer::inert();
        }
        self.on(EventFilter::topics(vec![EventTopic::Ready]), move |_| {
            callback();
        })
    }

    /// Start the kernel. Idempotent.
    pub fn start(&self) {
        let was_ready = std::mem::replace(&mut self.kernel.lock().ready, true);
        if was_ready {
            return;
        }
        info!("[Kernel] Ready");
        self.kernel.broadcast(&KernelEvent::Ready, None);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.kernel.lock().ready
    }

    // ------------------------------------------------------------------
    // Disposables and acceptors
    // ------------------------------------------------------------------

    /// Run `callback` when this scope's state is cleared.
    pub fn on_dispose<F>(&self, callback: F) -> Disposer
    where
        F: FnOnce() + Send + 'static,
    {
        self.collect("dispose", move || {
            callback();
            true
        })
    }

    /// Register a disposable on this scope's state.
    pub fn collect<F>(&self, label: impl Into<String>, action: F) -> Disposer
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        self.kernel
            .collect(self.node.state, label, None, Box::new(action))
    }

    /// Register an acceptor on this scope's state.
    pub fn accept(&self, acceptor: Acceptor) -> Disposer {
        let state = self.node.state;
        let label = acceptor.label();
        let immediate = acceptor
            .is_immediate()
            .then(|| acceptor.callback().cloned())
            .flatten();

        let id = {
            let mut inner = self.kernel.lock();
            let id = inner.next_disposable_id();
            match inner.states.get_mut(&state) {
                Some(node) if !node.disposed => {
                    node.acceptors.push((id, acceptor));
                    id
                }
                _ => return Disposer::inert(),
            }
        };

        let weak = Arc::downgrade(&self.kernel);
        let disposer = self.kernel.collect(
            state,
            label,
            None,
            Box::new(move || {
                let Some(kernel) = weak.upgrade() else {
                    return false;
                };
                let mut inner = kernel.lock();
                let Some(node) = inner.states.get_mut(&state) else {
                    return false;
                };
                let before = node.acceptors.len();
                node.acceptors.retain(|(entry, _)| *entry != id);
                node.acceptors.len() != before
            }),
        );

        if let Some(callback) = immediate {
            let config = self.config();
            guard("accept", false, || callback(&*config));
        }
        disposer
    }

    /// Changes to `keys` always restart the state.
    pub fn decline<I, S>(&self, keys: I) -> Disposer
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accept(Acceptor::keys(keys).on_change(|_| true))
    }

    /// Run `body` for every fork of this scope's runtime, until this scope's
    /// state is next cleared.
    pub fn on_fork<F>(&self, body: F) -> Disposer
    where
        F: Fn(&Context, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let state = self.node.state;
        let runtime = self.node.runtime;
        let body: PluginBody = Arc::new(body);
        let id = {
            let mut inner = self.kernel.lock();
            let id = inner.next_disposable_id();
            match inner.runtime_of_mut(state) {
                Some(node) => {
                    node.forkables.push(Forkable { id: Some(id), body });
                    id
                }
                None => return Disposer::inert(),
            }
        };

        let weak = Arc::downgrade(&self.kernel);
        self.kernel.collect(
            state,
            "fork",
            None,
            Box::new(move || {
                let Some(kernel) = weak.upgrade() else {
                    return false;
                };
                let mut inner = kernel.lock();
                let Some(node) = inner.runtime_of_mut(runtime) else {
                    return false;
                };
                let before = node.forkables.len();
                node.forkables.retain(|f| f.id != Some(id));
                node.forkables.len() != before
            }),
        )
    }

    /// Spawn a task on the ambient tokio runtime. The task is aborted when
    /// this scope's state is cleared.
    pub fn spawn<F>(&self, label: &str, future: F) -> Result<Disposer>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| KernelError::NoAsyncRuntime {
            label: label.to_string(),
        })?;
        let abort = handle.spawn(future).abort_handle();
        Ok(self.collect(format!("task <{label}>"), move || {
            abort.abort();
            true
        }))
    }

    // ------------------------------------------------------------------
    // Plugins
    // ------------------------------------------------------------------

    /// Activate `plugin` under this scope.
    pub fn plugin(&self, plugin: &Plugin, config: Value) -> Result<Fork> {
        if read_state(&self.kernel, self.node.state, |_, _| ()).is_none() {
            return Err(KernelError::Disposed(self.node.state));
        }
        let resolved = plugin.resolve_config(config)?;
        let existing = self.kernel.lock().registry.get(plugin.id());
        let runtime = match existing {
            Some(runtime) => {
                if !Runtime::new(Arc::clone(&self.kernel), runtime).is_forkable() {
                    self.kernel.report(Anomaly::DuplicatePlugin {
                        plugin: plugin.name().to_string(),
                    });
                }
                runtime
            }
            None => self
                .kernel
                .create_runtime(plugin, &self.node, Arc::clone(&resolved))?,
        };
        let id = self.kernel.fork(runtime, &self.node, resolved)?;
        Ok(Fork::new(Arc::clone(&self.kernel), id, runtime))
    }

    /// Activate an anonymous plugin that depends on `names`.
    pub fn inject<I, S, F>(&self, names: I, body: F) -> Result<Fork>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Context, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let plugin = Plugin::builder("anonymous").inject(names).apply(body).build();
        self.plugin(&plugin, Value::Null)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Config of this scope's state. `null` once disposed.
    #[must_use]
    pub fn config(&self) -> Config {
        read_state(&self.kernel, self.node.state, |_, node| Arc::clone(&node.config))
            .unwrap_or_else(|| Arc::new(Value::Null))
    }

    /// State that created this scope.
    #[must_use]
    pub fn state(&self) -> State {
        if self.node.state == self.node.runtime {
            State::Runtime(self.runtime())
        } else {
            State::Fork(Fork::new(
                Arc::clone(&self.kernel),
                self.node.state,
                self.node.runtime,
            ))
        }
    }

    #[must_use]
    pub fn runtime(&self) -> Runtime {
        Runtime::new(Arc::clone(&self.kernel), self.node.runtime)
    }

    #[must_use]
    pub fn registry(&self) -> Registry {
        Registry::new(Arc::clone(&self.kernel))
    }

    /// Listener counts grouped by filter, for leak checks.
    #[must_use]
    pub fn listener_snapshot(&self) -> BTreeMap<String, usize> {
        self.kernel.lock().listeners.counts()
    }

    /// Number of bound services across all realms.
    #[must_use]
    pub fn service_count(&self) -> usize {
        self.kernel.lock().services.len()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("state", &self.node.state)
            .field("runtime", &self.node.runtime)
            .finish()
    }
}

impl Kernel {
    /// Install a service slot, collect its unbind entry into the owner's
    /// state, then announce it to the matching realm.
    pub(crate) fn bind(self: &Arc<Self>, owner: &Arc<ContextNode>, token: Token, value: Service) -> Disposer {
        let name = token.name.clone();
        self.lock().services.insert(
            token.clone(),
            ServiceSlot {
                value: value.clone(),
                owner: Arc::clone(owner),
                binding: None,
            },
        );

        let weak = Arc::downgrade(self);
        let entry_token = token.clone();
        let entry_value = value;
        let disposer = self.collect(
            owner.state,
            format!("service <{name}>"),
            None,
            Box::new(move || {
                weak.upgrade()
                    .is_some_and(|kernel| kernel.unbind(&entry_token, &entry_value))
            }),
        );
        let Some(entry) = disposer.id() else {
            return disposer;
        };
        if let Some(slot) = self.lock().services.get_mut(&token) {
            slot.binding = Some((owner.state, entry));
        }

        info!("[Service] Bound service {}", name);
        self.broadcast(
            &KernelEvent::ServiceBound { name: name.clone() },
            Some(&ScopeFilter::Isolate { name, token }),
        );
        disposer
    }

    /// Remove the slot for `token` if it still holds `expected`. Dependents
    /// are notified before the value goes away.
    pub(crate) fn unbind(&self, token: &Token, expected: &Service) -> bool {
        let holds = |kernel: &Kernel| {
            kernel
                .lock()
                .services
                .get(token)
                .is_some_and(|slot| slot.value.same(expected))
        };
        if !holds(self) {
            return false;
        }

        self.broadcast(
            &KernelEvent::ServiceUnbinding {
                name: token.name.clone(),
            },
            Some(&ScopeFilter::Isolate {
                name: token.name.clone(),
                token: token.clone(),
            }),
        );
        if !holds(self) {
            return false;
        }

        let detached = {
            let mut inner = self.lock();
            let binding = inner.services.remove(token).and_then(|slot| slot.binding);
            binding.and_then(|(state, entry)| {
                inner
                    .states
                    .get_mut(&state)
                    .and_then(|node| node.ledger.remove(entry))
            })
        };
        drop(detached);
        info!("[Service] Unbound service {}", token.name);
        true
    }
}
