//! # Kernel
//!
//! Owner of every shared table: the state arena, the service arena, the
//! listener table and the plugin registry. All of it sits behind one mutex
//! that is never held while user code runs, so bodies, listeners and
//! disposables may call back into the kernel freely.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use tracing::{debug, warn};

use crate::bus::{filter_key, Callback, ListenerTable};
use crate::config::KernelConfig;
use crate::context::ContextNode;
use crate::error::Anomaly;
use crate::events::{EventFilter, KernelEvent, ScopeFilter};
use crate::ledger::{guard, DisposableId, Disposer};
use crate::registry::RegistryTable;
use crate::service::ServiceStore;
use crate::state::{RuntimeNode, StateId, StateKind, StateNode};

pub(crate) struct Inner {
    pub(crate) states: HashMap<StateId, StateNode>,
    pub(crate) services: ServiceStore,
    pub(crate) listeners: ListenerTable,
    pub(crate) registry: RegistryTable,
    pub(crate) ready: bool,
    next_disposable: u64,
}

impl Inner {
    pub(crate) fn next_disposable_id(&mut self) -> DisposableId {
        self.next_disposable += 1;
        DisposableId(self.next_disposable)
    }
}

pub struct Kernel {
    inner: Mutex<Inner>,
    pub(crate) config: KernelConfig,
}

impl Kernel {
    /// Create a kernel together with its root runtime and root context.
    pub(crate) fn bootstrap(config: KernelConfig) -> (Arc<Self>, Arc<ContextNode>) {
        let mut registry = RegistryTable::default();
        let root_id = registry.next_id();
        let root = ContextNode::root(root_id);
        let node = StateNode::new(
            root_id,
            StateKind::Runtime(RuntimeNode::root()),
            Arc::clone(&root),
            Arc::clone(&root),
            Arc::new(Value::Object(serde_json::Map::new())),
        );

        let mut states = HashMap::new();
        states.insert(root_id, node);

        let kernel = Arc::new(Self {
            inner: Mutex::new(Inner {
                states,
                services: ServiceStore::default(),
                listeners: ListenerTable::default(),
                registry,
                ready: false,
                next_disposable: 0,
            }),
            config,
        });
        (kernel, root)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock()
    }

    /// Deliver `event` to every matching listener admitted by `scope`.
    pub(crate) fn broadcast(&self, event: &KernelEvent, scope: Option<&ScopeFilter>) -> usize {
        let targets = self.lock().listeners.snapshot(event, scope);
        let mut delivered = 0;
        for (id, callback) in targets {
            if !self.lock().listeners.contains(id) {
                continue;
            }
            guard("listener", (), || callback(event));
            delivered += 1;
        }
        debug!(topic = ?event.topic(), receivers = delivered, "Event broadcast");
        delivered
    }

    /// Broadcast an anomaly and log it unless muted.
    pub(crate) fn report(&self, anomaly: Anomaly) {
        if self.config.report_anomalies {
            warn!(kind = anomaly.kind(), "{anomaly}");
        }
        self.broadcast(&KernelEvent::Anomaly(anomaly), None);
    }

    /// Register a listener under `context`, collected into the context's
    /// state. `owner` marks hooks that survive a preserving clear.
    pub(crate) fn listen(
        self: &Arc<Self>,
        context: &Arc<ContextNode>,
        filter: EventFilter,
        owner: Option<StateId>,
        callback: Callback,
    ) -> Disposer {
        let key = filter_key(&filter);
        let id = self
            .lock()
            .listeners
            .add(Arc::clone(context), filter, callback);
        let weak = Arc::downgrade(self);
        self.collect(
            context.state,
            format!("listener <{key}>"),
            owner,
            Box::new(move || {
                weak.upgrade()
                    .is_some_and(|kernel| kernel.lock().listeners.remove(id))
            }),
        )
    }
}
