//! # Listener Table
//!
//! Synchronous broadcast storage. Listeners are registered against the
//! context that created them; scoped broadcasts only reach listeners whose
//! context is admitted by the emitter's [`ScopeFilter`].
//!
//! Delivery happens in [`crate::kernel::Kernel::broadcast`], which takes a
//! snapshot here and re-checks each listener before calling it, so a
//! listener removed by an earlier callback in the same broadcast is skipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::ContextNode;
use crate::events::{EventFilter, EventTopic, KernelEvent, ScopeFilter};

pub(crate) type Callback = Arc<dyn Fn(&KernelEvent) + Send + Sync>;

/// Identifier of one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    context: Arc<ContextNode>,
    filter: EventFilter,
    callback: Callback,
}

#[derive(Default)]
pub(crate) struct ListenerTable {
    listeners: Vec<Listener>,
    next_id: u64,
}

impl ListenerTable {
    pub(crate) fn add(
        &mut self,
        context: Arc<ContextNode>,
        filter: EventFilter,
        callback: Callback,
    ) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.push(Listener {
            id,
            context,
            filter,
            callback,
        });
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.id != id);
        self.listeners.len() != before
    }

    pub(crate) fn contains(&self, id: ListenerId) -> bool {
        self.listeners.iter().any(|l| l.id == id)
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Listeners that should receive `event`, in registration order.
    pub(crate) fn snapshot(
        &self,
        event: &KernelEvent,
        scope: Option<&ScopeFilter>,
    ) -> Vec<(ListenerId, Callback)> {
        self.listeners
            .iter()
            .filter(|l| l.filter.matches(event))
            .filter(|l| scope.map_or(true, |s| s.admits(&l.context)))
            .map(|l| (l.id, Arc::clone(&l.callback)))
            .collect()
    }

    /// Listener count grouped by filter, used for leak checks.
    pub(crate) fn counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for listener in &self.listeners {
            *counts.entry(filter_key(&listener.filter)).or_insert(0) += 1;
        }
        counts
    }
}

/// Stable textual key for a filter.
pub(crate) fn filter_key(filter: &EventFilter) -> String {
    if filter.topics.is_empty() || filter.topics.contains(&EventTopic::All) {
        return "*".to_string();
    }
    let mut parts: Vec<String> = filter.topics.iter().map(|t| format!("{t:?}")).collect();
    parts.extend(filter.names.iter().map(|n| format!("custom:{n}")));
    parts.join("+")
}
