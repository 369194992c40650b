//! # Disposable Ledger
//!
//! Per-state stack of cleanup actions. Actions are released LIFO; a
//! preserving drain keeps the entries owned by the clearing state (its
//! dependency-watch hooks, and for runtimes the fork disposers).
//!
//! Every action runs inside a panic guard so one failing cleanup never
//! skips the rest of a drain.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Weak;

use tracing::error;

use crate::kernel::Kernel;
use crate::state::StateId;

pub(crate) type DisposeAction = Box<dyn FnOnce() -> bool + Send>;

/// Identifier of one ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisposableId(pub(crate) u64);

pub(crate) struct LedgerEntry {
    pub(crate) id: DisposableId,
    pub(crate) label: String,
    pub(crate) owner: Option<StateId>,
    action: DisposeAction,
}

impl LedgerEntry {
    pub(crate) fn new(
        id: DisposableId,
        label: impl Into<String>,
        owner: Option<StateId>,
        action: DisposeAction,
    ) -> Self {
        Self {
            id,
            label: label.into(),
            owner,
            action,
        }
    }

    /// Run the action under the panic guard.
    pub(crate) fn run(self) -> bool {
        let Self { label, action, .. } = self;
        guard(&label, false, action)
    }
}

/// Ordered list of cleanup actions for one state.
#[derive(Default)]
pub(crate) struct Ledger {
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    pub(crate) fn push(&mut self, entry: LedgerEntry) {
        self.entries.push(entry);
    }

    /// Detach an entry without running it.
    pub(crate) fn remove(&mut self, id: DisposableId) -> Option<LedgerEntry> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(index))
    }

    pub(crate) fn contains(&self, id: DisposableId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.label.clone()).collect()
    }

    /// Take every entry that must run, newest first.
    ///
    /// With `retain = Some(owner)`, entries tagged with that owner stay in
    /// the ledger in their original order.
    pub(crate) fn drain(&mut self, retain: Option<StateId>) -> Vec<LedgerEntry> {
        let (kept, mut released): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| retain.is_some() && e.owner == retain);
        self.entries = kept;
        released.reverse();
        released
    }
}

/// Handle returned by every `collect`-style registration.
///
/// Disposing removes the entry from its ledger and runs the action once.
#[derive(Clone)]
pub struct Disposer {
    target: Option<(Weak<Kernel>, StateId, DisposableId)>,
}

impl Disposer {
    pub(crate) fn new(kernel: Weak<Kernel>, state: StateId, id: DisposableId) -> Self {
        Self {
            target: Some((kernel, state, id)),
        }
    }

    /// A handle that refers to nothing.
    pub(crate) fn inert() -> Self {
        Self { target: None }
    }

    /// Remove the entry and run its action. Returns false if the entry was
    /// already released.
    pub fn dispose(&self) -> bool {
        let Some((kernel, state, id)) = &self.target else {
            return false;
        };
        let Some(kernel) = kernel.upgrade() else {
            return false;
        };
        let entry = kernel
            .lock()
            .states
            .get_mut(state)
            .and_then(|node| node.ledger.remove(*id));
        match entry {
            Some(entry) => entry.run(),
            None => false,
        }
    }

    /// Whether the entry is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        let Some((kernel, state, id)) = &self.target else {
            return false;
        };
        kernel.upgrade().is_some_and(|kernel| {
            kernel
                .lock()
                .states
                .get(state)
                .is_some_and(|node| node.ledger.contains(*id))
        })
    }

    pub(crate) fn id(&self) -> Option<DisposableId> {
        self.target.as_ref().map(|(_, _, id)| *id)
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some((_, state, id)) => f
                .debug_struct("Disposer")
                .field("state", state)
                .field("id", id)
                .finish(),
            None => f.write_str("Disposer(inert)"),
        }
    }
}

/// Extract a human-readable message from a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

/// Run `f`, logging a panic and returning `default` instead of unwinding.
pub(crate) fn guard<T>(label: &str, default: T, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            error!(label, panic = %panic_message(payload), "panic in scope callback");
            default
        }
    }
}
