//! # Acceptors and Config Diffing
//!
//! An acceptor claims some (or all) configuration keys. When a state's
//! config changes, [`diff`] decides between a live patch and a full restart:
//! any changed key that no acceptor claims forces a restart, and any
//! acceptor callback may also request one by returning `true`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

pub type AcceptCallback = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// A claim over configuration keys, with an optional change callback.
#[derive(Clone)]
pub struct Acceptor {
    keys: Option<Vec<String>>,
    callback: Option<AcceptCallback>,
    immediate: bool,
}

impl Acceptor {
    /// Claim every key.
    #[must_use]
    pub fn all() -> Self {
        Self {
            keys: None,
            callback: None,
            immediate: false,
        }
    }

    /// Claim only the listed keys.
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: Some(keys.into_iter().map(Into::into).collect()),
            callback: None,
            immediate: false,
        }
    }

    /// Callback invoked with the new config when a claimed key changes.
    /// Returning `true` requests a restart anyway.
    #[must_use]
    pub fn on_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Also invoke the callback once with the current config on registration.
    #[must_use]
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub(crate) fn is_immediate(&self) -> bool {
        self.immediate
    }

    pub(crate) fn callback(&self) -> Option<&AcceptCallback> {
        self.callback.as_ref()
    }

    /// Ledger label, `accept <a, b>` or `accept <*>`.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.keys {
            Some(keys) if !keys.is_empty() => format!("accept <{}>", keys.join(", ")),
            _ => "accept <*>".to_string(),
        }
    }
}

impl fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acceptor")
            .field("keys", &self.keys)
            .field("callback", &self.callback.is_some())
            .field("immediate", &self.immediate)
            .finish()
    }
}

/// Keys of `old ∪ new` whose values differ. Non-object configs count as empty.
#[must_use]
pub fn modified_keys(old: &Value, new: &Value) -> BTreeSet<String> {
    let empty = serde_json::Map::new();
    let old = old.as_object().unwrap_or(&empty);
    let new = new.as_object().unwrap_or(&empty);
    old.keys()
        .chain(new.keys())
        .filter(|key| old.get(*key) != new.get(*key))
        .cloned()
        .collect()
}

/// Classify a config change. Returns `true` when a full restart is needed.
pub fn diff(old: &Value, new: &Value, acceptors: &[Acceptor]) -> bool {
    let modified = modified_keys(old, new);
    let mut declined = modified.clone();
    let mut should_restart = false;

    for acceptor in acceptors {
        match &acceptor.keys {
            Some(keys) => {
                for key in keys {
                    declined.remove(key);
                }
                if !keys.iter().any(|key| modified.contains(key)) {
                    continue;
                }
            }
            None => declined.clear(),
        }
        if let Some(callback) = &acceptor.callback {
            if callback(new) {
                should_restart = true;
            }
        }
    }

    !declined.is_empty() || should_restart
}
