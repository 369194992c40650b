//! # Services
//!
//! A service is a named capability bound under an identity [`Token`]. The
//! token is resolved from a context's isolate map, so the same name can refer
//! to different slots in different subtrees.
//!
//! All bound values live in one [`ServiceStore`] arena owned by the kernel;
//! [`crate::Context::set`] is the only writer.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::context::{Context, ContextNode};
use crate::error::{KernelError, Result};
use crate::ledger::DisposableId;
use crate::state::StateId;

/// Visibility domain of a service name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Realm {
    /// The default, shared by every context that does not isolate the name.
    Shared,
    /// Shared by every context isolating the name under the same label.
    Named(String),
    /// Unique to one `extend` call.
    Private(Uuid),
}

/// Identity of one service slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub name: String,
    pub realm: Realm,
}

impl Token {
    pub fn shared(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            realm: Realm::Shared,
        }
    }
}

pub type Invocation = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// A bound capability.
///
/// Identity is pointer identity: two services are the same only when they
/// share the same allocation.
#[derive(Clone)]
pub enum Service {
    /// Arbitrary shared data.
    Data(Arc<dyn Any + Send + Sync>),
    /// A single callable entry point.
    Invocable(Invocation),
}

impl Service {
    pub fn data<T: Any + Send + Sync>(value: T) -> Self {
        Self::Data(Arc::new(value))
    }

    pub fn invocable<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self::Invocable(Arc::new(f))
    }

    /// Pointer identity.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Data(a), Self::Data(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            (Self::Invocable(a), Self::Invocable(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => false,
        }
    }

    /// Typed view of a data service.
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Self::Data(value) => Arc::clone(value).downcast::<T>().ok(),
            Self::Invocable(_) => None,
        }
    }

    /// Call an invocable service. `name` is only used for the error.
    pub fn invoke(&self, name: &str, args: &Value) -> Result<Value> {
        match self {
            Self::Invocable(f) => Ok(f(args)),
            Self::Data(_) => Err(KernelError::NotInvocable {
                name: name.to_string(),
            }),
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(value) => write!(f, "Service::Data({:p})", Arc::as_ptr(value)),
            Self::Invocable(value) => write!(f, "Service::Invocable({:p})", Arc::as_ptr(value)),
        }
    }
}

pub(crate) struct ServiceSlot {
    pub(crate) value: Service,
    pub(crate) owner: Arc<ContextNode>,
    pub(crate) binding: Option<(StateId, DisposableId)>,
}

/// Arena of bound services, the set of names declared as services and the
/// alias table.
#[derive(Default)]
pub(crate) struct ServiceStore {
    slots: HashMap<Token, ServiceSlot>,
    provided: HashSet<String>,
    aliases: HashMap<String, String>,
}

impl ServiceStore {
    pub(crate) fn get(&self, token: &Token) -> Option<&ServiceSlot> {
        self.slots.get(token)
    }

    pub(crate) fn get_mut(&mut self, token: &Token) -> Option<&mut ServiceSlot> {
        self.slots.get_mut(token)
    }

    pub(crate) fn insert(&mut self, token: Token, slot: ServiceSlot) {
        self.provided.insert(token.name.clone());
        self.slots.insert(token, slot);
    }

    pub(crate) fn remove(&mut self, token: &Token) -> Option<ServiceSlot> {
        self.slots.remove(token)
    }

    pub(crate) fn contains(&self, token: &Token) -> bool {
        self.slots.contains_key(token)
    }

    pub(crate) fn provide(&mut self, name: &str) {
        self.provided.insert(name.to_string());
    }

    pub(crate) fn is_provided(&self, name: &str) -> bool {
        self.provided.contains(name)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Name `name` stands for once aliases are followed.
    pub(crate) fn canonical(&self, name: &str) -> String {
        self.aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Make `alias` resolve to the same slot as `name`.
    pub(crate) fn alias(&mut self, name: &str, alias: &str) -> Result<()> {
        let target = self.canonical(name);
        if alias == target {
            return Ok(());
        }
        if let Some(existing) = self.aliases.get(alias).filter(|existing| **existing != target) {
            return Err(KernelError::AliasConflict {
                alias: alias.to_string(),
                target: existing.clone(),
            });
        }
        if self.provided.contains(alias) || self.aliases.values().any(|t| t == alias) {
            return Err(KernelError::AliasConflict {
                alias: alias.to_string(),
                target: alias.to_string(),
            });
        }
        self.aliases.insert(alias.to_string(), target);
        Ok(())
    }
}

pub type ServiceHook = Arc<dyn Fn(&Context) + Send + Sync>;

/// Declarative service registration used by [`Context::provide_service`].
///
/// A non-immediate service is bound when the kernel starts; an immediate one
/// is bound as soon as it is provided. The start hook runs on kernel start
/// (or right away if already started), the stop hook when the providing
/// scope is cleared.
#[derive(Clone)]
pub struct ServiceDefinition {
    pub(crate) name: String,
    pub(crate) value: Service,
    pub(crate) immediate: bool,
    pub(crate) on_start: Option<ServiceHook>,
    pub(crate) on_stop: Option<ServiceHook>,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>, value: Service) -> Self {
        Self {
            name: name.into(),
            value,
            immediate: false,
            on_start: None,
            on_stop: None,
        }
    }

    #[must_use]
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    #[must_use]
    pub fn on_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Context) + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn on_stop<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Context) + Send + Sync + 'static,
    {
        self.on_stop = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("immediate", &self.immediate)
            .finish()
    }
}
