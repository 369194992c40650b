//! # Plugin Registry
//!
//! Maps plugin definitions to their runtime and issues state identifiers.
//! A definition is registered at most once; later `plugin()` calls reuse
//! the runtime and add another fork under it. Runtimes are reference
//! counted by their forks: the last fork to leave deletes the runtime.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::error::{KernelError, Result};
use crate::kernel::Kernel;
use crate::plugin::{Plugin, PluginId};
use crate::runtime::Runtime;
use crate::state::StateId;

#[derive(Default)]
pub(crate) struct RegistryTable {
    runtimes: HashMap<PluginId, (Plugin, StateId)>,
    counter: u64,
}

impl RegistryTable {
    /// Next unique state identifier.
    pub(crate) fn next_id(&mut self) -> StateId {
        let id = StateId(self.counter);
        self.counter += 1;
        id
    }

    pub(crate) fn counter(&self) -> u64 {
        self.counter
    }

    pub(crate) fn set(&mut self, plugin: &Plugin, runtime: StateId) -> Result<()> {
        if self.runtimes.contains_key(&plugin.id()) {
            return Err(KernelError::AlreadyRegistered {
                plugin: plugin.name().to_string(),
            });
        }
        info!("[Registry] Registering plugin: {}", plugin.name());
        self.runtimes.insert(plugin.id(), (plugin.clone(), runtime));
        Ok(())
    }

    pub(crate) fn get(&self, plugin: PluginId) -> Option<StateId> {
        self.runtimes.get(&plugin).map(|(_, runtime)| *runtime)
    }

    pub(crate) fn remove(&mut self, plugin: PluginId) -> Option<StateId> {
        self.runtimes.remove(&plugin).map(|(_, runtime)| runtime)
    }

    pub(crate) fn len(&self) -> usize {
        self.runtimes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }

    pub(crate) fn runtime_ids(&self) -> Vec<StateId> {
        let mut ids: Vec<StateId> = self.runtimes.values().map(|(_, id)| *id).collect();
        ids.sort();
        ids
    }
}

/// Handle to the plugin registry of one kernel.
#[derive(Clone)]
pub struct Registry {
    kernel: Arc<Kernel>,
}

impl Registry {
    pub(crate) fn new(kernel: Arc<Kernel>) -> Self {
        Self { kernel }
    }

    /// Runtime of a registered definition.
    #[must_use]
    pub fn get(&self, plugin: &Plugin) -> Option<Runtime> {
        let id = self.kernel.lock().registry.get(plugin.id())?;
        Some(Runtime::new(Arc::clone(&self.kernel), id))
    }

    #[must_use]
    pub fn has(&self, plugin: &Plugin) -> bool {
        self.kernel.lock().registry.get(plugin.id()).is_some()
    }

    /// Dispose the runtime of `plugin` and every fork under it.
    pub fn delete(&self, plugin: &Plugin) -> bool {
        self.kernel.registry_delete(plugin.id())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.kernel.lock().registry.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kernel.lock().registry.is_empty()
    }

    /// Every registered runtime, in creation order.
    #[must_use]
    pub fn runtimes(&self) -> Vec<Runtime> {
        let ids = self.kernel.lock().registry.runtime_ids();
        ids.into_iter()
            .map(|id| Runtime::new(Arc::clone(&self.kernel), id))
            .collect()
    }

    /// Number of state identifiers issued so far.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.kernel.lock().registry.counter()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("len", &self.len()).finish()
    }
}

impl Kernel {
    /// Dispose the runtime registered for `plugin`. Map removal happens
    /// inside the runtime's disposal.
    pub(crate) fn registry_delete(self: &Arc<Self>, plugin: PluginId) -> bool {
        let Some(runtime) = self.lock().registry.get(plugin) else {
            return false;
        };
        self.dispose_runtime(runtime)
    }
}
