//! # Scope Kernel - Reactive Plugin Lifecycle
//!
//! A tree of scoped contexts. Each context can expose named services,
//! require services from its ancestors, and be torn down and rebuilt when
//! its configuration or the availability of its dependencies changes.
//!
//! ## Lifecycle
//!
//! ```text
//! ┌──────────────┐  plugin()   ┌──────────────┐  plugin()   ┌──────────────┐
//! │   Context    │ ──────────► │   Runtime    │ ──────────► │     Fork     │
//! │  (any scope) │             │ (per plugin) │             │ (per call)   │
//! └──────────────┘             └──────────────┘             └──────────────┘
//!                                     │ dispose                    │ dispose
//!                                     ▼                            ▼
//!                               every fork goes            last fork takes
//!                                                          the runtime along
//! ```
//!
//! Every side effect a plugin body registers lands in the ledger of the
//! state it ran for. Clearing a state drains that ledger in reverse order,
//! so a body is always fully undone before it runs again.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use scope_kernel::{Context, Plugin, Service};
//! use serde_json::json;
//!
//! let root = Context::new();
//! let db = Plugin::function("db", |ctx, _config| {
//!     ctx.set("db", Some(Service::data(Pool::default())))?;
//!     Ok(())
//! });
//! let fork = root.plugin(&db, json!({ "url": "memory://" }))?;
//! fork.dispose();
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod acceptor;
mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod fork;
mod kernel;
pub mod ledger;
pub mod plugin;
pub mod registry;
pub mod runtime;
pub mod service;
pub mod state;

// Re-export main types
pub use acceptor::{diff, modified_keys, AcceptCallback, Acceptor};
pub use config::KernelConfig;
pub use context::{Context, Overrides};
pub use error::{Anomaly, KernelError, Result};
pub use events::{EventFilter, EventTopic, KernelEvent, ScopeFilter};
pub use fork::Fork;
pub use ledger::{DisposableId, Disposer};
pub use plugin::{Plugin, PluginBody, PluginBuilder, PluginId, Validator};
pub use registry::Registry;
pub use runtime::Runtime;
pub use service::{Invocation, Realm, Service, ServiceDefinition, ServiceHook, Token};
pub use state::{Config, State, StateId};
