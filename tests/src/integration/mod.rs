//! # Integration Scenarios
//!
//! Cross-module behaviour of the kernel: plugins, forks, services and
//! config updates working together through the public API only.

pub mod lifecycle;
pub mod updates;
