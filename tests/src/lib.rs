//! # Scope Kernel Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/          # Criterion benchmarks for fork churn and restarts
//! └── src/
//!     ├── support.rs    # Shared fixtures (counters, journals, plugins)
//!     └── integration/  # Cross-module lifecycle scenarios
//!         ├── lifecycle.rs
//!         ├── services.rs
//!         ├── updates.rs
//!         └── scenarios.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p scope-tests
//!
//! # By category
//! cargo test -p scope-tests integration::lifecycle::
//! cargo test -p scope-tests integration::updates::
//!
//! # Benchmarks
//! cargo bench -p scope-tests
//! ```

#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(dead_code)]

pub mod integration;
pub mod support;
