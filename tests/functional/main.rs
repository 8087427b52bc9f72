// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Functional tests for the Tenant reconcile and namespace admission.
//!
//! These tests drive full reconcile passes and admission reviews against the
//! in-memory object store, WITHOUT requiring a live Kubernetes cluster.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_exhausted_pool_freezes_siblings
//! ```
//!
//! ## Test Categories
//!
//! - **Reconcile tests**: quota pooling, pruning, idempotence, membership
//! - **Failure tests**: conflict retries and aggregated fan-out failures
//! - **Admission tests**: owner assignment and namespace policies

mod admission_tests;
mod failure_tests;
mod reconcile_tests;

// Re-export for use in tests
pub use fixtures::*;
