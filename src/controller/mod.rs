//! Controller module for tenant-operator.
//!
//! Contains the Tenant reconciliation loop, its phases, error handling,
//! conflict retries and status management.

// Shared modules
pub mod context;
pub mod error;
pub mod fanout;
pub mod retry;
pub mod status;

// Tenant reconcile phases
pub mod namespaces;
pub mod quota;
pub mod role_bindings;
pub mod sync;

// Tenant controller
pub mod tenant_reconciler;
