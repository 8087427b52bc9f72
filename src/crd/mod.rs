//! Custom Resource Definitions (CRDs) for tenant-operator.
//!
//! - `Tenant`: a set of namespaces plus the policy enforced across them

mod tenant;

pub use tenant::*;
