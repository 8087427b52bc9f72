//! Resource generation module.
//!
//! Naming, labelling and ownership helpers for the objects a Tenant projects
//! into its namespaces, plus Kubernetes quantity arithmetic.
//!
//! ## Resources Generated
//!
//! | Resource | Name | Index label |
//! |----------|------|-------------|
//! | NetworkPolicy | `<tenant>-<i>` | `tenancy.smoketurner.com/network-policy` |
//! | LimitRange | `<tenant>-<i>` | `tenancy.smoketurner.com/limit-range` |
//! | ResourceQuota | `<tenant>-<i>` | `tenancy.smoketurner.com/resource-quota` |
//! | RoleBinding | `namespace:admin`, `namespace:deleter` | none |

pub mod common;
pub mod quantity;

// Re-export commonly used items from common
pub use common::{owner_reference, tenant_labels};
