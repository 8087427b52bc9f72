//! Validation policies for the admission webhooks.
//!
//! Policies are organized into tiers:
//! - Tier 1 (Name): enforced before owner assignment (protected names)
//! - Tier 2 (Tenant): enforced once the owning tenant is known (namespace quota)
//!
//! Tenant names are checked by their own endpoint through [`tenant_name`].

pub mod namespace_name;
pub mod namespace_quota;
pub mod tenant_name;

use crate::config::OperatorConfig;
use crate::crd::Tenant;

/// Result of a validation check
#[derive(Debug)]
pub struct ValidationResult {
    /// Whether the validation passed
    pub allowed: bool,
    /// Reason for denial (if not allowed)
    pub reason: Option<String>,
    /// Detailed message (if not allowed)
    pub message: Option<String>,
}

impl ValidationResult {
    /// Create an allowed result
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
        }
    }

    /// Create a denied result
    pub fn denied(reason: &str, message: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }
}

/// Context for namespace validation
pub struct ValidationContext<'a> {
    /// Name of the namespace being created
    pub namespace: &'a str,
    /// Owning tenant, once assigned
    pub tenant: Option<&'a Tenant>,
    /// Operator configuration
    pub config: &'a OperatorConfig,
}

impl ValidationContext<'_> {
    /// Check if the owning tenant has been decided
    pub fn has_tenant(&self) -> bool {
        self.tenant.is_some()
    }
}

/// Run all namespace validation policies applicable to `ctx`
pub fn validate_all(ctx: &ValidationContext<'_>) -> ValidationResult {
    // Tier 1: Name validations (always enforced)
    let result = namespace_name::validate(ctx);
    if !result.allowed {
        return result;
    }

    // Tier 2: Tenant validations (only once the owner is known)
    if ctx.has_tenant() {
        let result = namespace_quota::validate(ctx);
        if !result.allowed {
            return result;
        }
    }

    ValidationResult::allowed()
}
