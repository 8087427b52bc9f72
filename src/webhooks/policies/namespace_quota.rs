//! Namespace quota policy.
//!
//! Tier 2 (Tenant): Enforced once the owning tenant is known
//!
//! Denies a new namespace when the tenant already owns `spec.namespaceQuota`
//! namespaces.

use super::{ValidationContext, ValidationResult};

/// Validate that the owning tenant has room for another namespace
pub fn validate(ctx: &ValidationContext<'_>) -> ValidationResult {
    let Some(tenant) = ctx.tenant else {
        return ValidationResult::allowed();
    };
    if tenant.is_full() {
        return ValidationResult::denied(
            "NamespaceQuotaExceeded",
            &format!(
                "cannot exceed namespace quota: tenant {} already owns {} of {} namespaces",
                tenant.metadata.name.as_deref().unwrap_or_default(),
                tenant.size(),
                tenant.spec.namespace_quota
            ),
        );
    }
    ValidationResult::allowed()
}
