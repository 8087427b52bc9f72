//! Protected namespace name policy.
//!
//! Tier 1 (Name): Always enforced
//!
//! Denies namespaces whose name matches the administrator's
//! `--protected-namespace-regex`.

use super::{ValidationContext, ValidationResult};

/// Validate the namespace name against the protected pattern
pub fn validate(ctx: &ValidationContext<'_>) -> ValidationResult {
    if ctx.config.is_protected(ctx.namespace) {
        return ValidationResult::denied(
            "ProtectedNamespace",
            &format!(
                "namespace {} matches the protected namespace pattern and cannot be created by tenants",
                ctx.namespace
            ),
        );
    }
    ValidationResult::allowed()
}
