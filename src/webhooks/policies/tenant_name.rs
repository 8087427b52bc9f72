//! Tenant name policy.
//!
//! Tenant names are lower-case alphanumeric words, optionally joined by
//! single hyphens (`oil`, `oil-and-gas`).

use std::sync::LazyLock;

use regex::Regex;

use super::ValidationResult;

static TENANT_NAME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").ok());

/// Whether `name` is a valid tenant name.
pub fn is_valid(name: &str) -> bool {
    TENANT_NAME_RE.as_ref().is_some_and(|re| re.is_match(name))
}

/// Validate a tenant name
pub fn validate(name: &str) -> ValidationResult {
    if is_valid(name) {
        return ValidationResult::allowed();
    }
    ValidationResult::denied(
        "InvalidTenantName",
        &format!(
            "tenant name {:?} must consist of lower case alphanumeric words joined by '-'",
            name
        ),
    )
}
