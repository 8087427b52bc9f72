//! Tenant status management.
//!
//! Provides the namespace counter phase and the Ready condition written at
//! the end of every reconcile. Both are read-modify-write cycles on the status
//! sub-resource, retried on conflict and skipped when nothing changed.

use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::error::{Error, Result};
use crate::controller::retry::{Backoff, retry_on_conflict};
use crate::crd::{Condition, Tenant, TenantStatus};
use crate::store::ObjectStore;

/// Builder for managing conditions list
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    /// Create a new condition builder
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    /// Start from existing conditions
    pub fn from_existing(conditions: &[Condition]) -> Self {
        Self {
            conditions: conditions.to_vec(),
        }
    }

    /// Add or update a condition.
    ///
    /// A condition in the same state as the existing one keeps its original
    /// transition time.
    pub fn set(&mut self, condition: Condition) -> &mut Self {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            if !existing.same_state(&condition) {
                *existing = condition;
            }
        } else {
            self.conditions.push(condition);
        }
        self
    }

    /// Set Ready condition
    pub fn ready(
        &mut self,
        ready: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::ready(ready, reason, message, generation))
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

impl Default for ConditionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .is_some_and(|c| c.status == "True")
}

/// Get the reason for a condition
pub fn get_condition_reason<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a str> {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .map(|c| c.reason.as_str())
}

async fn fetch<S: ObjectStore>(store: &S, name: &str) -> Result<Tenant> {
    store
        .get(None, name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Tenant {}", name)))
}

/// Republish the tenant's namespace count into `status.size`.
pub async fn update_namespace_count<S: ObjectStore>(store: &S, tenant: &Tenant) -> Result<Tenant> {
    let name = tenant.name_any();
    let name = name.as_str();
    let size = u32::try_from(tenant.namespaces().len()).unwrap_or(u32::MAX);
    retry_on_conflict(Backoff::default_backoff(), || async move {
        let mut current = fetch(store, name).await?;
        let status = current.status.get_or_insert_with(TenantStatus::default);
        if status.size == size {
            debug!(tenant = %name, size, "Namespace count unchanged");
            return Ok(current);
        }
        status.size = size;
        let updated = store.replace_status(&current).await?;
        info!(tenant = %name, size, "Updated namespace count");
        Ok(updated)
    })
    .await
}

/// Record the outcome of a reconcile as the tenant's Ready condition.
///
/// Returns whether the condition changed.
pub async fn set_ready_condition<S: ObjectStore>(
    store: &S,
    tenant: &Tenant,
    ready: bool,
    reason: &str,
    message: &str,
) -> Result<bool> {
    let name = tenant.name_any();
    let name = name.as_str();
    let generation = tenant.metadata.generation;
    retry_on_conflict(Backoff::default_backoff(), || async move {
        let mut current = fetch(store, name).await?;
        let status = current.status.get_or_insert_with(TenantStatus::default);
        let mut builder = ConditionBuilder::from_existing(&status.conditions);
        builder.ready(ready, reason, message, generation);
        let conditions = builder.build();
        if conditions == status.conditions {
            return Ok(false);
        }
        status.conditions = conditions;
        store.replace_status(&current).await?;
        debug!(tenant = %name, ready, reason = %reason, "Updated Ready condition");
        Ok(true)
    })
    .await
}
