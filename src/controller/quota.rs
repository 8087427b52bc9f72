//! Tenant-wide resource quota pools.
//!
//! Every declared quota spec `i` is projected as a ResourceQuota `<tenant>-<i>`
//! into each tenant namespace. Those siblings form one pool: their reported
//! usage is summed and compared against the declared hard limit, resource by
//! resource.
//!
//! - sum < hard: every sibling gets the declared hard value back.
//! - sum >= hard: every sibling's hard value is frozen at its own usage (zero
//!   when it reports none), so no namespace can consume more.
//!
//! The computed values are pushed to all siblings concurrently. Each push
//! retries its own conflicts; any push that still fails fails the whole pool,
//! and the next reconcile recomputes from a fresh read.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ResourceQuota, ResourceQuotaSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::controller::error::{Error, Result};
use crate::controller::fanout::fan_out;
use crate::controller::retry::{Backoff, retry_on_conflict};
use crate::controller::sync::{Outcome, Projected, prune};
use crate::crd::Tenant;
use crate::resources::common::{
    RESOURCE_QUOTA_LABEL, TENANT_LABEL, index_keys, merge_annotations, merge_labels, projected_labels,
    projected_meta, projected_name, set_controller_reference, used_quota_annotation,
};
use crate::resources::quantity::{self, Amount};
use crate::store::{ObjectStore, labels_equal};

/// Aggregated usage of one resource of one declared quota.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceUsage {
    pub index: usize,
    pub resource: String,
    /// Usage summed over every namespace of the tenant.
    pub used: Amount,
    /// Declared tenant-wide hard limit.
    pub hard: Amount,
}

impl ResourceUsage {
    /// Equality counts as exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.used >= self.hard
    }
}

/// Values to write on one sibling quota.
#[derive(Clone, Debug, PartialEq)]
pub struct SiblingUpdate {
    /// Declared quota index of the pool.
    pub index: usize,
    pub namespace: String,
    pub name: String,
    /// Hard values to set, per resource.
    pub hard: BTreeMap<String, Quantity>,
    /// Used-quota annotations to set.
    pub annotations: BTreeMap<String, String>,
    /// Declared spec, for the quota being reconciled only: its scopes are
    /// reset and undeclared hard entries dropped.
    pub declared: Option<ResourceQuotaSpec>,
}

/// Outcome of planning one pool.
#[derive(Clone, Debug, Default)]
pub struct PoolPlan {
    pub usages: Vec<ResourceUsage>,
    pub updates: Vec<SiblingUpdate>,
}

fn parse(quantity: &Quantity, context: &str) -> Result<Amount> {
    Amount::parse(quantity).map_err(|e| Error::Validation(format!("{}: {}", context, e)))
}

fn used_of<'a>(quota: &'a ResourceQuota, resource: &str) -> Option<&'a Quantity> {
    quota
        .status
        .as_ref()
        .and_then(|s| s.used.as_ref())
        .and_then(|used| used.get(resource))
}

/// Compute the hard values of every sibling of pool `index`.
///
/// `target` names the quota being reconciled (`namespace`, `name`); it
/// additionally receives the declared scopes.
pub fn plan_pool(
    index: usize,
    declared: &ResourceQuotaSpec,
    siblings: &[ResourceQuota],
    target: (&str, &str),
) -> Result<PoolPlan> {
    let mut updates: Vec<SiblingUpdate> = siblings
        .iter()
        .map(|q| {
            let namespace = q.namespace().unwrap_or_default();
            let name = q.name_any();
            let is_target = (namespace.as_str(), name.as_str()) == target;
            SiblingUpdate {
                index,
                namespace,
                name,
                hard: BTreeMap::new(),
                annotations: BTreeMap::new(),
                declared: is_target.then(|| declared.clone()),
            }
        })
        .collect();

    let mut usages = Vec::new();
    for (resource, declared_hard) in declared.hard.iter().flatten() {
        let used = quantity::sum(siblings.iter().map(|q| used_of(q, resource)))
            .map_err(|e| Error::Validation(format!("usage of {}: {}", resource, e)))?;
        let usage = ResourceUsage {
            index,
            resource: resource.clone(),
            used,
            hard: parse(declared_hard, resource)?,
        };
        let exhausted = usage.is_exhausted();
        debug!(
            index,
            resource = %resource,
            used = %usage.used,
            hard = %usage.hard,
            exhausted,
            "Computed tenant-wide usage"
        );

        let annotation = used_quota_annotation(resource);
        for (update, sibling) in updates.iter_mut().zip(siblings) {
            let hard = if exhausted {
                used_of(sibling, resource)
                    .cloned()
                    .unwrap_or_else(|| Quantity("0".to_string()))
            } else {
                declared_hard.clone()
            };
            update.hard.insert(resource.clone(), hard);
            update
                .annotations
                .insert(annotation.clone(), usage.used.to_string());
        }
        usages.push(usage);
    }

    Ok(PoolPlan { usages, updates })
}

/// Reconcile every declared quota pool of the tenant.
///
/// Returns the usage of every declared resource, for reporting.
pub async fn sync_resource_quotas<S: ObjectStore>(
    store: &S,
    tenant: &Tenant,
    max_concurrent: usize,
) -> Result<Vec<ResourceUsage>> {
    let tenant_name = tenant.name_any();
    let declared = &tenant.spec.resource_quotas;
    let keys = index_keys(declared.len());
    info!(
        tenant = %tenant_name,
        declared = declared.len(),
        namespaces = tenant.namespaces().len(),
        "Syncing resource quotas"
    );

    let mut usages: BTreeMap<(usize, String), ResourceUsage> = BTreeMap::new();
    for ns in tenant.namespaces() {
        prune::<ResourceQuota, S>(store, ns, &keys).await?;
        for (index, spec) in declared.iter().enumerate() {
            let target = ensure_quota(store, tenant, ns, index, spec).await?;

            let index_value = index.to_string();
            let selector = labels_equal([
                (TENANT_LABEL, tenant_name.as_str()),
                (RESOURCE_QUOTA_LABEL, index_value.as_str()),
            ]);
            let mut siblings: Vec<ResourceQuota> = store.list(None, &selector).await?;
            let target_name = target.name_any();
            if !siblings
                .iter()
                .any(|q| q.namespace().as_deref() == Some(ns.as_str()) && q.name_any() == target_name)
            {
                siblings.push(target);
            }

            let plan = plan_pool(index, spec, &siblings, (ns.as_str(), target_name.as_str()))?;
            push_pool(store, tenant, &plan.updates, max_concurrent).await?;
            for usage in plan.usages {
                usages.insert((usage.index, usage.resource.clone()), usage);
            }
        }
    }
    Ok(usages.into_values().collect())
}

/// Ensure quota `<tenant>-<index>` exists in `namespace`, creating it with the
/// declared spec when missing.
async fn ensure_quota<S: ObjectStore>(
    store: &S,
    tenant: &Tenant,
    namespace: &str,
    index: usize,
    spec: &ResourceQuotaSpec,
) -> Result<ResourceQuota> {
    let tenant_name = tenant.name_any();
    let name = projected_name(&tenant_name, index);
    if let Some(existing) = store.get::<ResourceQuota>(Some(namespace), &name).await? {
        return Ok(existing);
    }
    let labels = projected_labels(&tenant_name, RESOURCE_QUOTA_LABEL, index);
    let quota = ResourceQuota::build(
        projected_meta(tenant, namespace, name.clone(), labels),
        spec.clone(),
    );
    match store.create(&quota).await {
        Ok(created) => {
            info!(namespace = %namespace, name = %name, "ResourceQuota created");
            Ok(created)
        }
        Err(Error::AlreadyExists(_)) => store
            .get(Some(namespace), &name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("ResourceQuota {}/{}", namespace, name))),
        Err(e) => Err(e),
    }
}

async fn push_pool<S: ObjectStore>(
    store: &S,
    tenant: &Tenant,
    updates: &[SiblingUpdate],
    max_concurrent: usize,
) -> Result<()> {
    let units: Vec<_> = updates
        .iter()
        .map(|u| push_sibling(store, tenant, u))
        .collect();
    fan_out("update of outer ResourceQuota items", max_concurrent, units).await
}

/// Apply one sibling's computed values, re-reading it on every attempt.
async fn push_sibling<S: ObjectStore>(
    store: &S,
    tenant: &Tenant,
    update: &SiblingUpdate,
) -> Result<()> {
    let namespace = update.namespace.as_str();
    let name = update.name.as_str();
    let result = retry_on_conflict(Backoff::default_backoff(), || async move {
        let Some(mut quota) = store.get::<ResourceQuota>(Some(namespace), name).await? else {
            debug!(namespace = %namespace, name = %name, "ResourceQuota vanished, skipping");
            return Ok(Outcome::Unchanged);
        };
        if !apply_update(&mut quota, update, tenant) {
            return Ok(Outcome::Unchanged);
        }
        store.replace(&quota).await?;
        Ok(Outcome::Updated)
    })
    .await;

    match result {
        Ok(outcome) => {
            debug!(namespace = %namespace, name = %name, outcome = %outcome, "ResourceQuota synced");
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => {
            warn!(namespace = %namespace, name = %name, error = %e, "Cannot update ResourceQuota");
            Err(e)
        }
    }
}

/// Write `update` into `quota`. Returns whether anything changed.
pub fn apply_update(quota: &mut ResourceQuota, update: &SiblingUpdate, tenant: &Tenant) -> bool {
    let mut changed = merge_annotations(&mut quota.metadata, &update.annotations);
    let spec = quota.spec.get_or_insert_with(ResourceQuotaSpec::default);
    let hard = spec.hard.get_or_insert_with(BTreeMap::new);
    for (resource, value) in &update.hard {
        if hard.get(resource) != Some(value) {
            hard.insert(resource.clone(), value.clone());
            changed = true;
        }
    }

    if let Some(declared) = &update.declared {
        let declared_hard = declared.hard.as_ref();
        let before = hard.len();
        hard.retain(|resource, _| declared_hard.is_some_and(|d| d.contains_key(resource)));
        changed |= hard.len() != before;
        if spec.scopes != declared.scopes {
            spec.scopes = declared.scopes.clone();
            changed = true;
        }
        if spec.scope_selector != declared.scope_selector {
            spec.scope_selector = declared.scope_selector.clone();
            changed = true;
        }
        let labels = projected_labels(&tenant.name_any(), RESOURCE_QUOTA_LABEL, update.index);
        changed |= merge_labels(&mut quota.metadata, &labels);
        changed |= set_controller_reference(&mut quota.metadata, tenant);
    }
    changed
}
