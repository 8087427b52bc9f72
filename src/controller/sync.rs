//! Projection of declared policy lists into tenant namespaces.
//!
//! Each entry of a tenant's declared list (network policies, limit ranges,
//! resource quotas) becomes one object per owned namespace, named
//! `<tenant>-<index>` and labeled with the tenant and the index. The
//! [`Projected`] trait supplies the per-kind pieces; everything else is
//! shared.

use std::fmt;

use k8s_openapi::api::core::v1::{LimitRange, LimitRangeSpec, ResourceQuota, ResourceQuotaSpec};
use k8s_openapi::api::networking::v1::{NetworkPolicy, NetworkPolicySpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::error::{Error, Result};
use crate::controller::retry::{Backoff, retry_on_conflict};
use crate::crd::Tenant;
use crate::resources::common::{
    LIMIT_RANGE_LABEL, NETWORK_POLICY_LABEL, RESOURCE_QUOTA_LABEL, index_keys, merge_labels,
    projected_labels, projected_meta, projected_name, set_controller_reference,
};
use crate::store::{Managed, ObjectStore, label_not_in};

/// A kind projected from a tenant's declared spec list.
pub trait Projected: Managed {
    /// Label carrying the declared index.
    const INDEX_LABEL: &'static str;

    /// Declared payload of one list entry.
    type Spec: Clone + PartialEq + Send + Sync;

    /// The tenant's declared list for this kind.
    fn declared(tenant: &Tenant) -> &[Self::Spec];

    /// New object with the given metadata and payload.
    fn build(metadata: ObjectMeta, spec: Self::Spec) -> Self;

    fn spec(&self) -> Option<&Self::Spec>;

    fn set_spec(&mut self, spec: Self::Spec);
}

impl Projected for NetworkPolicy {
    const INDEX_LABEL: &'static str = NETWORK_POLICY_LABEL;
    type Spec = NetworkPolicySpec;

    fn declared(tenant: &Tenant) -> &[NetworkPolicySpec] {
        &tenant.spec.network_policies
    }

    fn build(metadata: ObjectMeta, spec: NetworkPolicySpec) -> Self {
        NetworkPolicy {
            metadata,
            spec: Some(spec),
            ..Default::default()
        }
    }

    fn spec(&self) -> Option<&NetworkPolicySpec> {
        self.spec.as_ref()
    }

    fn set_spec(&mut self, spec: NetworkPolicySpec) {
        self.spec = Some(spec);
    }
}

impl Projected for LimitRange {
    const INDEX_LABEL: &'static str = LIMIT_RANGE_LABEL;
    type Spec = LimitRangeSpec;

    fn declared(tenant: &Tenant) -> &[LimitRangeSpec] {
        &tenant.spec.limit_ranges
    }

    fn build(metadata: ObjectMeta, spec: LimitRangeSpec) -> Self {
        LimitRange {
            metadata,
            spec: Some(spec),
        }
    }

    fn spec(&self) -> Option<&LimitRangeSpec> {
        self.spec.as_ref()
    }

    fn set_spec(&mut self, spec: LimitRangeSpec) {
        self.spec = Some(spec);
    }
}

impl Projected for ResourceQuota {
    const INDEX_LABEL: &'static str = RESOURCE_QUOTA_LABEL;
    type Spec = ResourceQuotaSpec;

    fn declared(tenant: &Tenant) -> &[ResourceQuotaSpec] {
        &tenant.spec.resource_quotas
    }

    fn build(metadata: ObjectMeta, spec: ResourceQuotaSpec) -> Self {
        ResourceQuota {
            metadata,
            spec: Some(spec),
            status: None,
        }
    }

    fn spec(&self) -> Option<&ResourceQuotaSpec> {
        self.spec.as_ref()
    }

    fn set_spec(&mut self, spec: ResourceQuotaSpec) {
        self.spec = Some(spec);
    }
}

/// Result of a create-or-update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Created => write!(f, "created"),
            Outcome::Updated => write!(f, "updated"),
            Outcome::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Project the tenant's declared list of `K` into every owned namespace,
/// pruning objects whose index is no longer declared.
pub async fn sync_projections<K, S>(store: &S, tenant: &Tenant) -> Result<()>
where
    K: Projected,
    S: ObjectStore,
{
    let declared = K::declared(tenant);
    let keys = index_keys(declared.len());
    info!(
        tenant = %tenant.name_any(),
        kind = %K::kind(&()),
        declared = declared.len(),
        namespaces = tenant.namespaces().len(),
        "Syncing projected objects"
    );

    for ns in tenant.namespaces() {
        prune::<K, S>(store, ns, &keys).await?;
        for (index, spec) in declared.iter().enumerate() {
            ensure_projected::<K, S>(store, tenant, ns, index, spec).await?;
        }
    }
    Ok(())
}

/// Delete every `K` in `namespace` carrying the index label with a value
/// outside `keys`.
pub async fn prune<K, S>(store: &S, namespace: &str, keys: &[String]) -> Result<()>
where
    K: Projected,
    S: ObjectStore,
{
    let selector = label_not_in(K::INDEX_LABEL, keys);
    let selector = &selector;
    let deleted = retry_on_conflict(Backoff::fixed(), || async move {
        store
            .delete_collection::<K>(Some(namespace), selector)
            .await
    })
    .await?;
    if deleted > 0 {
        info!(kind = %K::kind(&()), namespace = %namespace, deleted, "Pruned undeclared objects");
    }
    Ok(())
}

/// Create or update the `K` projected for declared `index` in `namespace`.
///
/// Labels and the controller reference are merged in and the payload is
/// overwritten with the declared spec. Writes nothing when already current.
pub async fn ensure_projected<K, S>(
    store: &S,
    tenant: &Tenant,
    namespace: &str,
    index: usize,
    spec: &K::Spec,
) -> Result<Outcome>
where
    K: Projected,
    S: ObjectStore,
{
    let tenant_name = tenant.name_any();
    let name = projected_name(&tenant_name, index);
    let labels = projected_labels(&tenant_name, K::INDEX_LABEL, index);
    let (name, labels) = (&name, &labels);

    let outcome = retry_on_conflict(Backoff::default_backoff(), || async move {
        let Some(mut existing) = store.get::<K>(Some(namespace), name).await? else {
            let meta = projected_meta(tenant, namespace, name.clone(), labels.clone());
            return match store.create(&K::build(meta, spec.clone())).await {
                Ok(_) => Ok(Outcome::Created),
                // Lost a create race; re-read and update instead
                Err(Error::AlreadyExists(what)) => Err(Error::Conflict(what)),
                Err(e) => Err(e),
            };
        };

        let mut changed = merge_labels(existing.meta_mut(), labels);
        changed |= set_controller_reference(existing.meta_mut(), tenant);
        if existing.spec() != Some(spec) {
            existing.set_spec(spec.clone());
            changed = true;
        }
        if !changed {
            return Ok(Outcome::Unchanged);
        }
        store.replace(&existing).await?;
        Ok(Outcome::Updated)
    })
    .await?;

    debug!(
        kind = %K::kind(&()),
        namespace = %namespace,
        name = %name,
        outcome = %outcome,
        "Projected object synced"
    );
    Ok(outcome)
}
