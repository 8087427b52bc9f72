//! Common resource generation utilities.
//!
//! Label and annotation keys, deterministic names and owner references shared
//! by every object the operator projects into tenant namespaces.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::crd::Tenant;

/// API group of the Tenant resource.
pub const API_GROUP: &str = "tenancy.smoketurner.com";

/// Tenant identity label on namespaces and projected objects.
pub const TENANT_LABEL: &str = "tenancy.smoketurner.com/tenant";
/// Index label on projected NetworkPolicies.
pub const NETWORK_POLICY_LABEL: &str = "tenancy.smoketurner.com/network-policy";
/// Index label on projected LimitRanges.
pub const LIMIT_RANGE_LABEL: &str = "tenancy.smoketurner.com/limit-range";
/// Index label on projected ResourceQuotas.
pub const RESOURCE_QUOTA_LABEL: &str = "tenancy.smoketurner.com/resource-quota";

/// Comma-separated IngressClasses available in a tenant namespace.
pub const INGRESS_CLASSES_ANNOTATION: &str = "tenancy.smoketurner.com/ingress-classes";
/// Comma-separated StorageClasses available in a tenant namespace.
pub const STORAGE_CLASSES_ANNOTATION: &str = "tenancy.smoketurner.com/storage-classes";
/// Scheduler annotation restricting pods of a namespace to matching nodes.
pub const NODE_SELECTOR_ANNOTATION: &str = "scheduler.alpha.kubernetes.io/node-selector";

const USED_QUOTA_PREFIX: &str = "quota.tenancy.smoketurner.com/used-";

/// Annotation carrying the tenant-wide usage of `resource` on every quota sibling.
pub fn used_quota_annotation(resource: &str) -> String {
    format!("{}{}", USED_QUOTA_PREFIX, resource.replace('/', "_"))
}

/// Name of the object projected for declared spec `index`: `<tenant>-<index>`.
pub fn projected_name(tenant: &str, index: usize) -> String {
    format!("{}-{}", tenant, index)
}

/// Index label values for a declared list of `len` specs.
pub fn index_keys(len: usize) -> Vec<String> {
    (0..len).map(|i| i.to_string()).collect()
}

/// Labels on a projected object: tenant identity plus the kind's index label.
pub fn projected_labels(tenant: &str, index_label: &str, index: usize) -> BTreeMap<String, String> {
    BTreeMap::from([
        (TENANT_LABEL.to_string(), tenant.to_string()),
        (index_label.to_string(), index.to_string()),
    ])
}

/// Labels carrying only the tenant identity.
pub fn tenant_labels(tenant: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(TENANT_LABEL.to_string(), tenant.to_string())])
}

/// Create the controller owner reference for a Tenant.
pub fn owner_reference(tenant: &Tenant) -> OwnerReference {
    OwnerReference {
        api_version: Tenant::api_version(&()).to_string(),
        kind: Tenant::kind(&()).to_string(),
        name: tenant.name_any(),
        uid: tenant.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Whether `meta` has a controller owner reference to `tenant`, matched on
/// name and uid.
pub fn is_owned_by(meta: &ObjectMeta, tenant: &Tenant) -> bool {
    let name = tenant.name_any();
    let uid = tenant.uid().unwrap_or_default();
    meta.owner_references.iter().flatten().any(|r| {
        r.controller == Some(true)
            && r.kind == Tenant::kind(&())
            && r.api_version.starts_with(API_GROUP)
            && r.name == name
            && r.uid == uid
    })
}

/// Metadata for an object projected into `namespace`.
pub fn projected_meta(
    tenant: &Tenant,
    namespace: &str,
    name: String,
    labels: BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        owner_references: Some(vec![owner_reference(tenant)]),
        ..Default::default()
    }
}

/// Set the tenant's controller reference on `meta`, replacing any other
/// controller reference. Returns whether `meta` changed.
pub fn set_controller_reference(meta: &mut ObjectMeta, tenant: &Tenant) -> bool {
    let desired = owner_reference(tenant);
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    if refs.contains(&desired) {
        return false;
    }
    refs.retain(|r| r.controller != Some(true) && r.uid != desired.uid);
    refs.push(desired);
    true
}

/// Merge `labels` into `meta`. Returns whether any value changed.
pub fn merge_labels(meta: &mut ObjectMeta, labels: &BTreeMap<String, String>) -> bool {
    merge_into(meta.labels.get_or_insert_with(BTreeMap::new), labels)
}

/// Merge `annotations` into `meta`. Returns whether any value changed.
pub fn merge_annotations(meta: &mut ObjectMeta, annotations: &BTreeMap<String, String>) -> bool {
    merge_into(
        meta.annotations.get_or_insert_with(BTreeMap::new),
        annotations,
    )
}

fn merge_into(target: &mut BTreeMap<String, String>, values: &BTreeMap<String, String>) -> bool {
    let mut changed = false;
    for (key, value) in values {
        if target.get(key) != Some(value) {
            target.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}
