//! Namespace phases of the tenant reconcile.
//!
//! - [`collect_namespaces`]: rebuild `status.namespaces` from the namespaces
//!   whose owner reference names the tenant.
//! - [`sync_namespaces`]: stamp the tenant label and the allowed class
//!   annotations on every owned namespace, concurrently.
//! - [`ensure_node_selector`]: stamp the scheduler node-selector annotation.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::error::{Error, Result};
use crate::controller::fanout::fan_out;
use crate::controller::retry::{Backoff, retry_on_conflict};
use crate::crd::Tenant;
use crate::resources::common::{
    INGRESS_CLASSES_ANNOTATION, NODE_SELECTOR_ANNOTATION, STORAGE_CLASSES_ANNOTATION,
    is_owned_by, merge_annotations, merge_labels, tenant_labels,
};
use crate::store::{ObjectStore, everything};

/// Resolve the tenant's namespace membership and record it in status.
///
/// Returns the tenant as stored after the write (or as read, when the status
/// was already current).
pub async fn collect_namespaces<S: ObjectStore>(store: &S, tenant: &Tenant) -> Result<Tenant> {
    let name = tenant.name_any();
    let owned: Vec<String> = store
        .list::<Namespace>(None, &everything())
        .await?
        .into_iter()
        .filter(|ns| is_owned_by(&ns.metadata, tenant))
        .map(|ns| ns.name_any())
        .collect();
    debug!(tenant = %name, count = owned.len(), "Collected tenant namespaces");

    let name = name.as_str();
    let owned = &owned;
    retry_on_conflict(Backoff::default_backoff(), || async move {
        let mut current: Tenant = store
            .get(None, name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Tenant {}", name)))?;
        let before = current.status.clone();
        current.assign_namespaces(owned.iter().cloned());
        if current.status == before {
            return Ok(current);
        }
        let updated = store.replace_status(&current).await?;
        info!(tenant = %name, namespaces = ?updated.namespaces(), "Updated tenant namespaces");
        Ok(updated)
    })
    .await
}

/// Label and annotate every owned namespace with the tenant's allowed classes.
///
/// Namespaces deleted since collection are skipped.
pub async fn sync_namespaces<S: ObjectStore>(
    store: &S,
    tenant: &Tenant,
    max_concurrent: usize,
) -> Result<()> {
    let name = tenant.name_any();
    let labels = tenant_labels(&name);
    let annotations = BTreeMap::from([
        (
            INGRESS_CLASSES_ANNOTATION.to_string(),
            tenant.spec.ingress_classes.join(","),
        ),
        (
            STORAGE_CLASSES_ANNOTATION.to_string(),
            tenant.spec.storage_classes.join(","),
        ),
    ]);
    info!(tenant = %name, count = tenant.namespaces().len(), "Syncing tenant namespaces");

    let units: Vec<_> = tenant
        .namespaces()
        .iter()
        .map(|ns| update_namespace(store, ns, &labels, &annotations))
        .collect();
    fan_out("update of tenant Namespaces", max_concurrent, units).await
}

/// Set the node-selector annotation on every owned namespace.
///
/// A tenant without a node selector leaves its namespaces untouched.
pub async fn ensure_node_selector<S: ObjectStore>(store: &S, tenant: &Tenant) -> Result<()> {
    let Some(selector) = tenant.spec.node_selector.as_ref() else {
        return Ok(());
    };
    let annotations = BTreeMap::from([(
        NODE_SELECTOR_ANNOTATION.to_string(),
        node_selector_value(selector),
    )]);
    let labels = BTreeMap::new();
    for ns in tenant.namespaces() {
        update_namespace(store, ns, &labels, &annotations).await?;
    }
    Ok(())
}

/// Render a node selector as sorted `key=value` pairs joined by commas.
pub fn node_selector_value(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

async fn update_namespace<S: ObjectStore>(
    store: &S,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
) -> Result<()> {
    let result = retry_on_conflict(Backoff::default_backoff(), || async move {
        let Some(mut ns) = store.get::<Namespace>(None, namespace).await? else {
            debug!(namespace = %namespace, "Namespace vanished, skipping");
            return Ok(());
        };
        let labels_changed = merge_labels(&mut ns.metadata, labels);
        let annotations_changed = merge_annotations(&mut ns.metadata, annotations);
        if !labels_changed && !annotations_changed {
            debug!(namespace = %namespace, "Namespace unchanged");
            return Ok(());
        }
        store.replace(&ns).await?;
        debug!(namespace = %namespace, "Namespace updated");
        Ok(())
    })
    .await;

    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
