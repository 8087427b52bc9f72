//! Owner RoleBindings.
//!
//! Every tenant namespace gets two fixed RoleBindings for the tenant owner:
//! `namespace:admin` (ClusterRole `admin`) and `namespace:deleter`
//! (ClusterRole `tenant-namespace:deleter`).

use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::error::{Error, Result};
use crate::controller::retry::{Backoff, retry_on_conflict};
use crate::controller::sync::Outcome;
use crate::crd::{OwnerKind, OwnerSpec, Tenant};
use crate::rbac::{DELETER_ROLE, RBAC_API_GROUP};
use crate::resources::common::{
    merge_labels, projected_meta, set_controller_reference, tenant_labels,
};
use crate::store::ObjectStore;

/// Name of the binding granting the owner the `admin` ClusterRole.
pub const ADMIN_BINDING: &str = "namespace:admin";
/// Name of the binding granting the owner the namespace deleter ClusterRole.
pub const DELETER_BINDING: &str = "namespace:deleter";

const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

/// The (binding name, ClusterRole) pairs every tenant namespace carries.
pub fn owner_bindings() -> [(&'static str, &'static str); 2] {
    [(ADMIN_BINDING, "admin"), (DELETER_BINDING, DELETER_ROLE)]
}

/// RBAC subject for a tenant owner.
///
/// A ServiceAccount owner written as `system:serviceaccount:<ns>:<name>`
/// becomes a ServiceAccount subject; any other name is bound as a user.
pub fn owner_subject(owner: &OwnerSpec) -> Subject {
    let user = |name: &str| Subject {
        kind: "User".to_string(),
        api_group: Some(RBAC_API_GROUP.to_string()),
        name: name.to_string(),
        namespace: None,
    };
    match owner.kind {
        OwnerKind::User => user(&owner.name),
        OwnerKind::Group => Subject {
            kind: "Group".to_string(),
            api_group: Some(RBAC_API_GROUP.to_string()),
            name: owner.name.clone(),
            namespace: None,
        },
        OwnerKind::ServiceAccount => owner
            .name
            .strip_prefix(SERVICE_ACCOUNT_PREFIX)
            .and_then(|rest| rest.split_once(':'))
            .filter(|(ns, name)| !ns.is_empty() && !name.is_empty())
            .map(|(ns, name)| Subject {
                kind: "ServiceAccount".to_string(),
                api_group: Some(String::new()),
                name: name.to_string(),
                namespace: Some(ns.to_string()),
            })
            .unwrap_or_else(|| user(&owner.name)),
    }
}

/// Ensure both owner RoleBindings in every tenant namespace.
pub async fn sync_owner_role_bindings<S: ObjectStore>(store: &S, tenant: &Tenant) -> Result<()> {
    info!(
        tenant = %tenant.name_any(),
        namespaces = tenant.namespaces().len(),
        "Syncing owner RoleBindings"
    );
    for ns in tenant.namespaces() {
        for (binding, role) in owner_bindings() {
            let outcome = ensure_role_binding(store, tenant, ns, binding, role).await?;
            debug!(namespace = %ns, name = %binding, outcome = %outcome, "RoleBinding synced");
        }
    }
    Ok(())
}

async fn ensure_role_binding<S: ObjectStore>(
    store: &S,
    tenant: &Tenant,
    namespace: &str,
    name: &str,
    role: &str,
) -> Result<Outcome> {
    let role_ref = RoleRef {
        api_group: RBAC_API_GROUP.to_string(),
        kind: "ClusterRole".to_string(),
        name: role.to_string(),
    };
    let subjects = vec![owner_subject(&tenant.spec.owner)];
    let labels = tenant_labels(&tenant.name_any());
    let (role_ref, subjects, labels) = (&role_ref, &subjects, &labels);

    retry_on_conflict(Backoff::default_backoff(), || async move {
        let existing = store.get::<RoleBinding>(Some(namespace), name).await?;

        // roleRef is immutable: a mismatching binding is recreated
        let existing = match existing {
            Some(rb) if rb.role_ref != *role_ref => {
                info!(namespace = %namespace, name = %name, "RoleBinding roleRef changed, recreating");
                store.delete::<RoleBinding>(Some(namespace), name).await?;
                None
            }
            other => other,
        };

        let Some(mut rb) = existing else {
            let binding = RoleBinding {
                metadata: projected_meta(tenant, namespace, name.to_string(), labels.clone()),
                role_ref: role_ref.clone(),
                subjects: Some(subjects.clone()),
            };
            return match store.create(&binding).await {
                Ok(_) => Ok(Outcome::Created),
                Err(Error::AlreadyExists(what)) => Err(Error::Conflict(what)),
                Err(e) => Err(e),
            };
        };

        let mut changed = merge_labels(&mut rb.metadata, labels);
        changed |= set_controller_reference(&mut rb.metadata, tenant);
        if rb.subjects.as_ref() != Some(subjects) {
            rb.subjects = Some(subjects.clone());
            changed = true;
        }
        if !changed {
            return Ok(Outcome::Unchanged);
        }
        store.replace(&rb).await?;
        Ok(Outcome::Updated)
    })
    .await
}
