//! Cluster-scoped RBAC bootstrap.
//!
//! Run once at start, before the controller: ensures the two ClusterRoles
//! tenant owners rely on and binds the provisioner role to the configured
//! owner group, so its members may create namespaces.

use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::info;

use crate::controller::error::Result;
use crate::controller::retry::{Backoff, retry_on_conflict};
use crate::store::ObjectStore;

/// API group of RBAC objects.
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";
/// ClusterRole allowing namespace creation, bound to the owner group.
pub const PROVISIONER_ROLE: &str = "tenant-namespace:provisioner";
/// ClusterRole allowing namespace deletion, bound per namespace to its owner.
pub const DELETER_ROLE: &str = "tenant-namespace:deleter";

fn namespace_role(name: &str, verb: &str) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["namespaces".to_string()]),
            verbs: vec![verb.to_string()],
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// The ClusterRoles the operator maintains.
pub fn cluster_roles() -> Vec<ClusterRole> {
    vec![
        namespace_role(PROVISIONER_ROLE, "create"),
        namespace_role(DELETER_ROLE, "delete"),
    ]
}

/// The binding of the provisioner role to `group`.
pub fn provisioner_binding(group: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(PROVISIONER_ROLE.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: PROVISIONER_ROLE.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "Group".to_string(),
            api_group: Some(RBAC_API_GROUP.to_string()),
            name: group.to_string(),
            namespace: None,
        }]),
    }
}

/// Ensure the ClusterRoles and the provisioner ClusterRoleBinding.
pub async fn setup_cluster_roles<S: ObjectStore>(store: &S, owner_group: &str) -> Result<()> {
    for role in cluster_roles() {
        ensure_cluster_role(store, &role).await?;
    }
    ensure_provisioner_binding(store, &provisioner_binding(owner_group)).await
}

async fn ensure_cluster_role<S: ObjectStore>(store: &S, desired: &ClusterRole) -> Result<()> {
    let name = desired.metadata.name.as_deref().unwrap_or_default();
    retry_on_conflict(Backoff::default_backoff(), || async move {
        match store.get::<ClusterRole>(None, name).await? {
            None => {
                store.create(desired).await?;
                info!(cluster_role = %name, "ClusterRole created");
            }
            Some(mut existing) if existing.rules != desired.rules => {
                existing.rules = desired.rules.clone();
                store.replace(&existing).await?;
                info!(cluster_role = %name, "ClusterRole updated");
            }
            Some(_) => {}
        }
        Ok(())
    })
    .await
}

async fn ensure_provisioner_binding<S: ObjectStore>(
    store: &S,
    desired: &ClusterRoleBinding,
) -> Result<()> {
    let name = desired.metadata.name.as_deref().unwrap_or_default();
    retry_on_conflict(Backoff::default_backoff(), || async move {
        let existing = match store.get::<ClusterRoleBinding>(None, name).await? {
            // roleRef is immutable
            Some(crb) if crb.role_ref != desired.role_ref => {
                store.delete::<ClusterRoleBinding>(None, name).await?;
                info!(cluster_role_binding = %name, "ClusterRoleBinding roleRef changed, deleted");
                None
            }
            other => other,
        };
        match existing {
            None => {
                store.create(desired).await?;
                info!(cluster_role_binding = %name, "ClusterRoleBinding created");
            }
            Some(mut crb) if crb.subjects != desired.subjects => {
                crb.subjects = desired.subjects.clone();
                store.replace(&crb).await?;
                info!(cluster_role_binding = %name, "ClusterRoleBinding updated");
            }
            Some(_) => {}
        }
        Ok(())
    })
    .await
}
