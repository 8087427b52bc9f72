//! Owner assignment for namespace creation.
//!
//! Decides which Tenant a new namespace belongs to. Rules are evaluated in
//! order and the first one that applies is final:
//!
//! 1. The namespace carries the tenant label: that tenant, if the requester
//!    owns it.
//! 2. Forced prefix mode: the tenant named by the namespace prefix (text
//!    before the first `-`), if the requester owns it.
//! 3. The first tenant owned by the requesting user.
//! 4. The first tenant owned by one of the requester's groups, in request
//!    order.
//! 5. Otherwise the request is denied.

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use tracing::debug;

use crate::config::OperatorConfig;
use crate::controller::error::Result;
use crate::crd::{OwnerKind, Tenant};
use crate::resources::common::{TENANT_LABEL, owner_reference, tenant_labels};
use crate::store::{ObjectStore, everything};

/// Identity of the user issuing an admission request.
#[derive(Clone, Debug, Default)]
pub struct Requester {
    pub username: String,
    pub groups: Vec<String>,
}

impl Requester {
    pub fn new(username: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            username: username.into(),
            groups,
        }
    }

    /// Whether this requester is the declared owner of `tenant`.
    pub fn owns(&self, tenant: &Tenant) -> bool {
        tenant.spec.owner.matches(&self.username, &self.groups)
    }
}

/// Outcome of owner assignment.
#[derive(Clone, Debug)]
pub enum Decision {
    /// Bind the namespace to this tenant.
    Bind(Box<Tenant>),
    /// Refuse the namespace with a user-facing message.
    Deny(String),
}

impl Decision {
    fn bind(tenant: Tenant) -> Self {
        Decision::Bind(Box::new(tenant))
    }
}

/// Message for rule 5.
pub const NO_TENANT_MESSAGE: &str =
    "unable to assign namespace to a tenant, contact an administrator";

/// Tenant named by the forced prefix convention.
pub fn prefix_tenant(namespace: &str) -> &str {
    namespace.split('-').next().unwrap_or(namespace)
}

fn selected(tenant: Option<Tenant>, name: &str, requester: &Requester) -> Decision {
    match tenant {
        Some(t) if requester.owns(&t) => Decision::bind(t),
        Some(_) => Decision::Deny(format!(
            "{} is not an owner of the selected tenant {}",
            requester.username, name
        )),
        None => Decision::Deny(format!("tenant {} not found", name)),
    }
}

/// Rules 3 and 4 over an already listed set of tenants.
pub fn find_owned(tenants: &[Tenant], requester: &Requester) -> Option<Tenant> {
    let by_user = tenants.iter().find(|t| {
        t.spec.owner.kind == OwnerKind::User && t.spec.owner.name == requester.username
    });
    if let Some(t) = by_user {
        return Some(t.clone());
    }
    requester.groups.iter().find_map(|group| {
        tenants
            .iter()
            .find(|t| t.spec.owner.kind == OwnerKind::Group && t.spec.owner.name == *group)
            .cloned()
    })
}

/// Decide the owning tenant of `namespace` for `requester`.
pub async fn decide<S: ObjectStore>(
    store: &S,
    config: &OperatorConfig,
    namespace: &Namespace,
    requester: &Requester,
) -> Result<Decision> {
    if let Some(name) = namespace.labels().get(TENANT_LABEL) {
        debug!(tenant = %name, "Tenant selected by label");
        let tenant = store.get::<Tenant>(None, name).await?;
        return Ok(selected(tenant, name, requester));
    }

    if config.force_tenant_prefix {
        let ns_name = namespace.name_any();
        let name = prefix_tenant(&ns_name);
        debug!(tenant = %name, namespace = %ns_name, "Tenant selected by prefix");
        let tenant = store.get::<Tenant>(None, name).await?;
        return Ok(selected(tenant, name, requester));
    }

    let tenants = store.list::<Tenant>(None, &everything()).await?;
    Ok(match find_owned(&tenants, requester) {
        Some(t) => Decision::bind(t),
        None => Decision::Deny(NO_TENANT_MESSAGE.to_string()),
    })
}

/// The namespace as it should be admitted for `tenant`: owned by it and
/// carrying its label.
pub fn bind_namespace(namespace: &Namespace, tenant: &Tenant) -> Namespace {
    let mut bound = namespace.clone();
    let owner = owner_reference(tenant);
    let refs = bound.metadata.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| r.controller != Some(true));
    refs.push(owner);
    bound
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .extend(tenant_labels(&tenant.name_any()));
    bound
}
