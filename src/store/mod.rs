//! Object store abstraction.
//!
//! The controller and admission logic never talk to `kube::Api` directly; they
//! go through [`ObjectStore`], a small get/list/create/replace/delete surface
//! with per-object optimistic concurrency (`metadata.resourceVersion`).
//!
//! | Implementation | Backing |
//! |----------------|---------|
//! | [`KubeStore`] | Kubernetes API server via `kube::Client` |
//! | [`MemoryStore`] | In-process map, used by tests and dry runs |

mod cluster;
pub mod memory;

pub use cluster::KubeStore;
pub use memory::MemoryStore;

use std::collections::BTreeSet;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{LimitRange, Namespace, ResourceQuota};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, RoleBinding};
use kube::core::{Expression, Selector};
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::controller::error::Result;
use crate::crd::Tenant;

/// A resource kind the operator reads or writes.
///
/// Supplies the scoped API handle so that generic code can work with both
/// cluster-scoped and namespaced kinds.
pub trait Managed:
    Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug + Send + Sync + 'static
{
    /// API handle for this kind, namespaced when `namespace` is given.
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;
}

macro_rules! namespaced_kinds {
    ($($kind:ty),* $(,)?) => {
        $(
            impl Managed for $kind {
                fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
                    crate::scoped_api(client, namespace)
                }
            }
        )*
    };
}

macro_rules! cluster_kinds {
    ($($kind:ty),* $(,)?) => {
        $(
            impl Managed for $kind {
                fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
                    Api::all(client)
                }
            }
        )*
    };
}

namespaced_kinds!(NetworkPolicy, LimitRange, ResourceQuota, RoleBinding);
cluster_kinds!(Namespace, Tenant, ClusterRole, ClusterRoleBinding);

/// Versioned object store with optimistic concurrency.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetch an object, `None` when it does not exist.
    async fn get<K: Managed>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>>;

    /// List objects matching `selector`, across all namespaces when `namespace` is `None`.
    async fn list<K: Managed>(&self, namespace: Option<&str>, selector: &Selector)
    -> Result<Vec<K>>;

    /// Create an object; fails with `AlreadyExists` if the name is taken.
    async fn create<K: Managed>(&self, obj: &K) -> Result<K>;

    /// Replace an object's spec and metadata.
    ///
    /// Fails with `Conflict` when `obj` carries a stale resource version.
    async fn replace<K: Managed>(&self, obj: &K) -> Result<K>;

    /// Replace an object's status sub-resource, with the same concurrency check.
    async fn replace_status<K: Managed>(&self, obj: &K) -> Result<K>;

    /// Delete an object; deleting a missing object succeeds.
    async fn delete<K: Managed>(&self, namespace: Option<&str>, name: &str) -> Result<()>;

    /// Delete every object matching `selector`, returning how many were removed.
    async fn delete_collection<K: Managed>(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<usize>;
}

/// Selector matching every object.
pub fn everything() -> Selector {
    Selector::default()
}

/// Selector requiring every `(key, value)` label pair.
pub fn labels_equal<'a, I>(pairs: I) -> Selector
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| Expression::Equal(k.to_string(), v.to_string()))
        .collect()
}

/// Outer-join selector: `key` is present and its value is not in `keep`.
pub fn label_not_in(key: &str, keep: &[String]) -> Selector {
    let mut expressions = vec![Expression::Exists(key.to_string())];
    if !keep.is_empty() {
        let values: BTreeSet<String> = keep.iter().cloned().collect();
        expressions.push(Expression::NotIn(key.to_string(), values));
    }
    expressions.into_iter().collect()
}
