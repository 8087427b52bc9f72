//! Object store backed by the Kubernetes API server.

use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::Selector;
use kube::{Client, ResourceExt};
use tracing::debug;

use super::{Managed, ObjectStore};
use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};

/// [`ObjectStore`] over a live cluster.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Wrap a Kubernetes client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Map API errors onto the store's conflict/not-found taxonomy.
fn classify(err: kube::Error, what: &str) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            Error::AlreadyExists(what.to_string())
        }
        kube::Error::Api(ae) if ae.code == 409 => Error::Conflict(format!("{}: {}", what, ae.message)),
        kube::Error::Api(ae) if ae.code == 404 => Error::NotFound(what.to_string()),
        e => Error::Kube(e),
    }
}

fn describe<K: Managed>(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{} {}/{}", K::kind(&()), ns, name),
        None => format!("{} {}", K::kind(&()), name),
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: Managed>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        K::api(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .map_err(|e| classify(e, &describe::<K>(namespace, name)))
    }

    async fn list<K: Managed>(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<K>> {
        let params = ListParams::default().labels_from(selector);
        let list = K::api(self.client.clone(), namespace)
            .list(&params)
            .await
            .map_err(Error::Kube)?;
        Ok(list.items)
    }

    async fn create<K: Managed>(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace();
        let name = obj.name_any();
        K::api(self.client.clone(), namespace.as_deref())
            .create(&post_params(), obj)
            .await
            .map_err(|e| classify(e, &describe::<K>(namespace.as_deref(), &name)))
    }

    async fn replace<K: Managed>(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace();
        let name = obj.name_any();
        K::api(self.client.clone(), namespace.as_deref())
            .replace(&name, &post_params(), obj)
            .await
            .map_err(|e| classify(e, &describe::<K>(namespace.as_deref(), &name)))
    }

    async fn replace_status<K: Managed>(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace();
        let name = obj.name_any();
        let value = serde_json::to_value(obj)?;
        // A merge patch carrying the resourceVersion is rejected with 409 when stale
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": value.get("status").cloned().unwrap_or(serde_json::Value::Null),
        });
        K::api(self.client.clone(), namespace.as_deref())
            .patch_status(
                &name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| classify(e, &describe::<K>(namespace.as_deref(), &name)))
    }

    async fn delete<K: Managed>(&self, namespace: Option<&str>, name: &str) -> Result<()> {
        match K::api(self.client.clone(), namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(classify(e, &describe::<K>(namespace, name))),
        }
    }

    async fn delete_collection<K: Managed>(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<usize> {
        let params = ListParams::default().labels_from(selector);
        let deleted = K::api(self.client.clone(), namespace)
            .delete_collection(&DeleteParams::default(), &params)
            .await
            .map_err(|e| classify(e, &format!("{} collection", K::kind(&()))))?
            .map_left(|list| list.items.len())
            .left_or(0);
        debug!(kind = %K::kind(&()), namespace = ?namespace, deleted, "Deleted collection");
        Ok(deleted)
    }
}
