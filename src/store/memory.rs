//! In-process object store.
//!
//! Mirrors the API server semantics the operator relies on: resource versions
//! bumped on every write, stale writes rejected with a conflict, and the status
//! sub-resource kept separate from spec updates. Also counts writes and can
//! inject conflicts or failures on chosen objects.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use kube::ResourceExt;
use kube::core::{Selector, SelectorExt};
use serde_json::Value;

use super::{Managed, ObjectStore};
use crate::controller::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    kind: String,
    namespace: Option<String>,
    name: String,
}

impl Key {
    fn of<K: Managed>(namespace: Option<&str>, name: &str) -> Self {
        Self {
            kind: K::kind(&()).into_owned(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    fn for_object<K: Managed>(obj: &K) -> Self {
        Self::of::<K>(obj.namespace().as_deref(), &obj.name_any())
    }

    fn describe(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{} {}/{}", self.kind, ns, self.name),
            None => format!("{} {}", self.kind, self.name),
        }
    }
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    version: u64,
    writes: usize,
    conflicts: BTreeMap<Key, u32>,
    failing: BTreeSet<Key>,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn stored_version(&self, key: &Key) -> Option<String> {
        self.objects
            .get(key)
            .and_then(|v| v.pointer("/metadata/resourceVersion"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Shared precondition for replace and replace_status.
    fn check_write(&mut self, key: &Key, resource_version: Option<&str>) -> Result<()> {
        if self.failing.contains(key) {
            return Err(Error::Transient(format!("{}: injected failure", key.describe())));
        }
        let Some(stored) = self.stored_version(key) else {
            return Err(Error::NotFound(key.describe()));
        };
        if let Some(pending) = self.conflicts.get_mut(key).filter(|n| **n > 0) {
            *pending -= 1;
            // Simulate a concurrent writer moving the object forward
            let version = self.next_version();
            if let Some(obj) = self.objects.get_mut(key) {
                set_resource_version(obj, &version);
            }
            return Err(Error::Conflict(format!("{}: injected conflict", key.describe())));
        }
        match resource_version {
            Some(rv) if rv != stored => Err(Error::Conflict(format!(
                "{}: resourceVersion {} is stale (current {})",
                key.describe(),
                rv,
                stored
            ))),
            _ => Ok(()),
        }
    }
}

fn set_resource_version(value: &mut Value, version: &str) {
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.insert(
            "resourceVersion".to_string(),
            Value::String(version.to_string()),
        );
    }
}

fn decode<K: Managed>(value: &Value) -> Result<K> {
    Ok(serde_json::from_value(value.clone())?)
}

/// [`ObjectStore`] kept entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed or overwrite an object (status included) without counting a write.
    pub fn insert<K: Managed>(&self, mut obj: K) -> Result<K> {
        let key = Key::for_object(&obj);
        let mut state = self.lock();
        let version = state.next_version();
        let meta = obj.meta_mut();
        meta.resource_version = Some(version);
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{}-{}", key.kind.to_lowercase(), key.name));
        }
        let value = serde_json::to_value(&obj)?;
        state.objects.insert(key, value);
        Ok(obj)
    }

    /// Current copy of an object, if present.
    pub fn object<K: Managed>(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        let state = self.lock();
        state
            .objects
            .get(&Key::of::<K>(namespace, name))
            .and_then(|v| decode(v).ok())
    }

    /// Every object of a kind, optionally restricted to one namespace.
    pub fn objects<K: Managed>(&self, namespace: Option<&str>) -> Vec<K> {
        let kind = K::kind(&());
        let state = self.lock();
        state
            .objects
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .filter(|(k, _)| namespace.is_none() || k.namespace.as_deref() == namespace)
            .filter_map(|(_, v)| decode(v).ok())
            .collect()
    }

    /// Number of writes (create, replace, status, delete) performed so far.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// Reset the write counter.
    pub fn reset_writes(&self) {
        self.lock().writes = 0;
    }

    /// Make the next `count` writes to an object fail with a conflict.
    pub fn inject_conflicts<K: Managed>(&self, namespace: Option<&str>, name: &str, count: u32) {
        self.lock()
            .conflicts
            .insert(Key::of::<K>(namespace, name), count);
    }

    /// Make every write to an object fail with a transient error.
    pub fn fail_writes<K: Managed>(&self, namespace: Option<&str>, name: &str) {
        self.lock().failing.insert(Key::of::<K>(namespace, name));
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: Managed>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        let state = self.lock();
        state
            .objects
            .get(&Key::of::<K>(namespace, name))
            .map(decode)
            .transpose()
    }

    async fn list<K: Managed>(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<K>> {
        let kind = K::kind(&());
        let state = self.lock();
        let mut items = Vec::new();
        for (key, value) in &state.objects {
            if key.kind != kind || (namespace.is_some() && key.namespace.as_deref() != namespace)
            {
                continue;
            }
            let obj: K = decode(value)?;
            if selector.matches(obj.labels()) {
                items.push(obj);
            }
        }
        Ok(items)
    }

    async fn create<K: Managed>(&self, obj: &K) -> Result<K> {
        let key = Key::for_object(obj);
        let mut state = self.lock();
        if state.objects.contains_key(&key) {
            return Err(Error::AlreadyExists(key.describe()));
        }
        if state.failing.contains(&key) {
            return Err(Error::Transient(format!("{}: injected failure", key.describe())));
        }
        let version = state.next_version();
        let mut created = obj.clone();
        let meta = created.meta_mut();
        meta.resource_version = Some(version);
        meta.uid = Some(format!("uid-{}-{}", key.kind.to_lowercase(), key.name));
        state.objects.insert(key, serde_json::to_value(&created)?);
        state.writes += 1;
        Ok(created)
    }

    async fn replace<K: Managed>(&self, obj: &K) -> Result<K> {
        let key = Key::for_object(obj);
        let mut state = self.lock();
        state.check_write(&key, obj.meta().resource_version.as_deref())?;

        let mut value = serde_json::to_value(obj)?;
        let old_status = state
            .objects
            .get(&key)
            .and_then(|old| old.get("status"))
            .cloned();
        if let Some(fields) = value.as_object_mut() {
            match old_status {
                Some(status) => fields.insert("status".to_string(), status),
                None => fields.remove("status"),
            };
        }
        let version = state.next_version();
        set_resource_version(&mut value, &version);
        let updated = decode(&value)?;
        state.objects.insert(key, value);
        state.writes += 1;
        Ok(updated)
    }

    async fn replace_status<K: Managed>(&self, obj: &K) -> Result<K> {
        let key = Key::for_object(obj);
        let mut state = self.lock();
        state.check_write(&key, obj.meta().resource_version.as_deref())?;

        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(Value::Null);
        let version = state.next_version();
        let Some(stored) = state.objects.get_mut(&key) else {
            return Err(Error::NotFound(key.describe()));
        };
        if let Some(fields) = stored.as_object_mut() {
            fields.insert("status".to_string(), status);
        }
        set_resource_version(stored, &version);
        let updated = decode(stored)?;
        state.writes += 1;
        Ok(updated)
    }

    async fn delete<K: Managed>(&self, namespace: Option<&str>, name: &str) -> Result<()> {
        let mut state = self.lock();
        if state.objects.remove(&Key::of::<K>(namespace, name)).is_some() {
            state.writes += 1;
        }
        Ok(())
    }

    async fn delete_collection<K: Managed>(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<usize> {
        let kind = K::kind(&());
        let mut state = self.lock();
        let mut doomed = Vec::new();
        for (key, value) in &state.objects {
            if key.kind != kind || (namespace.is_some() && key.namespace.as_deref() != namespace)
            {
                continue;
            }
            let obj: K = decode(value)?;
            if selector.matches(obj.labels()) {
                doomed.push(key.clone());
            }
        }
        for key in &doomed {
            state.objects.remove(key);
            state.writes += 1;
        }
        Ok(doomed.len())
    }
}
