//! In-memory [`ObjectStore`] for tests and local simulation
//!
//! Models the API-server behaviour the reconcilers rely on:
//! - uids assigned at creation and never changed
//! - resourceVersion bumped on every effective write, checked on merge
//!   patches that carry one
//! - server-side apply with per-field managers: an applier owns the leaf
//!   fields it submitted, fields it stops submitting are removed, and fields
//!   owned by other managers are left alone
//! - owner references merged by uid on apply
//!
//! Every effective write is recorded in a mutation log so tests can assert
//! exactly which objects a pass touched.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::DynamicObject;
use serde_json::{Map, Value};

use super::ObjectStore;
use crate::registry::ResourceKind;
use crate::Error;

/// Store operation, used for failure injection and the mutation log
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// `get`
    Get,
    /// `list`
    List,
    /// `apply`
    Apply,
    /// `patch_merge`
    Patch,
    /// `delete`
    Delete,
    /// `patch_status`
    Status,
}

/// A write that changed the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mutation {
    /// Operation that made the change
    pub operation: Operation,
    /// Kind name of the object
    pub kind: String,
    /// Object name
    pub name: String,
    /// uid of the object at the time of the write
    pub uid: String,
}

type Key = (String, String, String);
type FieldPath = Vec<String>;

const PATCH_MANAGER: &str = "merge-patch";

#[derive(Debug)]
struct Entry {
    object: Value,
    managers: BTreeMap<FieldPath, String>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<Key, Entry>,
    resource_version: u64,
    mutations: Vec<Mutation>,
    failures: VecDeque<(Operation, String, String)>,
}

impl State {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn take_failure(&mut self, op: Operation, kind: &ResourceKind) -> Option<Error> {
        let pos = self
            .failures
            .iter()
            .position(|(o, k, _)| *o == op && *k == kind.kind)?;
        self.failures
            .remove(pos)
            .map(|(_, _, message)| Error::Conflict(message))
    }

    fn record(&mut self, operation: Operation, kind: &ResourceKind, object: &Value) {
        self.mutations.push(Mutation {
            operation,
            kind: kind.kind.clone(),
            name: str_at(object, "/metadata/name"),
            uid: str_at(object, "/metadata/uid"),
        });
    }
}

/// Thread-safe in-memory object store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

fn key(kind: &ResourceKind, namespace: &str, name: &str) -> Key {
    let ns = if kind.namespaced { namespace } else { "" };
    (
        format!("{}/{}", kind.api_version(), kind.kind),
        ns.to_string(),
        name.to_string(),
    )
}

fn str_at(value: &Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn to_dynamic(value: &Value) -> Result<DynamicObject, Error> {
    Ok(serde_json::from_value(value.clone())?)
}

/// Fields the server owns and appliers never claim
fn is_server_field(path: &[String]) -> bool {
    match path {
        [top] => top == "apiVersion" || top == "kind",
        [top, ..] if top == "status" => true,
        [meta, field, ..] if meta == "metadata" => matches!(
            field.as_str(),
            "name"
                | "namespace"
                | "uid"
                | "resourceVersion"
                | "generation"
                | "creationTimestamp"
                | "managedFields"
                | "ownerReferences"
        ),
        _ => false,
    }
}

fn collect_leaves(value: &Value, prefix: &mut FieldPath, out: &mut Vec<(FieldPath, Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (k, v) in map {
                prefix.push(k.clone());
                collect_leaves(v, prefix, out);
                prefix.pop();
            }
        }
        Value::Null => {}
        other => {
            if !is_server_field(prefix) {
                out.push((prefix.clone(), other.clone()));
            }
        }
    }
}

fn leaves(value: &Value) -> Vec<(FieldPath, Value)> {
    let mut out = Vec::new();
    collect_leaves(value, &mut Vec::new(), &mut out);
    out
}

fn get_path<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(root, |v, seg| v.get(seg))
}

fn set_path(root: &mut Value, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut cursor = root;
    for seg in parents {
        if !cursor.get(seg).is_some_and(Value::is_object) {
            if let Some(map) = cursor.as_object_mut() {
                map.insert(seg.clone(), Value::Object(Map::new()));
            }
        }
        match cursor.get_mut(seg) {
            Some(next) => cursor = next,
            None => return,
        }
    }
    if let Some(map) = cursor.as_object_mut() {
        map.insert(last.clone(), value);
    }
}

fn remove_path(root: &mut Value, path: &[String]) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut cursor = root;
    for seg in parents {
        match cursor.get_mut(seg) {
            Some(next) => cursor = next,
            None => return,
        }
    }
    if let Some(map) = cursor.as_object_mut() {
        map.remove(last);
    }
}

fn merge_owner_references(live: &mut Value, submitted: &Value) {
    let Some(incoming) = submitted
        .pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
    else {
        return;
    };
    let mut merged = live
        .pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for owner in incoming {
        match merged.iter_mut().find(|o| o.get("uid") == owner.get("uid")) {
            Some(existing) => *existing = owner.clone(),
            None => merged.push(owner.clone()),
        }
    }
    set_path(
        live,
        &["metadata".to_string(), "ownerReferences".to_string()],
        Value::Array(merged),
    );
}

impl InMemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // a poisoned lock only means another test thread panicked mid-write
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed an object as if an external actor created it. A uid is assigned
    /// unless the object already carries one.
    pub fn insert(&self, kind: &ResourceKind, mut object: Value) -> Result<DynamicObject, Error> {
        let mut state = self.lock();
        let name = str_at(&object, "/metadata/name");
        let namespace = str_at(&object, "/metadata/namespace");
        if str_at(&object, "/metadata/uid").is_empty() {
            set_path(
                &mut object,
                &["metadata".to_string(), "uid".to_string()],
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
        }
        let version = state.next_version();
        set_path(
            &mut object,
            &["metadata".to_string(), "resourceVersion".to_string()],
            Value::String(version),
        );
        let dynamic = to_dynamic(&object)?;
        state.objects.insert(
            key(kind, &namespace, &name),
            Entry {
                object,
                managers: BTreeMap::new(),
            },
        );
        Ok(dynamic)
    }

    /// Raw view of a stored object
    pub fn object(&self, kind: &ResourceKind, namespace: &str, name: &str) -> Option<Value> {
        self.lock()
            .objects
            .get(&key(kind, namespace, name))
            .map(|e| e.object.clone())
    }

    /// Number of stored objects of a kind
    pub fn count(&self, kind: &ResourceKind) -> usize {
        let prefix = format!("{}/{}", kind.api_version(), kind.kind);
        self.lock()
            .objects
            .keys()
            .filter(|(k, _, _)| *k == prefix)
            .count()
    }

    /// Every effective write so far
    pub fn mutations(&self) -> Vec<Mutation> {
        self.lock().mutations.clone()
    }

    /// Forget the mutation log
    pub fn clear_mutations(&self) {
        self.lock().mutations.clear();
    }

    /// Make the next `operation` on `kind` fail with a conflict
    pub fn fail_once(&self, operation: Operation, kind: &str, message: &str) {
        self.lock()
            .failures
            .push_back((operation, kind.to_string(), message.to_string()));
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure(Operation::Get, kind) {
            return Err(err);
        }
        state
            .objects
            .get(&key(kind, namespace, name))
            .map(|e| to_dynamic(&e.object))
            .transpose()
    }

    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, Error> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure(Operation::List, kind) {
            return Err(err);
        }
        let (kind_key, ns, _) = key(kind, namespace, "");
        state
            .objects
            .iter()
            .filter(|((k, n, _), _)| *k == kind_key && *n == ns)
            .filter(|(_, e)| {
                selector.iter().all(|(label, value)| {
                    e.object
                        .pointer("/metadata/labels")
                        .and_then(|l| l.get(label))
                        .and_then(Value::as_str)
                        == Some(value.as_str())
                })
            })
            .map(|(_, e)| to_dynamic(&e.object))
            .collect()
    }

    async fn apply(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        object: &Value,
        field_owner: &str,
    ) -> Result<DynamicObject, Error> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure(Operation::Apply, kind) {
            return Err(err);
        }
        let name = str_at(object, "/metadata/name");
        if name.is_empty() {
            return Err(Error::validation(format!("{kind} object has no metadata.name")));
        }
        let k = key(kind, namespace, &name);
        let submitted = leaves(object);

        let (mut live, mut managers, created) = match state.objects.remove(&k) {
            Some(entry) => (entry.object, entry.managers, false),
            None => {
                let mut fresh = serde_json::json!({
                    "apiVersion": kind.api_version(),
                    "kind": kind.kind,
                    "metadata": {
                        "name": name,
                        "uid": uuid::Uuid::new_v4().to_string(),
                    }
                });
                if kind.namespaced {
                    set_path(
                        &mut fresh,
                        &["metadata".to_string(), "namespace".to_string()],
                        Value::String(namespace.to_string()),
                    );
                }
                (fresh, BTreeMap::new(), true)
            }
        };
        let before = live.clone();

        // fields this manager owned but no longer submits
        let submitted_paths: Vec<&FieldPath> = submitted.iter().map(|(p, _)| p).collect();
        let dropped: Vec<FieldPath> = managers
            .iter()
            .filter(|(p, m)| m.as_str() == field_owner && !submitted_paths.contains(p))
            .map(|(p, _)| p.clone())
            .collect();
        for path in dropped {
            remove_path(&mut live, &path);
            managers.remove(&path);
        }

        for (path, value) in submitted {
            // a parent path owned as a leaf gives way to the nested value
            managers.retain(|p, _| !(path.starts_with(p) && *p != path));
            set_path(&mut live, &path, value);
            managers.insert(path, field_owner.to_string());
        }
        merge_owner_references(&mut live, object);

        if created || live != before {
            let version = state.next_version();
            set_path(
                &mut live,
                &["metadata".to_string(), "resourceVersion".to_string()],
                Value::String(version),
            );
            state.record(Operation::Apply, kind, &live);
        }
        let result = to_dynamic(&live);
        state.objects.insert(
            k,
            Entry {
                object: live,
                managers,
            },
        );
        result
    }

    async fn patch_merge(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<DynamicObject, Error> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure(Operation::Patch, kind) {
            return Err(err);
        }
        let k = key(kind, namespace, name);
        let Some(mut entry) = state.objects.remove(&k) else {
            return Err(Error::NotFound(format!("{kind} {namespace}/{name}")));
        };

        let mut patch = patch.clone();
        if let Some(expected) = patch
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .map(str::to_string)
        {
            let actual = str_at(&entry.object, "/metadata/resourceVersion");
            if expected != actual {
                state.objects.insert(k, entry);
                return Err(Error::Conflict(format!(
                    "{kind} {namespace}/{name}: resourceVersion {expected} is stale, current {actual}"
                )));
            }
            remove_path(
                &mut patch,
                &["metadata".to_string(), "resourceVersion".to_string()],
            );
        }

        let before = entry.object.clone();
        json_patch::merge(&mut entry.object, &patch);
        for (path, _) in leaves(&patch) {
            entry.managers.insert(path, PATCH_MANAGER.to_string());
        }
        if entry.object != before {
            let version = state.next_version();
            set_path(
                &mut entry.object,
                &["metadata".to_string(), "resourceVersion".to_string()],
                Value::String(version),
            );
            state.record(Operation::Patch, kind, &entry.object);
        }
        let result = to_dynamic(&entry.object);
        state.objects.insert(k, entry);
        result
    }

    async fn delete(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        precondition_uid: Option<String>,
    ) -> Result<bool, Error> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure(Operation::Delete, kind) {
            return Err(err);
        }
        let k = key(kind, namespace, name);
        let Some(entry) = state.objects.get(&k) else {
            return Ok(false);
        };
        if let Some(uid) = precondition_uid {
            if str_at(&entry.object, "/metadata/uid") != uid {
                return Ok(false);
            }
        }
        if let Some(entry) = state.objects.remove(&k) {
            state.record(Operation::Delete, kind, &entry.object);
        }
        Ok(true)
    }

    async fn patch_status(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        status: &Value,
    ) -> Result<(), Error> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure(Operation::Status, kind) {
            return Err(err);
        }
        let k = key(kind, namespace, name);
        let Some(mut entry) = state.objects.remove(&k) else {
            return Err(Error::NotFound(format!("{kind} {namespace}/{name}")));
        };
        let before = entry.object.clone();
        json_patch::merge(&mut entry.object, &serde_json::json!({ "status": status }));
        if entry.object != before {
            let version = state.next_version();
            set_path(
                &mut entry.object,
                &["metadata".to_string(), "resourceVersion".to_string()],
                Value::String(version),
            );
            state.record(Operation::Status, kind, &entry.object);
        }
        state.objects.insert(k, entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeRegistry;
    use serde_json::json;

    fn deployments() -> ResourceKind {
        TypeRegistry::standard().resolve("apps/v1", "Deployment")
    }

    fn rendered(image: &str) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web-deployment",
                "labels": {"app": "web"},
                "ownerReferences": [{
                    "apiVersion": "core.oam.dev/v1alpha2",
                    "kind": "ContainerizedWorkload",
                    "name": "web",
                    "uid": "uid-w",
                    "controller": true
                }]
            },
            "spec": {"template": {"spec": {"containers": [{"name": "app", "image": image}]}}}
        })
    }

    /// Story: applying the same object twice is a no-op the second time
    #[tokio::test]
    async fn story_apply_is_idempotent() {
        let store = InMemoryStore::new();
        let kind = deployments();

        let first = store.apply(&kind, "apps", &rendered("app:v1"), "uid-w").await.unwrap();
        let second = store.apply(&kind, "apps", &rendered("app:v1"), "uid-w").await.unwrap();

        assert_eq!(first.metadata.uid, second.metadata.uid);
        assert_eq!(first.metadata.resource_version, second.metadata.resource_version);
        assert_eq!(first.data, second.data);
        assert_eq!(store.mutations().len(), 1);
        assert_eq!(
            store.object(&kind, "apps", "web-deployment").unwrap()["metadata"]["namespace"],
            "apps"
        );
    }

    /// Story: a field set by another actor survives the owner's next apply,
    /// and owner references from other actors are kept
    #[tokio::test]
    async fn story_apply_leaves_foreign_fields_alone() {
        let store = InMemoryStore::new();
        let kind = deployments();
        store.apply(&kind, "apps", &rendered("app:v1"), "uid-w").await.unwrap();

        store
            .patch_merge(
                &kind,
                "apps",
                "web-deployment",
                &json!({
                    "spec": {"replicas": 5},
                    "metadata": {"ownerReferences": [
                        {"apiVersion": "core.oam.dev/v1alpha2", "kind": "ContainerizedWorkload",
                         "name": "web", "uid": "uid-w", "controller": true},
                        {"apiVersion": "core.oam.dev/v1alpha2", "kind": "ManualScalerTrait",
                         "name": "scaler", "uid": "uid-t", "controller": false}
                    ]}
                }),
            )
            .await
            .unwrap();

        store.apply(&kind, "apps", &rendered("app:v2"), "uid-w").await.unwrap();
        let live = store.object(&kind, "apps", "web-deployment").unwrap();
        assert_eq!(live["spec"]["replicas"], 5);
        assert_eq!(live["spec"]["template"]["spec"]["containers"][0]["image"], "app:v2");
        assert_eq!(live["metadata"]["ownerReferences"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn story_fields_dropped_by_owner_are_removed() {
        let store = InMemoryStore::new();
        let kind = deployments();
        store.apply(&kind, "apps", &rendered("app:v1"), "uid-w").await.unwrap();

        let mut without_labels = rendered("app:v1");
        without_labels["metadata"]
            .as_object_mut()
            .unwrap()
            .remove("labels");
        store.apply(&kind, "apps", &without_labels, "uid-w").await.unwrap();

        let live = store.object(&kind, "apps", "web-deployment").unwrap();
        assert!(live.pointer("/metadata/labels/app").is_none());
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let store = InMemoryStore::new();
        let kind = deployments();
        store.apply(&kind, "apps", &rendered("app:v1"), "uid-w").await.unwrap();

        let err = store
            .patch_merge(
                &kind,
                "apps",
                "web-deployment",
                &json!({"metadata": {"resourceVersion": "999"}, "spec": {"replicas": 2}}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(store.object(&kind, "apps", "web-deployment").is_some());
    }

    #[tokio::test]
    async fn test_delete_honours_uid_precondition() {
        let store = InMemoryStore::new();
        let kind = deployments();
        let live = store.apply(&kind, "apps", &rendered("app:v1"), "uid-w").await.unwrap();

        assert!(!store
            .delete(&kind, "apps", "web-deployment", Some("other".into()))
            .await
            .unwrap());
        assert!(store
            .delete(&kind, "apps", "web-deployment", live.metadata.uid.clone())
            .await
            .unwrap());
        assert!(!store.delete(&kind, "apps", "web-deployment", None).await.unwrap());
        assert_eq!(store.count(&kind), 0);
    }

    #[tokio::test]
    async fn test_list_filters_by_namespace_and_labels() {
        let store = InMemoryStore::new();
        let kind = deployments();
        store.apply(&kind, "apps", &rendered("app:v1"), "uid-w").await.unwrap();
        store.apply(&kind, "other", &rendered("app:v1"), "uid-w").await.unwrap();

        let selector = BTreeMap::from([("app".to_string(), "web".to_string())]);
        assert_eq!(store.list(&kind, "apps", &selector).await.unwrap().len(), 1);

        let miss = BTreeMap::from([("app".to_string(), "api".to_string())]);
        assert!(store.list(&kind, "apps", &miss).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let store = InMemoryStore::new();
        let kind = deployments();
        store.fail_once(Operation::Apply, "Deployment", "boom");

        assert!(store.apply(&kind, "apps", &rendered("app:v1"), "uid-w").await.is_err());
        assert!(store.apply(&kind, "apps", &rendered("app:v1"), "uid-w").await.is_ok());
    }
}
