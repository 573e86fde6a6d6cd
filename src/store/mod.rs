//! Object store consumed by the reconcilers
//!
//! The reconcilers never talk to `kube::Api` directly. They go through
//! [`ObjectStore`], which the Kubernetes-backed [`KubeObjectStore`] implements
//! for production and [`memory::InMemoryStore`] implements for tests.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, Preconditions};
use kube::Client;
use serde_json::{json, Value};

#[cfg(test)]
use mockall::automock;

use crate::registry::ResourceKind;
use crate::Error;

/// Storage operations the reconcilers need.
///
/// `namespace` is ignored for cluster-scoped kinds.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, `None` if it does not exist
    async fn get(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error>;

    /// List objects carrying every label in `selector`
    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, Error>;

    /// Forced server-side apply of `object` under `field_owner`
    async fn apply(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        object: &Value,
        field_owner: &str,
    ) -> Result<DynamicObject, Error>;

    /// JSON merge patch. A `metadata.resourceVersion` in the patch is
    /// enforced as an optimistic-concurrency precondition.
    async fn patch_merge(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<DynamicObject, Error>;

    /// Delete an object. Returns false when it was already gone or no longer
    /// carries `precondition_uid`.
    async fn delete(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        precondition_uid: Option<String>,
    ) -> Result<bool, Error>;

    /// Merge `status` into the status subresource
    async fn patch_status(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        status: &Value,
    ) -> Result<(), Error>;
}

/// Render a label map as a Kubernetes label selector string
pub fn label_selector(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// [`ObjectStore`] backed by the Kubernetes API
pub struct KubeObjectStore {
    client: Client,
    field_manager: String,
}

impl KubeObjectStore {
    /// Create a store using the given client. Merge patches are recorded
    /// under `field_manager`; applies use the owner passed per call.
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    fn api(&self, kind: &ResourceKind, namespace: &str) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        if kind.namespaced {
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        }
    }
}

fn map_kube_error(e: kube::Error) -> Error {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => Error::NotFound(ae.message),
        kube::Error::Api(ae) if ae.code == 409 => Error::Conflict(ae.message),
        other => Error::Kube(other),
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        self.api(kind, namespace)
            .get_opt(name)
            .await
            .map_err(map_kube_error)
    }

    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, Error> {
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(&label_selector(selector));
        }
        let list = self
            .api(kind, namespace)
            .list(&params)
            .await
            .map_err(map_kube_error)?;
        Ok(list.items)
    }

    async fn apply(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        object: &Value,
        field_owner: &str,
    ) -> Result<DynamicObject, Error> {
        let name = object
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation(format!("{kind} object has no metadata.name")))?;
        let params = PatchParams::apply(field_owner).force();
        self.api(kind, namespace)
            .patch(name, &params, &Patch::Apply(object))
            .await
            .map_err(map_kube_error)
    }

    async fn patch_merge(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<DynamicObject, Error> {
        self.api(kind, namespace)
            .patch(name, &self.patch_params(), &Patch::Merge(patch))
            .await
            .map_err(map_kube_error)
    }

    async fn delete(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        precondition_uid: Option<String>,
    ) -> Result<bool, Error> {
        let guarded = precondition_uid.is_some();
        let params = DeleteParams {
            preconditions: precondition_uid.map(|uid| Preconditions {
                uid: Some(uid),
                resource_version: None,
            }),
            ..Default::default()
        };
        match self.api(kind, namespace).delete(name, &params).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            // the name now belongs to a different object
            Err(kube::Error::Api(ae)) if ae.code == 409 && guarded => Ok(false),
            Err(e) => Err(map_kube_error(e)),
        }
    }

    async fn patch_status(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        status: &Value,
    ) -> Result<(), Error> {
        self.api(kind, namespace)
            .patch_status(
                name,
                &self.patch_params(),
                &Patch::Merge(&json!({ "status": status })),
            )
            .await
            .map_err(map_kube_error)?;
        Ok(())
    }
}
