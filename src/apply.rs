//! Server-side apply of rendered resources

use std::sync::Arc;

use kube::Resource;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::crd::ResourceReference;
use crate::registry::TypeRegistry;
use crate::store::ObjectStore;
use crate::Error;

/// Applies rendered resources with forced field ownership
#[derive(Clone)]
pub struct Applier {
    store: Arc<dyn ObjectStore>,
    registry: Arc<TypeRegistry>,
}

impl Applier {
    /// Create an applier over the given store
    pub fn new(store: Arc<dyn ObjectStore>, registry: Arc<TypeRegistry>) -> Self {
        Self { store, registry }
    }

    /// Apply `resource` into `namespace` as `field_owner`.
    ///
    /// Only the fields present on `resource` are claimed. Returns a
    /// reference carrying the live uid.
    pub async fn apply<K>(
        &self,
        resource: &K,
        namespace: &str,
        field_owner: &str,
    ) -> Result<ResourceReference, Error>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let kind = self.registry.kind_of::<K>();
        let name = resource
            .meta()
            .name
            .clone()
            .ok_or_else(|| Error::apply(&kind.kind, "<unnamed>", "resource has no name"))?;

        let mut body =
            serde_json::to_value(resource).map_err(|e| Error::apply(&kind.kind, &name, e))?;
        if kind.namespaced {
            if let Some(meta) = body.get_mut("metadata").and_then(Value::as_object_mut) {
                meta.insert("namespace".to_string(), Value::String(namespace.to_string()));
            }
        }

        let live = self
            .store
            .apply(&kind, namespace, &body, field_owner)
            .await
            .map_err(|e| Error::apply(&kind.kind, &name, e))?;

        let uid = live
            .metadata
            .uid
            .ok_or_else(|| Error::apply(&kind.kind, &name, "live object has no uid"))?;
        debug!(kind = %kind.kind, name = %name, uid = %uid, "applied resource");

        Ok(ResourceReference::new(kind.api_version(), kind.kind, name, uid))
    }
}
