//! Narrow view over the objects reconcilers inspect
//!
//! Reconcilers only ever need four things from a child resource: its owner
//! references, its type, its uid and the occasional nested field.
//! [`ManagedObject`] exposes exactly that, with adapters for the typed kinds
//! the renderer produces and one for arbitrary [`DynamicObject`]s.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::{Resource, ResourceExt};
use serde_json::Value;

/// Read-only view of a managed Kubernetes object
pub trait ManagedObject {
    /// Owner references on the object, empty when none are set
    fn owner_references(&self) -> &[OwnerReference];

    /// `(apiVersion, kind)` of the object
    fn kind_api_version(&self) -> (String, String);

    /// Server-assigned uid, absent before creation
    fn uid(&self) -> Option<&str>;

    /// Value at `path` inside the serialized object
    fn nested_field(&self, path: &[&str]) -> Option<Value>;

    /// Whether any owner reference points at `uid`
    fn is_owned_by(&self, uid: &str) -> bool {
        self.owner_references().iter().any(|o| o.uid == uid)
    }
}

fn walk(mut value: &Value, path: &[&str]) -> Option<Value> {
    for segment in path {
        value = value.get(*segment)?;
    }
    Some(value.clone())
}

fn typed_nested_field<K: serde::Serialize>(object: &K, path: &[&str]) -> Option<Value> {
    let value = serde_json::to_value(object).ok()?;
    walk(&value, path)
}

macro_rules! typed_managed_object {
    ($ty:ty) => {
        impl ManagedObject for $ty {
            fn owner_references(&self) -> &[OwnerReference] {
                self.meta().owner_references.as_deref().unwrap_or(&[])
            }

            fn kind_api_version(&self) -> (String, String) {
                (
                    <$ty>::api_version(&()).into_owned(),
                    <$ty>::kind(&()).into_owned(),
                )
            }

            fn uid(&self) -> Option<&str> {
                self.meta().uid.as_deref()
            }

            fn nested_field(&self, path: &[&str]) -> Option<Value> {
                typed_nested_field(self, path)
            }
        }
    };
}

typed_managed_object!(Deployment);
typed_managed_object!(Service);

impl ManagedObject for DynamicObject {
    fn owner_references(&self) -> &[OwnerReference] {
        ResourceExt::owner_references(self)
    }

    fn kind_api_version(&self) -> (String, String) {
        self.types
            .as_ref()
            .map(|t| (t.api_version.clone(), t.kind.clone()))
            .unwrap_or_default()
    }

    fn uid(&self) -> Option<&str> {
        self.metadata.uid.as_deref()
    }

    fn nested_field(&self, path: &[&str]) -> Option<Value> {
        match path.first() {
            Some(&"metadata") | Some(&"apiVersion") | Some(&"kind") => {
                typed_nested_field(self, path)
            }
            _ => walk(&self.data, path),
        }
    }
}

/// Replace the first owner reference with the same uid, or append.
///
/// Returns true when the list changed.
pub fn upsert_owner_reference(refs: &mut Vec<OwnerReference>, owner: OwnerReference) -> bool {
    match refs.iter_mut().find(|r| r.uid == owner.uid) {
        Some(existing) if *existing == owner => false,
        Some(existing) => {
            *existing = owner;
            true
        }
        None => {
            refs.push(owner);
            true
        }
    }
}

/// Owner reference from a child back to `owner`.
///
/// Returns `None` when the owner has not been persisted yet (no uid).
pub fn owner_reference<K>(owner: &K, controller: bool) -> Option<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    let meta = owner.meta();
    Some(OwnerReference {
        api_version: K::api_version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
        name: meta.name.clone()?,
        uid: meta.uid.clone()?,
        controller: Some(controller),
        block_owner_deletion: Some(true),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use kube::api::ObjectMeta;
    use serde_json::json;

    fn owner(uid: &str, controller: bool) -> OwnerReference {
        OwnerReference {
            api_version: "core.oam.dev/v1alpha2".into(),
            kind: "ContainerizedWorkload".into(),
            name: "web".into(),
            uid: uid.into(),
            controller: Some(controller),
            block_owner_deletion: Some(true),
        }
    }

    #[test]
    fn test_deployment_adapter() {
        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some("web-deployment".into()),
                uid: Some("uid-d".into()),
                owner_references: Some(vec![owner("uid-w", true)]),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(3),
                ..Default::default()
            }),
            status: None,
        };

        assert_eq!(
            deployment.kind_api_version(),
            ("apps/v1".to_string(), "Deployment".to_string())
        );
        assert_eq!(ManagedObject::uid(&deployment), Some("uid-d"));
        assert!(deployment.is_owned_by("uid-w"));
        assert_eq!(ManagedObject::owner_references(&deployment)[0].controller, Some(true));
        assert_eq!(deployment.nested_field(&["spec", "replicas"]), Some(json!(3)));
    }

    #[test]
    fn test_dynamic_adapter_reads_data_and_metadata() {
        let object: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "example.dev/v1",
            "kind": "Widget",
            "metadata": {"name": "w", "uid": "uid-x", "labels": {"app": "w"}},
            "spec": {"size": 4}
        }))
        .unwrap();

        assert_eq!(
            object.kind_api_version(),
            ("example.dev/v1".to_string(), "Widget".to_string())
        );
        assert_eq!(object.nested_field(&["spec", "size"]), Some(json!(4)));
        assert_eq!(
            object.nested_field(&["metadata", "labels", "app"]),
            Some(json!("w"))
        );
        assert!(object.nested_field(&["spec", "missing"]).is_none());
        assert!(ManagedObject::owner_references(&object).is_empty());
    }

    /// Story: a trait adds its reference without disturbing the workload's
    /// controller reference, and re-adding it is a no-op
    #[test]
    fn story_upsert_keeps_other_owners() {
        let mut refs = vec![owner("uid-w", true)];
        let mut trait_ref = owner("uid-t", false);
        trait_ref.kind = "ManualScalerTrait".into();

        assert!(upsert_owner_reference(&mut refs, trait_ref.clone()));
        assert_eq!(refs.len(), 2);
        assert!(!upsert_owner_reference(&mut refs, trait_ref.clone()));

        trait_ref.name = "renamed".into();
        assert!(upsert_owner_reference(&mut refs, trait_ref));
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].name, "renamed");
        assert_eq!(refs.iter().filter(|r| r.controller == Some(true)).count(), 1);
    }
}
