//! Static type registry
//!
//! Maps `(apiVersion, kind)` to the API coordinates the object store needs
//! (group, version, plural, scope) and records the roles a kind plays in
//! reconciliation: tracked kinds are garbage-collected per workload,
//! scalable kinds are patched by the manual scaler. The registry is built
//! once at startup and handed to the controllers, never mutated.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::discovery::ApiResource;
use kube::Resource;

use crate::crd::{ContainerizedWorkload, ManualScalerTrait, WorkloadDefinition};

/// API coordinates of a resource kind
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    /// API group, empty for the core group
    pub group: String,
    /// API version
    pub version: String,
    /// Kind name
    pub kind: String,
    /// Lowercase plural used in URLs
    pub plural: String,
    /// Whether objects of this kind live in a namespace
    pub namespaced: bool,
}

impl ResourceKind {
    /// Coordinates of a typed Kubernetes resource
    pub fn of<K: Resource<DynamicType = ()>>(namespaced: bool) -> Self {
        Self {
            group: K::group(&()).into_owned(),
            version: K::version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
            plural: K::plural(&()).into_owned(),
            namespaced,
        }
    }

    /// Coordinates guessed from an apiVersion and kind, assumed namespaced
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        let (group, version) = parse_api_version(api_version);
        Self {
            group,
            version,
            kind: kind.to_string(),
            plural: pluralize_kind(kind),
            namespaced: true,
        }
    }

    /// `group/version`, or just `version` for the core group
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Dynamic API resource for `Api<DynamicObject>`
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: self.kind.clone(),
            plural: self.plural.clone(),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

#[derive(Clone, Debug)]
struct Registration {
    kind: ResourceKind,
    tracked: bool,
    scalable: bool,
}

/// Registry of the kinds this runtime knows about
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    kinds: BTreeMap<(String, String), Registration>,
}

impl TypeRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the OAM kinds and the Deployment/Service pair the
    /// workload controller renders
    pub fn standard() -> Self {
        Self::new()
            .register(ResourceKind::of::<Deployment>(true), true, true)
            .register(ResourceKind::of::<Service>(true), true, false)
            .register(ResourceKind::of::<ContainerizedWorkload>(true), false, false)
            .register(ResourceKind::of::<ManualScalerTrait>(true), false, false)
            .register(ResourceKind::of::<WorkloadDefinition>(false), false, false)
    }

    /// Add a kind. `tracked` kinds are garbage-collected per workload,
    /// `scalable` kinds have their replicas set by the manual scaler.
    pub fn register(mut self, kind: ResourceKind, tracked: bool, scalable: bool) -> Self {
        self.kinds.insert(
            (kind.api_version(), kind.kind.clone()),
            Registration {
                kind,
                tracked,
                scalable,
            },
        );
        self
    }

    /// Registered coordinates for an apiVersion and kind
    pub fn lookup(&self, api_version: &str, kind: &str) -> Option<&ResourceKind> {
        self.kinds
            .get(&(api_version.to_string(), kind.to_string()))
            .map(|r| &r.kind)
    }

    /// Registered coordinates, or a namespaced guess for unknown kinds
    pub fn resolve(&self, api_version: &str, kind: &str) -> ResourceKind {
        self.lookup(api_version, kind)
            .cloned()
            .unwrap_or_else(|| ResourceKind::from_api_version(api_version, kind))
    }

    /// Coordinates of a typed resource, registered or not
    pub fn kind_of<K: Resource<DynamicType = ()>>(&self) -> ResourceKind {
        self.resolve(&K::api_version(&()), &K::kind(&()))
    }

    /// Tracked kind with the given kind name, matched without apiVersion
    /// because ownership records compare kinds by name
    pub fn tracked(&self, kind: &str) -> Option<&ResourceKind> {
        self.kinds
            .values()
            .find(|r| r.tracked && r.kind.kind == kind)
            .map(|r| &r.kind)
    }

    /// Whether the manual scaler may set replicas on this kind
    pub fn is_scalable(&self, api_version: &str, kind: &str) -> bool {
        self.kinds
            .get(&(api_version.to_string(), kind.to_string()))
            .is_some_and(|r| r.scalable)
    }
}

/// Split an apiVersion into group and version
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Known irregular plurals
const KIND_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("ingress", "ingresses"),
    ("networkpolicy", "networkpolicies"),
];

/// Lowercase plural resource name for a kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") || lower.ends_with('x')
    {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_roles() {
        let registry = TypeRegistry::standard();

        assert!(registry.is_scalable("apps/v1", "Deployment"));
        assert!(!registry.is_scalable("v1", "Service"));
        assert!(!registry.is_scalable("apps/v1beta1", "Deployment"));

        assert_eq!(registry.tracked("Deployment").unwrap().plural, "deployments");
        assert_eq!(registry.tracked("Service").unwrap().api_version(), "v1");
        assert!(registry.tracked("ContainerizedWorkload").is_none());
    }

    #[test]
    fn test_workload_definition_is_cluster_scoped() {
        let registry = TypeRegistry::standard();
        let kind = registry.kind_of::<WorkloadDefinition>();
        assert!(!kind.namespaced);
        assert_eq!(kind.plural, "workloaddefinitions");
    }

    #[test]
    fn test_unknown_kind_is_guessed() {
        let registry = TypeRegistry::standard();
        let kind = registry.resolve("example.dev/v1", "Widget");
        assert_eq!(kind.group, "example.dev");
        assert_eq!(kind.version, "v1");
        assert_eq!(kind.plural, "widgets");
        assert!(kind.namespaced);
    }

    #[test]
    fn test_api_resource_for_core_group() {
        let ar = TypeRegistry::standard().kind_of::<Service>().api_resource();
        assert_eq!(ar.group, "");
        assert_eq!(ar.api_version, "v1");
        assert_eq!(ar.plural, "services");
    }

    #[test]
    fn test_pluralize_kind() {
        assert_eq!(pluralize_kind("ContainerizedWorkload"), "containerizedworkloads");
        assert_eq!(pluralize_kind("ManualScalerTrait"), "manualscalertraits");
        assert_eq!(pluralize_kind("Ingress"), "ingresses");
        assert_eq!(pluralize_kind("Policy"), "policies");
        assert_eq!(pluralize_kind("Gateway"), "gateways");
        assert_eq!(pluralize_kind("Box"), "boxes");
    }

    #[test]
    fn test_parse_api_version() {
        assert_eq!(
            parse_api_version("apps/v1"),
            ("apps".to_string(), "v1".to_string())
        );
        assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
    }
}
