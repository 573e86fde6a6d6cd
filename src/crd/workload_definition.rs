//! WorkloadDefinition Custom Resource Definition
//!
//! Cluster-scoped registration of a workload kind. Its `childResourceKinds`
//! list tells traits which resource kinds a workload of this type produces,
//! so they can find children they do not own themselves.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::registry::{parse_api_version, pluralize_kind};

/// Specification for a WorkloadDefinition
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "core.oam.dev",
    version = "v1alpha2",
    kind = "WorkloadDefinition",
    plural = "workloaddefinitions",
    printcolumn = r#"{"name":"Definition","type":"string","jsonPath":".spec.definitionRef.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadDefinitionSpec {
    /// CRD that implements this workload type
    pub definition_ref: DefinitionReference,

    /// Kinds of resources a workload of this type creates
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_resource_kinds: Vec<ChildResourceKind>,
}

/// Name of the CRD backing a definition
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct DefinitionReference {
    /// `<plural>.<group>`
    pub name: String,
}

/// A kind of child resource, optionally narrowed by labels
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChildResourceKind {
    /// apiVersion of the child
    pub api_version: String,
    /// Kind of the child
    pub kind: String,
    /// Labels a child must carry
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,
}

impl WorkloadDefinition {
    /// Name of the definition registered for a workload kind: `<plural>.<group>`
    pub fn name_for(api_version: &str, kind: &str) -> String {
        let (group, _) = parse_api_version(api_version);
        format!("{}.{}", pluralize_kind(kind), group)
    }
}
