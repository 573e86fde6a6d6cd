//! ManualScalerTrait Custom Resource Definition
//!
//! A ManualScalerTrait pins the replica count of every scalable child of the
//! workload it references.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ResourceReference};

/// Highest replica count the admission webhook accepts
pub const MAX_REPLICA_COUNT: i32 = 10;

/// Specification for a ManualScalerTrait
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "core.oam.dev",
    version = "v1alpha2",
    kind = "ManualScalerTrait",
    plural = "manualscalertraits",
    status = "ManualScalerTraitStatus",
    namespaced,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicaCount"}"#,
    printcolumn = r#"{"name":"Workload","type":"string","jsonPath":".spec.workloadRef.name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManualScalerTraitSpec {
    /// Desired replica count of the workload's children
    pub replica_count: i32,

    /// Workload this trait applies to
    #[serde(default)]
    pub workload_ref: ResourceReference,
}

impl ManualScalerTraitSpec {
    /// Validate the spec the same way the admission webhook does
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.replica_count > MAX_REPLICA_COUNT {
            return Err(crate::Error::validation(format!(
                "maximum replica count {MAX_REPLICA_COUNT}, got {}",
                self.replica_count
            )));
        }
        if self.replica_count < 0 {
            return Err(crate::Error::validation(format!(
                "replica count must not be negative, got {}",
                self.replica_count
            )));
        }
        if !self.workload_ref.is_complete() {
            return Err(crate::Error::validation(format!(
                "workload reference not valid, name: {:?}, apiVersion: {:?}, kind: {:?}",
                self.workload_ref.name, self.workload_ref.api_version, self.workload_ref.kind
            )));
        }
        Ok(())
    }
}

/// Observed state of a ManualScalerTrait
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ManualScalerTraitStatus {
    /// Ready condition of the last pass
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
