//! Custom Resource Definitions for the OAM runtime
//!
//! All kinds live in `core.oam.dev/v1alpha2`.

mod containerized_workload;
mod manual_scaler_trait;
mod types;
mod workload_definition;

pub use containerized_workload::{
    ContainerPort, ContainerSpec, ContainerizedWorkload, ContainerizedWorkloadSpec,
    ContainerizedWorkloadStatus, EnvVar, ResourceRequirements,
};
pub use manual_scaler_trait::{
    ManualScalerTrait, ManualScalerTraitSpec, ManualScalerTraitStatus, MAX_REPLICA_COUNT,
};
pub use types::{
    set_condition, Condition, ConditionStatus, CpuArch, OsType, ResourceReference,
    CONDITION_READY, REASON_RECONCILE_ERROR, REASON_RECONCILE_SUCCESS,
};
pub use workload_definition::{
    ChildResourceKind, DefinitionReference, WorkloadDefinition, WorkloadDefinitionSpec,
};

/// Kind name of the canonical workload
pub const CONTAINERIZED_WORKLOAD_KIND: &str = "ContainerizedWorkload";
