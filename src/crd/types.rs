//! Supporting types shared by the OAM CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type published by both reconcilers
pub const CONDITION_READY: &str = "Ready";
/// Reason attached to a successful pass
pub const REASON_RECONCILE_SUCCESS: &str = "ReconcileSuccess";
/// Reason attached to a failed pass
pub const REASON_RECONCILE_ERROR: &str = "ReconcileError";

/// Operating system a containerized workload requires
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    /// Linux nodes
    Linux,
    /// Windows nodes
    Windows,
}

impl std::fmt::Display for OsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::Windows => write!(f, "windows"),
        }
    }
}

/// CPU architecture a containerized workload requires
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CpuArch {
    /// 32-bit x86
    I386,
    /// 64-bit x86
    Amd64,
    /// 32-bit ARM
    Arm,
    /// 64-bit ARM
    Arm64,
}

impl std::fmt::Display for CpuArch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::I386 => write!(f, "i386"),
            Self::Amd64 => write!(f, "amd64"),
            Self::Arm => write!(f, "arm"),
            Self::Arm64 => write!(f, "arm64"),
        }
    }
}

/// Reference to a resource managed by, or targeted by, an OAM resource
///
/// Fields default to empty so an incomplete reference still decodes and can
/// be rejected or defaulted by the admission webhook.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReference {
    /// apiVersion of the referenced resource
    #[serde(default)]
    pub api_version: String,

    /// Kind of the referenced resource
    #[serde(default)]
    pub kind: String,

    /// Name of the referenced resource
    #[serde(default)]
    pub name: String,

    /// uid of the referenced resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl ResourceReference {
    /// Create a reference with a known uid
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        uid: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            uid: Some(uid.into()),
        }
    }

    /// True when apiVersion, kind and name are all set
    pub fn is_complete(&self) -> bool {
        !self.api_version.is_empty() && !self.kind.is_empty() && !self.name.is_empty()
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (always `Ready` for OAM resources)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// The condition published after a successful pass
    pub fn reconcile_success() -> Self {
        Self::new(
            CONDITION_READY,
            ConditionStatus::True,
            REASON_RECONCILE_SUCCESS,
            "",
        )
    }

    /// The condition published after a failed pass
    pub fn reconcile_error(err: &crate::Error) -> Self {
        Self::new(
            CONDITION_READY,
            ConditionStatus::False,
            REASON_RECONCILE_ERROR,
            err.to_string(),
        )
    }

    /// Same type, status, reason and message, ignoring the timestamp
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Upsert `condition` into `conditions` by type.
///
/// When an existing condition of the same type is in the same state its
/// transition time is kept. Returns true if anything changed.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) if existing.same_state(&condition) => false,
        Some(existing) => {
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod platform {
        use super::*;

        #[test]
        fn test_display_matches_node_label_values() {
            assert_eq!(OsType::Linux.to_string(), "linux");
            assert_eq!(OsType::Windows.to_string(), "windows");
            let labels: Vec<String> = [CpuArch::I386, CpuArch::Amd64, CpuArch::Arm, CpuArch::Arm64]
                .iter()
                .map(ToString::to_string)
                .collect();
            assert_eq!(labels, vec!["i386", "amd64", "arm", "arm64"]);
        }

        #[test]
        fn test_display_matches_serde_names() {
            for arch in [CpuArch::I386, CpuArch::Amd64, CpuArch::Arm, CpuArch::Arm64] {
                assert_eq!(serde_json::to_value(arch).unwrap(), arch.to_string());
            }
        }
    }

    mod reference {
        use super::*;

        #[test]
        fn test_incomplete_reference_decodes() {
            let r: ResourceReference = serde_json::from_str(r#"{"name":"web"}"#).unwrap();
            assert_eq!(r.name, "web");
            assert!(r.kind.is_empty());
            assert!(!r.is_complete());
        }

        #[test]
        fn test_uid_omitted_when_absent() {
            let r = ResourceReference {
                api_version: "apps/v1".into(),
                kind: "Deployment".into(),
                name: "web-deployment".into(),
                uid: None,
            };
            let json = serde_json::to_value(&r).unwrap();
            assert!(json.get("uid").is_none());
            assert_eq!(json["apiVersion"], "apps/v1");
            assert!(r.is_complete());
        }
    }

    mod conditions {
        use super::*;

        /// Story: re-publishing the same outcome keeps the original timestamp,
        /// so repeated passes do not churn the status subresource
        #[test]
        fn story_unchanged_condition_keeps_transition_time() {
            let mut first = Condition::reconcile_success();
            first.last_transition_time = DateTime::<Utc>::MIN_UTC;
            let mut conditions = vec![first];

            assert!(!set_condition(&mut conditions, Condition::reconcile_success()));
            assert_eq!(conditions[0].last_transition_time, DateTime::<Utc>::MIN_UTC);

            let failed = Condition::reconcile_error(&crate::Error::render("no image"));
            assert!(set_condition(&mut conditions, failed));
            assert_eq!(conditions.len(), 1);
            assert_eq!(conditions[0].status, ConditionStatus::False);
            assert_eq!(conditions[0].reason, REASON_RECONCILE_ERROR);
            assert!(conditions[0].message.starts_with("render:"));
        }

        #[test]
        fn test_new_type_is_appended() {
            let mut conditions = Vec::new();
            assert!(set_condition(&mut conditions, Condition::reconcile_success()));
            assert_eq!(conditions.len(), 1);
            assert_eq!(conditions[0].type_, CONDITION_READY);
        }
    }
}
