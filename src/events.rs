//! Kubernetes Event publishing for reconciliation outcomes

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// Publishes Kubernetes Events.
///
/// Fire-and-forget: a failed publish is logged, never returned.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event about `resource_ref`
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Publisher that drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons, shown in the REASON column of `kubectl get events`
pub mod reasons {
    /// Workload rendered and applied
    pub const WORKLOAD_RECONCILED: &str = "WorkloadReconciled";
    /// Workload pass failed
    pub const WORKLOAD_FAILED: &str = "WorkloadFailed";
    /// Orphaned child deleted
    pub const ORPHAN_DELETED: &str = "OrphanDeleted";
    /// Children scaled to the trait's replica count
    pub const SCALED: &str = "Scaled";
    /// Trait pass failed
    pub const SCALE_FAILED: &str = "ScaleFailed";
}

/// Event actions
pub mod actions {
    /// Reconcile pass
    pub const RECONCILE: &str = "Reconcile";
    /// Garbage collection
    pub const DELETE: &str = "Delete";
    /// Replica patch
    pub const SCALE: &str = "Scale";
}
