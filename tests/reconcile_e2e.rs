//! End-to-end reconciliation against the in-memory object store
//!
//! These tests tell the story of a workload's life from the point of view of
//! an application operator: a workload is created, a trait scales it, the
//! workload is edited and redeployed. Each step runs the real reconcilers
//! and the admission checks through the public API.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::Action;
use serde_json::{json, Value};

use oam_runtime::config::ReconcileConfig;
use oam_runtime::controller::{manual_scaler, workload, Context};
use oam_runtime::crd::{
    ChildResourceKind, ConditionStatus, ContainerizedWorkload, DefinitionReference,
    ManualScalerTrait, WorkloadDefinition, WorkloadDefinitionSpec,
};
use oam_runtime::events::NoopEventPublisher;
use oam_runtime::registry::TypeRegistry;
use oam_runtime::store::memory::InMemoryStore;
use oam_runtime::webhook::manual_scaler::{mutate, validate};
use oam_runtime::webhook::Verdict;

// =============================================================================
// Test Fixtures
// =============================================================================

const NAMESPACE: &str = "shop";

struct Cluster {
    store: Arc<InMemoryStore>,
    registry: Arc<TypeRegistry>,
    ctx: Arc<Context>,
}

impl Cluster {
    fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(TypeRegistry::standard());
        let ctx = Arc::new(Context::new(
            store.clone(),
            registry.clone(),
            Arc::new(NoopEventPublisher),
            ReconcileConfig::default(),
        ));
        let cluster = Self {
            store,
            registry,
            ctx,
        };
        cluster.install_definition();
        cluster
    }

    fn install_definition(&self) {
        let definition = WorkloadDefinition::new(
            "containerizedworkloads.core.oam.dev",
            WorkloadDefinitionSpec {
                definition_ref: DefinitionReference {
                    name: "containerizedworkloads.core.oam.dev".to_string(),
                },
                child_resource_kinds: vec![
                    ChildResourceKind {
                        api_version: "apps/v1".to_string(),
                        kind: "Deployment".to_string(),
                        ..Default::default()
                    },
                    ChildResourceKind {
                        api_version: "v1".to_string(),
                        kind: "Service".to_string(),
                        ..Default::default()
                    },
                ],
            },
        );
        self.store
            .insert(
                &self.registry.kind_of::<WorkloadDefinition>(),
                serde_json::to_value(&definition).unwrap(),
            )
            .unwrap();
    }

    /// Create or replace the workload `name` with one container
    fn put_workload(&self, name: &str, image: &str, port: Option<i32>) {
        let kind = self.registry.kind_of::<ContainerizedWorkload>();
        let ports: Vec<Value> = port
            .map(|p| json!({"name": "http", "containerPort": p}))
            .into_iter()
            .collect();
        let spec = json!({
            "containers": [{"name": "app", "image": image, "ports": ports}]
        });
        let object = match self.store.object(&kind, NAMESPACE, name) {
            Some(mut live) => {
                live["spec"] = spec;
                live
            }
            None => json!({
                "apiVersion": "core.oam.dev/v1alpha2",
                "kind": "ContainerizedWorkload",
                "metadata": {"name": name, "namespace": NAMESPACE},
                "spec": spec
            }),
        };
        self.store.insert(&kind, object).unwrap();
    }

    fn workload(&self, name: &str) -> ContainerizedWorkload {
        let live = self
            .store
            .object(
                &self.registry.kind_of::<ContainerizedWorkload>(),
                NAMESPACE,
                name,
            )
            .unwrap();
        serde_json::from_value(live).unwrap()
    }

    /// Admit a trait the way the API server would: mutate, then validate,
    /// then persist. Returns the validation verdict.
    fn admit_trait(&self, submitted: Value) -> Verdict {
        let mut object = submitted;
        let defaulted = mutate(&serde_json::to_vec(&object).unwrap());
        if let Verdict::Allowed { patch: Some(patch) } = defaulted {
            json_patch::patch(&mut object, &patch.0).unwrap();
        }
        let verdict = validate(&serde_json::to_vec(&object).unwrap());
        if verdict.is_allowed() {
            self.store
                .insert(&self.registry.kind_of::<ManualScalerTrait>(), object)
                .unwrap();
        }
        verdict
    }

    fn scaler(&self, name: &str) -> ManualScalerTrait {
        let live = self
            .store
            .object(
                &self.registry.kind_of::<ManualScalerTrait>(),
                NAMESPACE,
                name,
            )
            .unwrap();
        serde_json::from_value(live).unwrap()
    }

    fn object<K: kube::Resource<DynamicType = ()>>(&self, name: &str) -> Option<Value> {
        self.store
            .object(&self.registry.kind_of::<K>(), NAMESPACE, name)
    }

    async fn reconcile_workload(&self, name: &str) -> Action {
        workload::reconcile(Arc::new(self.workload(name)), self.ctx.clone())
            .await
            .unwrap()
    }

    async fn reconcile_trait(&self, name: &str) -> Action {
        manual_scaler::reconcile(Arc::new(self.scaler(name)), self.ctx.clone())
            .await
            .unwrap()
    }
}

fn scaler_json(replicas: i32, workload: &str) -> Value {
    json!({
        "apiVersion": "core.oam.dev/v1alpha2",
        "kind": "ManualScalerTrait",
        "metadata": {"name": format!("{workload}-scaler"), "namespace": NAMESPACE},
        "spec": {"replicaCount": replicas, "workloadRef": {"name": workload}}
    })
}

fn uid(object: &Value) -> String {
    object["metadata"]["uid"].as_str().unwrap().to_string()
}

// =============================================================================
// Story Tests
// =============================================================================

/// Story: a workload running `app:v1` on port 80 yields a deployment and a
/// service on 80/TCP, and its status records exactly those two objects
#[tokio::test]
async fn story_workload_produces_deployment_and_service() {
    let cluster = Cluster::new();
    cluster.put_workload("web", "app:v1", Some(80));

    assert_eq!(cluster.reconcile_workload("web").await, Action::await_change());

    let deployment = cluster.object::<Deployment>("web-deployment").unwrap();
    let container = &deployment["spec"]["template"]["spec"]["containers"][0];
    assert_eq!(container["image"], "app:v1");
    assert_eq!(container["ports"][0]["containerPort"], 80);
    assert_eq!(container["ports"][0]["protocol"], "TCP");

    let service = cluster.object::<Service>("web-deployment-service").unwrap();
    assert_eq!(service["spec"]["ports"][0]["port"], 80);
    assert_eq!(service["spec"]["ports"][0]["protocol"], "TCP");
    assert_eq!(
        service["spec"]["selector"],
        deployment["spec"]["selector"]["matchLabels"]
    );

    let status = cluster.workload("web").status.unwrap();
    let mut recorded: Vec<String> = status
        .resources
        .iter()
        .filter_map(|r| r.uid.clone())
        .collect();
    recorded.sort();
    let mut live = vec![uid(&deployment), uid(&service)];
    live.sort();
    assert_eq!(recorded, live);
    assert_eq!(status.conditions[0].status, ConditionStatus::True);
}

/// Story: an operator creates a scaler naming only the workload. The
/// mutator fills in the reference, the trait reconciler scales the
/// deployment, and later workload passes leave the replica count alone.
#[tokio::test]
async fn story_trait_scales_and_workload_keeps_replicas() {
    let cluster = Cluster::new();
    cluster.put_workload("web", "app:v1", Some(80));
    cluster.reconcile_workload("web").await;

    assert!(cluster.admit_trait(scaler_json(3, "web")).is_allowed());
    let scaler = cluster.scaler("web-scaler");
    assert_eq!(scaler.spec.workload_ref.kind, "ContainerizedWorkload");
    assert_eq!(scaler.spec.workload_ref.api_version, "core.oam.dev/v1alpha2");

    assert_eq!(cluster.reconcile_trait("web-scaler").await, Action::await_change());
    let deployment = cluster.object::<Deployment>("web-deployment").unwrap();
    assert_eq!(deployment["spec"]["replicas"], 3);

    // a new image rolls the deployment but keeps the trait's count
    cluster.put_workload("web", "app:v2", Some(80));
    cluster.reconcile_workload("web").await;
    let deployment = cluster.object::<Deployment>("web-deployment").unwrap();
    assert_eq!(deployment["spec"]["replicas"], 3);
    assert_eq!(
        deployment["spec"]["template"]["spec"]["containers"][0]["image"],
        "app:v2"
    );

    let conditions = cluster.scaler("web-scaler").status.unwrap().conditions;
    assert_eq!(conditions[0].status, ConditionStatus::True);
}

/// Story: the admission gate refuses a scaler asking for more than ten
/// replicas, so it never reaches the reconciler
#[tokio::test]
async fn story_oversized_scaler_is_rejected_at_admission() {
    let cluster = Cluster::new();
    let verdict = cluster.admit_trait(scaler_json(11, "web"));

    assert_eq!(
        verdict,
        Verdict::Denied {
            reason: "maximum replica count 10, got 11".to_string(),
            code: 403
        }
    );
    assert!(cluster.object::<ManualScalerTrait>("web-scaler").is_none());
}

/// Story: the workload drops its port. The service is garbage-collected,
/// the deployment keeps its identity.
#[tokio::test]
async fn story_dropping_ports_collects_the_service() {
    let cluster = Cluster::new();
    cluster.put_workload("web", "app:v1", Some(80));
    cluster.reconcile_workload("web").await;
    let deployment_uid = uid(&cluster.object::<Deployment>("web-deployment").unwrap());

    cluster.put_workload("web", "app:v1", None);
    cluster.reconcile_workload("web").await;

    assert!(cluster.object::<Service>("web-deployment-service").is_none());
    assert_eq!(
        uid(&cluster.object::<Deployment>("web-deployment").unwrap()),
        deployment_uid
    );
    let resources = cluster.workload("web").status.unwrap().resources;
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].uid.as_deref(), Some(deployment_uid.as_str()));
}

/// Story: two workloads in one namespace never scale or collect each
/// other's children
#[tokio::test]
async fn story_workloads_are_isolated() {
    let cluster = Cluster::new();
    cluster.put_workload("web", "app:v1", Some(80));
    cluster.put_workload("api", "api:v1", Some(8080));
    cluster.reconcile_workload("web").await;
    cluster.reconcile_workload("api").await;

    assert!(cluster.admit_trait(scaler_json(4, "web")).is_allowed());
    cluster.reconcile_trait("web-scaler").await;

    let web = cluster.object::<Deployment>("web-deployment").unwrap();
    let api = cluster.object::<Deployment>("api-deployment").unwrap();
    assert_eq!(web["spec"]["replicas"], 4);
    assert!(api["spec"].get("replicas").is_none());

    cluster.put_workload("web", "app:v1", None);
    cluster.reconcile_workload("web").await;
    assert!(cluster.object::<Service>("web-deployment-service").is_none());
    assert!(cluster.object::<Service>("api-deployment-service").is_some());
}
