//! Rendering of ContainerizedWorkloads into Kubernetes resources
//!
//! A workload renders into:
//! - Deployment `<name>-deployment` running every container
//! - Service `<name>-deployment-service`, only when some container has a port
//!
//! Rendering is pure. Namespaces are filled in by the [`crate::apply`] layer.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::{self, ContainerSpec, ContainerizedWorkload};
use crate::object::owner_reference;
use crate::Error;

/// Label carrying the workload name, used as the pod selector
pub const WORKLOAD_NAME_LABEL: &str = "containerizedworkload.oam.dev/name";
/// Node label constrained by `osType`
pub const OS_NODE_LABEL: &str = "kubernetes.io/os";
/// Node label constrained by `arch`
pub const ARCH_NODE_LABEL: &str = "kubernetes.io/arch";

const DEFAULT_PROTOCOL: &str = "TCP";
const SERVICE_TYPE: &str = "LoadBalancer";

/// Name of the Deployment rendered for a workload
pub fn deployment_name(workload: &str) -> String {
    format!("{workload}-deployment")
}

/// Name of the Service rendered for a workload
pub fn service_name(workload: &str) -> String {
    format!("{}-service", deployment_name(workload))
}

/// Pod selector for a workload. Depends only on the workload name so the
/// immutable Deployment selector never changes across renders.
pub fn selector_labels(workload: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(WORKLOAD_NAME_LABEL.to_string(), workload.to_string())])
}

fn object_labels(workload: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(workload);
    labels.insert("app.kubernetes.io/name".to_string(), workload.to_string());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "oam-runtime".to_string(),
    );
    labels
}

/// Resources rendered for one workload
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedWorkload {
    /// Primary resource
    pub deployment: Deployment,
    /// Present when any container declares a port
    pub service: Option<Service>,
}

/// Renders ContainerizedWorkloads
pub struct WorkloadRenderer;

impl WorkloadRenderer {
    /// Render a workload into its Deployment and optional Service
    pub fn render(workload: &ContainerizedWorkload) -> Result<RenderedWorkload, Error> {
        let name = workload.name_any();
        if workload.metadata.name.is_none() {
            return Err(Error::render("workload has no name"));
        }
        let owner = owner_reference(workload, true)
            .ok_or_else(|| Error::render(format!("workload {name} has no uid yet")))?;

        if workload.spec.containers.is_empty() {
            return Err(Error::render(format!("workload {name} declares no containers")));
        }

        let containers = workload
            .spec
            .containers
            .iter()
            .map(Self::render_container)
            .collect::<Result<Vec<_>, _>>()?;

        let deployment = Self::render_deployment(&name, workload, containers, owner.clone());
        let service = Self::render_service(&name, &workload.spec.containers, owner);

        Ok(RenderedWorkload {
            deployment,
            service,
        })
    }

    fn render_deployment(
        name: &str,
        workload: &ContainerizedWorkload,
        containers: Vec<Container>,
        owner: OwnerReference,
    ) -> Deployment {
        let mut node_selector = BTreeMap::new();
        if let Some(os) = workload.spec.os_type {
            node_selector.insert(OS_NODE_LABEL.to_string(), os.to_string());
        }
        if let Some(arch) = workload.spec.arch {
            node_selector.insert(ARCH_NODE_LABEL.to_string(), arch.to_string());
        }

        Deployment {
            metadata: ObjectMeta {
                name: Some(deployment_name(name)),
                labels: Some(object_labels(name)),
                owner_references: Some(vec![owner]),
                ..Default::default()
            },
            // replicas stays unset: the manual scaler owns that field
            spec: Some(DeploymentSpec {
                selector: LabelSelector {
                    match_labels: Some(selector_labels(name)),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(selector_labels(name)),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers,
                        node_selector: (!node_selector.is_empty()).then_some(node_selector),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    fn render_container(spec: &ContainerSpec) -> Result<Container, Error> {
        let image = spec
            .image
            .as_deref()
            .filter(|i| !i.trim().is_empty())
            .ok_or_else(|| Error::render(format!("container {} has no image", spec.name)))?;

        let ports = spec
            .ports
            .iter()
            .map(|p| Self::render_port(&spec.name, p))
            .collect::<Result<Vec<_>, _>>()?;

        let env = spec
            .env
            .iter()
            .map(|e| EnvVar {
                name: e.name.clone(),
                value: Some(e.value.clone()),
                ..Default::default()
            })
            .collect::<Vec<_>>();

        Ok(Container {
            name: spec.name.clone(),
            image: Some(image.to_string()),
            command: (!spec.command.is_empty()).then(|| spec.command.clone()),
            args: (!spec.args.is_empty()).then(|| spec.args.clone()),
            env: (!env.is_empty()).then_some(env),
            ports: (!ports.is_empty()).then_some(ports),
            resources: spec.resources.as_ref().map(Self::render_resources),
            ..Default::default()
        })
    }

    fn render_port(container: &str, port: &crd::ContainerPort) -> Result<ContainerPort, Error> {
        if !(1..=65535).contains(&port.container_port) {
            return Err(Error::render(format!(
                "container {container} declares invalid port {}",
                port.container_port
            )));
        }
        Ok(ContainerPort {
            name: port.name.clone(),
            container_port: port.container_port,
            protocol: Some(protocol_or_default(port.protocol.as_deref())),
            ..Default::default()
        })
    }

    fn render_resources(resources: &crd::ResourceRequirements) -> ResourceRequirements {
        let quantities = |m: &BTreeMap<String, String>| {
            (!m.is_empty()).then(|| {
                m.iter()
                    .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                    .collect::<BTreeMap<_, _>>()
            })
        };
        ResourceRequirements {
            requests: quantities(&resources.requests),
            limits: quantities(&resources.limits),
            ..Default::default()
        }
    }

    /// One port per container, taken from that container's first port
    fn render_service(
        name: &str,
        containers: &[ContainerSpec],
        owner: OwnerReference,
    ) -> Option<Service> {
        let ports: Vec<ServicePort> = containers
            .iter()
            .filter_map(|c| {
                c.ports.first().map(|p| ServicePort {
                    name: Some(c.name.clone()),
                    port: p.container_port,
                    target_port: Some(IntOrString::Int(p.container_port)),
                    protocol: Some(protocol_or_default(p.protocol.as_deref())),
                    ..Default::default()
                })
            })
            .collect();

        if ports.is_empty() {
            return None;
        }

        Some(Service {
            metadata: ObjectMeta {
                name: Some(service_name(name)),
                labels: Some(object_labels(name)),
                owner_references: Some(vec![owner]),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(selector_labels(name)),
                ports: Some(ports),
                type_: Some(SERVICE_TYPE.to_string()),
                ..Default::default()
            }),
            status: None,
        })
    }
}

fn protocol_or_default(protocol: Option<&str>) -> String {
    match protocol {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => DEFAULT_PROTOCOL.to_string(),
    }
}
