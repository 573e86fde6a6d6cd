//! ManualScalerTrait controller
//!
//! The trait never owns what it scales. It follows its `workloadRef` to the
//! workload, asks the workload's WorkloadDefinition which child kinds that
//! workload produces, and sets `spec.replicas` on every scalable child the
//! workload owns. Each scaled child also gains a non-controller owner
//! reference back to the trait so child events reach this controller.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::runtime::reflector::ObjectRef;
use kube::{Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::crd::{set_condition, Condition, ManualScalerTrait, WorkloadDefinition};
use crate::events::{actions, reasons};
use crate::object::{owner_reference, upsert_owner_reference, ManagedObject};
use crate::registry::ResourceKind;
use crate::Error;

use super::Context;

/// Reconcile a ManualScalerTrait
#[instrument(skip(scaler, ctx), fields(scaler = %scaler.name_any()))]
pub async fn reconcile(scaler: Arc<ManualScalerTrait>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = scaler.name_any();
    let namespace = scaler.namespace().unwrap_or_default();
    let kind = ctx.registry.kind_of::<ManualScalerTrait>();

    let Some(current) = ctx.store.get(&kind, &namespace, &name).await? else {
        debug!("trait no longer exists");
        return Ok(Action::await_change());
    };
    let current = parse_trait(current)?;
    info!(replicas = current.spec.replica_count, "reconciling manual scaler");

    match scale_workload(&current, &namespace, &ctx).await {
        Ok(scaled) => {
            publish_success(&current, &namespace, &ctx, scaled).await?;
            Ok(Action::await_change())
        }
        Err(e) => {
            record_failure(&current, &namespace, &ctx, &e).await;
            Err(e)
        }
    }
}

/// Scale every scalable child of the referenced workload. Returns the
/// number of children found.
async fn scale_workload(
    scaler: &ManualScalerTrait,
    namespace: &str,
    ctx: &Context,
) -> Result<usize, Error> {
    let workload_ref = &scaler.spec.workload_ref;
    let workload_kind = ctx
        .registry
        .resolve(&workload_ref.api_version, &workload_ref.kind);

    let workload = ctx
        .store
        .get(&workload_kind, namespace, &workload_ref.name)
        .await
        .map_err(|e| Error::LocateWorkload(e.to_string()))?
        .ok_or_else(|| {
            Error::LocateWorkload(format!("{} {} not found", workload_ref.kind, workload_ref.name))
        })?;
    let workload_uid = ManagedObject::uid(&workload)
        .ok_or_else(|| Error::LocateWorkload(format!("{} has no uid", workload_ref.name)))?
        .to_string();
    if let Some(expected) = workload_ref.uid.as_deref() {
        if expected != workload_uid {
            return Err(Error::ReferenceMismatch {
                expected: expected.to_string(),
                actual: workload_uid,
            });
        }
    }

    let children = owned_children(
        ctx,
        namespace,
        &workload_ref.api_version,
        &workload_ref.kind,
        &workload_uid,
    )
    .await?;
    debug!(children = children.len(), "found workload children");

    let owner = owner_reference(scaler, false)
        .ok_or_else(|| Error::validation("manual scaler has no name or uid"))?;

    let mut scaled = 0;
    for (kind, child) in &children {
        let (api_version, kind_name) = child_type(kind, child);
        if !ctx.registry.is_scalable(&api_version, &kind_name) {
            continue;
        }
        scale_child(ctx, kind, namespace, child, scaler.spec.replica_count, &owner).await?;
        scaled += 1;
    }

    if scaled == 0 {
        return Err(Error::LocateDeployment(format!(
            "no scalable child owned by {} {}",
            workload_ref.kind, workload_ref.name
        )));
    }
    Ok(scaled)
}

/// Children of every kind the workload's definition declares, narrowed to
/// those owned by `workload_uid`
async fn owned_children(
    ctx: &Context,
    namespace: &str,
    api_version: &str,
    kind: &str,
    workload_uid: &str,
) -> Result<Vec<(ResourceKind, DynamicObject)>, Error> {
    let definition_name = WorkloadDefinition::name_for(api_version, kind);
    let definition = ctx
        .store
        .get(&ctx.registry.kind_of::<WorkloadDefinition>(), "", &definition_name)
        .await
        .map_err(|e| Error::LocateResources(e.to_string()))?
        .ok_or_else(|| {
            Error::LocateResources(format!("workload definition {definition_name} not found"))
        })?;
    let definition: WorkloadDefinition = definition.try_parse().map_err(Error::serialization)?;

    let mut children = Vec::new();
    for child_kind in &definition.spec.child_resource_kinds {
        let resource = ctx
            .registry
            .resolve(&child_kind.api_version, &child_kind.kind);
        let listed = ctx
            .store
            .list(&resource, namespace, &child_kind.selector)
            .await
            .map_err(|e| Error::LocateResources(format!("cannot list {resource}: {e}")))?;
        children.extend(
            listed
                .into_iter()
                .filter(|child| child.is_owned_by(workload_uid))
                .map(|child| (resource.clone(), child)),
        );
    }
    Ok(children)
}

/// List responses may omit type metadata on items; fall back to the kind
/// the item was listed as.
fn child_type(listed_as: &ResourceKind, child: &DynamicObject) -> (String, String) {
    let (api_version, kind) = child.kind_api_version();
    if api_version.is_empty() || kind.is_empty() {
        (listed_as.api_version(), listed_as.kind.clone())
    } else {
        (api_version, kind)
    }
}

async fn scale_child(
    ctx: &Context,
    kind: &ResourceKind,
    namespace: &str,
    child: &DynamicObject,
    replicas: i32,
    owner: &OwnerReference,
) -> Result<(), Error> {
    let name = child.name_any();
    let mut refs = ManagedObject::owner_references(child).to_vec();
    let refs_changed = upsert_owner_reference(&mut refs, owner.clone());
    let current = child
        .nested_field(&["spec", "replicas"])
        .and_then(|v| v.as_i64());
    if !refs_changed && current == Some(i64::from(replicas)) {
        debug!(child = %name, replicas, "child already at desired scale");
        return Ok(());
    }

    let patch = json!({
        "metadata": {
            "resourceVersion": child.resource_version(),
            "ownerReferences": refs,
        },
        "spec": { "replicas": replicas },
    });
    ctx.store
        .patch_merge(kind, namespace, &name, &patch)
        .await
        .map_err(|e| Error::scale(&name, e))?;
    info!(child = %name, from = ?current, to = replicas, "scaled child");
    Ok(())
}

async fn publish_success(
    scaler: &ManualScalerTrait,
    namespace: &str,
    ctx: &Context,
    scaled: usize,
) -> Result<(), Error> {
    let mut conditions = scaler
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    if !set_condition(&mut conditions, Condition::reconcile_success()) {
        debug!("status unchanged, skipping update");
        return Ok(());
    }

    let kind = ctx.registry.kind_of::<ManualScalerTrait>();
    ctx.store
        .patch_status(
            &kind,
            namespace,
            &scaler.name_any(),
            &json!({ "conditions": conditions }),
        )
        .await
        .map_err(Error::status)?;

    ctx.events
        .publish(
            &scaler.object_ref(&()),
            EventType::Normal,
            reasons::SCALED,
            actions::SCALE,
            Some(format!(
                "scaled {scaled} children to {} replicas",
                scaler.spec.replica_count
            )),
        )
        .await;
    Ok(())
}

async fn record_failure(scaler: &ManualScalerTrait, namespace: &str, ctx: &Context, err: &Error) {
    warn!(stage = err.stage(), error = %err, "manual scaler pass failed");
    ctx.events
        .publish(
            &scaler.object_ref(&()),
            EventType::Warning,
            reasons::SCALE_FAILED,
            actions::SCALE,
            Some(err.to_string()),
        )
        .await;

    let mut conditions = scaler
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    if !set_condition(&mut conditions, Condition::reconcile_error(err)) {
        return;
    }
    let kind = ctx.registry.kind_of::<ManualScalerTrait>();
    if let Err(e) = ctx
        .store
        .patch_status(
            &kind,
            namespace,
            &scaler.name_any(),
            &json!({ "conditions": conditions }),
        )
        .await
    {
        warn!(error = %e, "failed to publish error condition");
    }
}

/// Error policy for the manual scaler controller
///
/// A workload uid mismatch will not fix itself by retrying, so it waits for
/// the trait to change like every other non-retryable error.
pub fn error_policy(scaler: Arc<ManualScalerTrait>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        scaler = %scaler.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(ctx.config.reconcile_wait)
    } else {
        Action::await_change()
    }
}

/// Watch mapper: the traits a Deployment reports to through its
/// non-controller owner references
pub fn traits_for_child(child: Deployment) -> Vec<ObjectRef<ManualScalerTrait>> {
    let Some(namespace) = child.namespace() else {
        return vec![];
    };
    let trait_kind = ManualScalerTrait::kind(&());
    ManagedObject::owner_references(&child)
        .iter()
        .filter(|o| o.controller != Some(true) && o.kind == trait_kind)
        .map(|o| ObjectRef::new(&o.name).within(&namespace))
        .collect()
}

/// Parse a store object into a trait
pub fn parse_trait(object: DynamicObject) -> Result<ManualScalerTrait, Error> {
    object.try_parse().map_err(Error::serialization)
}
