//! ContainerizedWorkload controller
//!
//! One pass renders the workload, applies the Deployment and Service,
//! deletes children left behind by earlier renders and records the applied
//! children in `status.resources`. Any failing step publishes a `Ready=False`
//! condition carrying the stage-tagged error and hands the error to
//! [`error_policy`] for a delayed retry.

use std::sync::Arc;

use kube::api::DynamicObject;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::apply::Applier;
use crate::crd::{set_condition, Condition, ContainerizedWorkload, ResourceReference};
use crate::events::{actions, reasons};
use crate::gc::collect_orphans;
use crate::ownership::OwnershipIndex;
use crate::workload::WorkloadRenderer;
use crate::Error;

use super::Context;

/// Reconcile a ContainerizedWorkload
#[instrument(skip(workload, ctx), fields(workload = %workload.name_any()))]
pub async fn reconcile(
    workload: Arc<ContainerizedWorkload>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let name = workload.name_any();
    let namespace = workload.namespace().unwrap_or_default();
    let kind = ctx.registry.kind_of::<ContainerizedWorkload>();

    // the watch cache can lag; work from the stored copy
    let current = match ctx.store.get(&kind, &namespace, &name).await {
        Ok(Some(stored)) => parse_workload(stored),
        Ok(None) => {
            debug!("workload no longer exists");
            return Ok(Action::await_change());
        }
        Err(e) => Err(e),
    };
    // without a stored copy, report against the cached one
    let current = match current {
        Ok(current) => current,
        Err(e) => {
            record_failure(&workload, &namespace, &ctx, &e).await;
            return Err(e);
        }
    };
    info!("reconciling workload");

    match sync_children(&current, &namespace, &ctx).await {
        Ok(()) => Ok(Action::await_change()),
        Err(e) => {
            record_failure(&current, &namespace, &ctx, &e).await;
            Err(e)
        }
    }
}

async fn sync_children(
    workload: &ContainerizedWorkload,
    namespace: &str,
    ctx: &Context,
) -> Result<(), Error> {
    let rendered = WorkloadRenderer::render(workload)?;
    // render refuses workloads without a uid
    let field_owner = workload.uid().unwrap_or_default();

    let applier = Applier::new(ctx.store.clone(), ctx.registry.clone());
    let mut applied = vec![
        applier
            .apply(&rendered.deployment, namespace, &field_owner)
            .await?,
    ];
    if let Some(service) = &rendered.service {
        applied.push(applier.apply(service, namespace, &field_owner).await?);
    }

    let recorded = workload
        .status
        .as_ref()
        .map(|s| s.resources.as_slice())
        .unwrap_or_default();
    let previous = OwnershipIndex::from_status(recorded);
    let mut index = previous.clone();
    index.replace(applied);

    let deleted = collect_orphans(
        ctx.store.as_ref(),
        &ctx.registry,
        namespace,
        &previous,
        &index.kept(),
    )
    .await?;
    for orphan in &deleted {
        ctx.events
            .publish(
                &workload.object_ref(&()),
                EventType::Normal,
                reasons::ORPHAN_DELETED,
                actions::DELETE,
                Some(format!("deleted stale {} {}", orphan.kind, orphan.name)),
            )
            .await;
    }

    publish_success(workload, namespace, ctx, index.references()).await
}

async fn publish_success(
    workload: &ContainerizedWorkload,
    namespace: &str,
    ctx: &Context,
    applied: &[ResourceReference],
) -> Result<(), Error> {
    let status = workload.status.clone().unwrap_or_default();
    let mut conditions = status.conditions;
    let condition_changed = set_condition(&mut conditions, Condition::reconcile_success());
    let resources_changed = !OwnershipIndex::from_status(&status.resources).same_set(applied);

    if !condition_changed && !resources_changed {
        debug!("status unchanged, skipping update");
        return Ok(());
    }

    let kind = ctx.registry.kind_of::<ContainerizedWorkload>();
    ctx.store
        .patch_status(
            &kind,
            namespace,
            &workload.name_any(),
            &json!({ "conditions": conditions, "resources": applied }),
        )
        .await
        .map_err(Error::status)?;

    info!(resources = applied.len(), "workload reconciled");
    ctx.events
        .publish(
            &workload.object_ref(&()),
            EventType::Normal,
            reasons::WORKLOAD_RECONCILED,
            actions::RECONCILE,
            Some(format!("applied {} resources", applied.len())),
        )
        .await;
    Ok(())
}

/// Publish the failure on the workload. `status.resources` is left alone so
/// the next pass still knows what it owns.
async fn record_failure(
    workload: &ContainerizedWorkload,
    namespace: &str,
    ctx: &Context,
    err: &Error,
) {
    warn!(stage = err.stage(), error = %err, "workload pass failed");
    ctx.events
        .publish(
            &workload.object_ref(&()),
            EventType::Warning,
            reasons::WORKLOAD_FAILED,
            actions::RECONCILE,
            Some(err.to_string()),
        )
        .await;

    let mut conditions = workload
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    if !set_condition(&mut conditions, Condition::reconcile_error(err)) {
        return;
    }
    let kind = ctx.registry.kind_of::<ContainerizedWorkload>();
    if let Err(e) = ctx
        .store
        .patch_status(
            &kind,
            namespace,
            &workload.name_any(),
            &json!({ "conditions": conditions }),
        )
        .await
    {
        warn!(error = %e, "failed to publish error condition");
    }
}

/// Error policy for the workload controller
///
/// - Retryable errors: requeue after the configured wait
/// - Non-retryable errors: await spec change
pub fn error_policy(
    workload: Arc<ContainerizedWorkload>,
    error: &Error,
    ctx: Arc<Context>,
) -> Action {
    error!(
        ?error,
        workload = %workload.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(ctx.config.reconcile_wait)
    } else {
        Action::await_change()
    }
}

/// Parse a store object into a workload
pub fn parse_workload(object: DynamicObject) -> Result<ContainerizedWorkload, Error> {
    object.try_parse().map_err(Error::serialization)
}
