//! ManualScalerTrait admission
//!
//! Validation bounds the replica count and requires a complete workload
//! reference. Mutation fills in the reference's kind and apiVersion when they
//! are missing; it never rejects an object it can decode.

use axum::http::StatusCode;
use axum::Json;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{error, info};

use crate::crd::{ManualScalerTrait, ResourceReference, CONTAINERIZED_WORKLOAD_KIND};
use crate::Error;

use super::{admit, path_for, Verdict, MUTATE_PATH_PREFIX};

/// The part of a trait the mutator reads. Fields it does not default are
/// left for validation and the CRD schema to judge.
#[derive(Deserialize)]
struct DefaultingView {
    #[serde(default)]
    spec: DefaultingSpec,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct DefaultingSpec {
    #[serde(default)]
    workload_ref: ResourceReference,
}

fn decode<T: DeserializeOwned>(raw: &[u8]) -> Result<(Value, T), Verdict> {
    let bad_request = |e: serde_json::Error| {
        Verdict::denied(
            format!("cannot decode manual scaler trait: {e}"),
            StatusCode::BAD_REQUEST,
        )
    };
    let value: Value = serde_json::from_slice(raw).map_err(bad_request)?;
    let decoded = serde_json::from_value(value.clone()).map_err(bad_request)?;
    Ok((value, decoded))
}

/// Decide whether a ManualScalerTrait may be persisted
pub fn validate(raw: &[u8]) -> Verdict {
    let (_, scaler) = match decode::<ManualScalerTrait>(raw) {
        Ok(decoded) => decoded,
        Err(verdict) => return verdict,
    };
    match scaler.spec.validate() {
        Ok(()) => Verdict::allowed(),
        Err(Error::Validation(reason)) => Verdict::denied(reason, StatusCode::FORBIDDEN),
        Err(other) => Verdict::denied(other.to_string(), StatusCode::FORBIDDEN),
    }
}

/// Default the workload reference of a ManualScalerTrait.
///
/// A missing kind becomes `ContainerizedWorkload` and a missing apiVersion
/// becomes the trait's own apiVersion. Returns the RFC 6902 patch between
/// the submitted and the defaulted object.
pub fn mutate(raw: &[u8]) -> Verdict {
    let (original, view) = match decode::<DefaultingView>(raw) {
        Ok(decoded) => decoded,
        Err(verdict) => return verdict,
    };

    let api_version = original
        .get("apiVersion")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| ManualScalerTrait::api_version(&()).into_owned());
    let mut defaulted = original.clone();
    let Some(target) = workload_ref_mut(&mut defaulted) else {
        return Verdict::denied(
            "cannot decode manual scaler trait: spec.workloadRef is not an object",
            StatusCode::BAD_REQUEST,
        );
    };
    let workload_ref = &view.spec.workload_ref;
    if workload_ref.kind.is_empty() {
        target.insert("kind".into(), json!(CONTAINERIZED_WORKLOAD_KIND));
    }
    if workload_ref.api_version.is_empty() {
        target.insert("apiVersion".into(), json!(api_version));
    }

    let patch = json_patch::diff(&original, &defaulted);
    if patch.0.is_empty() {
        return Verdict::allowed();
    }
    Verdict::Allowed { patch: Some(patch) }
}

/// `spec.workloadRef` as a JSON object, created when absent
fn workload_ref_mut(doc: &mut Value) -> Option<&mut Map<String, Value>> {
    doc.as_object_mut()?
        .entry("spec")
        .or_insert_with(|| json!({}))
        .as_object_mut()?
        .entry("workloadRef")
        .or_insert_with(|| json!({}))
        .as_object_mut()
}

/// Handle validating admission reviews for ManualScalerTraits
pub async fn validate_handler(
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let verdict = admit::<ManualScalerTrait>(&request, validate);
    info!(
        uid = %request.uid,
        name = %request.name,
        operation = ?request.operation,
        allowed = verdict.is_allowed(),
        "validated manual scaler trait"
    );
    Json(verdict.into_response(&request, None).into_review())
}

/// Handle mutating admission reviews for ManualScalerTraits
pub async fn mutate_handler(
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let verdict = admit::<ManualScalerTrait>(&request, mutate);
    info!(
        uid = %request.uid,
        name = %request.name,
        patched = matches!(verdict, Verdict::Allowed { patch: Some(_) }),
        "admitted manual scaler trait"
    );
    let mutator = path_for::<ManualScalerTrait>(MUTATE_PATH_PREFIX);
    Json(verdict.into_response(&request, Some(&mutator)).into_review())
}
