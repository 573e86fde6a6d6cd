//! Admission webhook for OAM traits
//!
//! The API server calls these endpoints before persisting a
//! ManualScalerTrait:
//! - `POST /validate-core-oam-dev-v1alpha2-manualscalertrait` rejects out of
//!   range replica counts and incomplete workload references
//! - `POST /mutate-core-oam-dev-v1alpha2-manualscalertrait` defaults the
//!   workload reference kind and apiVersion
//!
//! The decisions themselves are pure functions over the raw object
//! ([`manual_scaler::validate`], [`manual_scaler::mutate`]); the handlers
//! only translate between `AdmissionReview` and [`Verdict`].

pub mod manual_scaler;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse};
use kube::Resource;
use tracing::{debug, error};

use crate::crd::ManualScalerTrait;

/// Path prefix of validating endpoints
pub const VALIDATE_PATH_PREFIX: &str = "/validate-";
/// Path prefix of mutating endpoints
pub const MUTATE_PATH_PREFIX: &str = "/mutate-";
/// Audit annotation key naming the mutator that patched an object
pub const MUTATOR_ANNOTATION: &str = "mutator";

/// Outcome of an admission check
#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    /// Admit the object, optionally after applying an RFC 6902 patch
    Allowed {
        /// Patch to apply, `None` when nothing changes
        patch: Option<json_patch::Patch>,
    },
    /// Reject the object
    Denied {
        /// Message shown to the client
        reason: String,
        /// HTTP status code reported in the admission result
        code: u16,
    },
}

impl Verdict {
    /// Admit unchanged
    pub fn allowed() -> Self {
        Self::Allowed { patch: None }
    }

    /// Reject with `reason`
    pub fn denied(reason: impl Into<String>, code: StatusCode) -> Self {
        Self::Denied {
            reason: reason.into(),
            code: code.as_u16(),
        }
    }

    /// Whether the object is admitted
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Turn the verdict into a response to `request`. Allowed responses are
    /// tagged with `mutator` when given.
    pub fn into_response(
        self,
        request: &AdmissionRequest<DynamicObject>,
        mutator: Option<&str>,
    ) -> AdmissionResponse {
        let response = AdmissionResponse::from(request);
        let mut response = match self {
            Self::Denied { reason, code } => {
                let mut denied = response.deny(reason);
                denied.result.code = code;
                return denied;
            }
            Self::Allowed { patch: None } => response,
            Self::Allowed { patch: Some(patch) } => match response.with_patch(patch) {
                Ok(patched) => patched,
                Err(e) => {
                    error!(uid = %request.uid, error = %e, "Failed to serialize patch");
                    let mut denied = AdmissionResponse::from(request)
                        .deny(format!("patch serialization error: {e}"));
                    denied.result.code = StatusCode::INTERNAL_SERVER_ERROR.as_u16();
                    return denied;
                }
            },
        };
        if let Some(mutator) = mutator {
            response
                .audit_annotations
                .insert(MUTATOR_ANNOTATION.to_string(), mutator.to_string());
        }
        response
    }
}

/// Endpoint path for a kind: dots in the group become dashes and the kind
/// is lowercased, e.g. `/validate-core-oam-dev-v1alpha2-manualscalertrait`
pub fn webhook_path(prefix: &str, group: &str, version: &str, kind: &str) -> String {
    format!(
        "{prefix}{}-{version}-{}",
        group.replace('.', "-"),
        kind.to_lowercase()
    )
}

/// Endpoint path for a typed resource
pub fn path_for<K: Resource<DynamicType = ()>>(prefix: &str) -> String {
    webhook_path(prefix, &K::group(&()), &K::version(&()), &K::kind(&()))
}

/// Reject requests for any resource other than `K`
fn check_resource<K: Resource<DynamicType = ()>>(
    request: &AdmissionRequest<DynamicObject>,
) -> Result<(), Verdict> {
    let (group, version, plural) = (K::group(&()), K::version(&()), K::plural(&()));
    let got = &request.resource;
    if got.group == group && got.version == version && got.resource == plural {
        return Ok(());
    }
    Err(Verdict::denied(
        format!(
            "wrong resource, expected {group}/{version}/{plural}, got {}/{}/{}",
            got.group, got.version, got.resource
        ),
        StatusCode::BAD_REQUEST,
    ))
}

/// Run `check` against the object in `request`
pub(crate) fn admit<K: Resource<DynamicType = ()>>(
    request: &AdmissionRequest<DynamicObject>,
    check: fn(&[u8]) -> Verdict,
) -> Verdict {
    if let Err(verdict) = check_resource::<K>(request) {
        return verdict;
    }
    let Some(object) = &request.object else {
        debug!(uid = %request.uid, "No object in request, allowing unchanged");
        return Verdict::allowed();
    };
    match serde_json::to_vec(object) {
        Ok(raw) => check(&raw),
        Err(e) => Verdict::denied(e.to_string(), StatusCode::BAD_REQUEST),
    }
}

/// Create the webhook router with every admission endpoint
pub fn webhook_router() -> Router {
    Router::new()
        .route(
            &path_for::<ManualScalerTrait>(VALIDATE_PATH_PREFIX),
            post(manual_scaler::validate_handler),
        )
        .route(
            &path_for::<ManualScalerTrait>(MUTATE_PATH_PREFIX),
            post(manual_scaler::mutate_handler),
        )
        .route("/healthz", get(|| async { "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_generated_from_gvk() {
        assert_eq!(
            path_for::<ManualScalerTrait>(VALIDATE_PATH_PREFIX),
            "/validate-core-oam-dev-v1alpha2-manualscalertrait"
        );
        assert_eq!(
            path_for::<ManualScalerTrait>(MUTATE_PATH_PREFIX),
            "/mutate-core-oam-dev-v1alpha2-manualscalertrait"
        );
        assert_eq!(
            webhook_path("/validate-", "apps", "v1", "Deployment"),
            "/validate-apps-v1-deployment"
        );
    }

    #[test]
    fn test_verdict_constructors() {
        assert!(Verdict::allowed().is_allowed());
        let denied = Verdict::denied("no", StatusCode::FORBIDDEN);
        assert!(!denied.is_allowed());
        assert_eq!(
            denied,
            Verdict::Denied {
                reason: "no".into(),
                code: 403
            }
        );
    }
}
