//! Admission dispatch
//!
//! Turns an `AdmissionReview` into a hook call and the hook's result back
//! into a review. Hook failures become denied reviews carrying the error
//! message, so an object that could not be pointed at the mirror is never
//! admitted pointing upstream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
};
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn, Instrument};
use zarf_common::metrics::{record_admission, AdmissionOutcome};
use zarf_common::Error;

use super::WebhookState;
use crate::context::RequestContext;
use crate::hooks::{is_opted_out, Hook, HookRequest, HookResult};

/// Error type for requests that never reach a hook
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// `/mutate/{hook}` named a hook that does not exist
    #[error("unknown hook '{0}'")]
    UnknownHook(String),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::UnknownHook(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

type GvkKey = (String, String, String);

/// Hooks indexed by the kinds they serve and by route alias
#[derive(Default)]
pub struct HookRegistry {
    by_kind: HashMap<GvkKey, Arc<dyn Hook>>,
    by_name: HashMap<&'static str, Arc<dyn Hook>>,
}

impl HookRegistry {
    /// Index `hooks` under every version they serve
    pub fn new(hooks: Vec<Arc<dyn Hook>>) -> Self {
        let mut registry = Self::default();
        for hook in hooks {
            for version in hook.versions() {
                let key = (
                    hook.group().to_string(),
                    version.to_string(),
                    hook.kind().to_string(),
                );
                if registry.by_kind.insert(key, hook.clone()).is_some() {
                    warn!(
                        hook = hook.name(),
                        kind = hook.kind(),
                        version = %version,
                        "Hook replaces an earlier registration"
                    );
                }
            }
            registry.by_name.insert(hook.name(), hook);
        }
        registry
    }

    /// Hook serving `group/version, Kind=kind`
    pub fn lookup(&self, group: &str, version: &str, kind: &str) -> Option<&Arc<dyn Hook>> {
        self.by_kind
            .get(&(group.to_string(), version.to_string(), kind.to_string()))
    }

    /// Hook routed at `/mutate/{name}`
    pub fn by_name(&self, name: &str) -> Option<&Arc<dyn Hook>> {
        self.by_name.get(name)
    }

    /// Number of distinct hooks
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether no hook is registered
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Handle `POST /mutate`
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(dispatch(&state, &req, None).await.into_review())
}

/// Handle `POST /mutate/{hook}`
pub async fn mutate_named_handler(
    State(state): State<Arc<WebhookState>>,
    Path(hook): Path<String>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Result<Json<AdmissionReview<DynamicObject>>, WebhookError> {
    let expected = state
        .registry
        .by_name(&hook)
        .cloned()
        .ok_or(WebhookError::UnknownHook(hook))?;

    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, hook = expected.name(), "Failed to parse admission request");
            return Ok(Json(AdmissionResponse::invalid(e.to_string()).into_review()));
        }
    };

    Ok(Json(dispatch(&state, &req, Some(&expected)).await.into_review()))
}

/// Run the hook for one request and record the outcome
async fn dispatch(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
    expected: Option<&Arc<dyn Hook>>,
) -> AdmissionResponse {
    let started = Instant::now();
    let kind = request.kind.kind.as_str();
    let operation = operation_label(&request.operation);
    let span = info_span!(
        "admission",
        uid = %request.uid,
        kind = %kind,
        operation = %operation,
        name = %request.name,
        namespace = request.namespace.as_deref().unwrap_or_default(),
    );

    let (response, outcome) = run_hook(state, request, expected, span.clone())
        .instrument(span)
        .await;

    record_admission(kind, operation, outcome, started.elapsed().as_secs_f64());
    response
}

async fn run_hook(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
    expected: Option<&Arc<dyn Hook>>,
    span: tracing::Span,
) -> (AdmissionResponse, AdmissionOutcome) {
    let gvk = &request.kind;
    let hook = state.registry.lookup(&gvk.group, &gvk.version, &gvk.kind);

    if let Some(expected) = expected {
        if hook.map(|h| h.name()) != Some(expected.name()) {
            warn!(hook = expected.name(), "Request kind does not match the hook route");
            let message = format!(
                "hook '{}' handles {} but the request is for {}",
                expected.name(),
                expected.kind(),
                describe_gvk(&gvk.group, &gvk.version, &gvk.kind)
            );
            return (
                AdmissionResponse::from(request).deny(message),
                AdmissionOutcome::Denied,
            );
        }
    }

    let Some(hook) = hook else {
        debug!("No hook registered for kind, allowing unchanged");
        return respond(
            request,
            HookResult::allow_with_warning(format!(
                "zarf-agent has no hook for {}",
                describe_gvk(&gvk.group, &gvk.version, &gvk.kind)
            )),
        );
    };

    let (object, old_object) = match (to_value(&request.object), to_value(&request.old_object)) {
        (Ok(object), Ok(old_object)) => (object, old_object),
        (Err(e), _) | (_, Err(e)) => return fail(request, e),
    };

    let opted_out = object
        .as_ref()
        .or(old_object.as_ref())
        .is_some_and(is_opted_out);
    if opted_out {
        info!("Object opted out of mutation");
        return respond(
            request,
            HookResult::allow_with_warning(format!(
                "{} {} is labelled {}={} and was not mutated",
                gvk.kind,
                request.name,
                zarf_common::AGENT_IGNORE_LABEL_KEY,
                zarf_common::AGENT_IGNORE_LABEL_VALUE
            )),
        );
    }

    let ctx = RequestContext::new(
        request.uid.clone(),
        state.request_timeout,
        state.lookup_timeout,
        state.shutdown.request_token(),
        span,
    );
    let hook_request = HookRequest {
        operation: request.operation.clone(),
        object: object.as_ref(),
        namespace: request.namespace.as_deref(),
        name: &request.name,
    };

    let result = match request.operation {
        Operation::Create => hook.on_create(&ctx, &hook_request).await,
        Operation::Update => hook.on_update(&ctx, &hook_request).await,
        Operation::Delete => hook.on_delete(&ctx, &hook_request).await,
        _ => Ok(HookResult::allow()),
    };

    match result {
        Ok(result) => respond(request, result),
        Err(e) => fail(request, e),
    }
}

/// Convert a hook result into the admission response
fn respond(
    request: &AdmissionRequest<DynamicObject>,
    result: HookResult,
) -> (AdmissionResponse, AdmissionOutcome) {
    let base = AdmissionResponse::from(request);

    let (mut response, outcome) = if !result.allowed() {
        let message = result.message().unwrap_or("denied by zarf-agent").to_string();
        info!(reason = %message, "Denying object");
        (base.deny(message), AdmissionOutcome::Denied)
    } else if result.patches().is_empty() {
        (base, AdmissionOutcome::Skipped)
    } else {
        let count = result.patches().len();
        match base.with_patch(json_patch::Patch(result.patches().to_vec())) {
            Ok(response) => {
                info!(patch_ops = count, "Patching object");
                (response, AdmissionOutcome::Patched)
            }
            Err(e) => {
                error!(error = %e, "Failed to serialize patch");
                let message = format!("patch serialization error: {e}");
                return (
                    AdmissionResponse::from(request).deny(message),
                    AdmissionOutcome::Error,
                );
            }
        }
    };

    if !result.warnings().is_empty() {
        response.warnings = Some(result.warnings().to_vec());
    }
    (response, outcome)
}

fn fail(
    request: &AdmissionRequest<DynamicObject>,
    e: Error,
) -> (AdmissionResponse, AdmissionOutcome) {
    error!(
        error = %e,
        error_kind = e.kind(),
        retryable = e.is_retryable(),
        "Hook failed, denying object"
    );
    (
        AdmissionResponse::from(request).deny(e.to_string()),
        AdmissionOutcome::Error,
    )
}

fn to_value(object: &Option<DynamicObject>) -> Result<Option<Value>, Error> {
    object
        .as_ref()
        .map(|o| {
            let kind = o.types.as_ref().map_or("object", |t| t.kind.as_str());
            serde_json::to_value(o).map_err(|e| Error::decode_for_kind(kind, e.to_string()))
        })
        .transpose()
}

fn operation_label(operation: &Operation) -> &'static str {
    match operation {
        Operation::Create => "CREATE",
        Operation::Update => "UPDATE",
        Operation::Delete => "DELETE",
        _ => "CONNECT",
    }
}

fn describe_gvk(group: &str, version: &str, kind: &str) -> String {
    if group.is_empty() {
        format!("{}, Kind={}", version, kind)
    } else {
        format!("{}/{}, Kind={}", group, version, kind)
    }
}
