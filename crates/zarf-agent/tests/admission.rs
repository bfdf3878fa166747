//! End-to-end admission tests
//!
//! Full AdmissionReview envelopes go through the router; returned patches are
//! applied to the submitted object and the result is admitted again as an
//! update, the way a controller re-applying its object would.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine;
use serde_json::{json, Value};
use tower::ServiceExt;

use zarf_agent::context::RequestContext;
use zarf_agent::hooks::{all_hooks, HookDeps};
use zarf_agent::server::Shutdown;
use zarf_agent::state::StateProvider;
use zarf_agent::webhook::{webhook_router, HookRegistry, WebhookState};
use zarf_common::{Error, MirrorConfig};
use zarf_transform::{checksum, ReferenceEncoding, Transformer};

const NODE_PORT_REGISTRY: &str = "127.0.0.1:31999";
const REGISTRY_SERVICE: &str = "zarf-docker-registry.zarf.svc.cluster.local:5000";
const GIT_SERVER: &str = "http://zarf-gitea-http.zarf.svc.cluster.local:3000";

/// Fixed mirror; the node port registry resolves to its Service
struct StaticState {
    mirror: Option<Arc<MirrorConfig>>,
}

#[async_trait]
impl StateProvider for StaticState {
    async fn load(&self, _ctx: &RequestContext) -> Result<Arc<MirrorConfig>, Error> {
        self.mirror
            .clone()
            .ok_or_else(|| Error::state_load_from("zarf/zarf-state", "secret not found"))
    }

    async fn resolve_reachable_address(
        &self,
        _ctx: &RequestContext,
        raw: &str,
    ) -> Result<String, Error> {
        Ok(if raw == NODE_PORT_REGISTRY {
            REGISTRY_SERVICE.to_string()
        } else {
            raw.to_string()
        })
    }
}

fn mirror() -> MirrorConfig {
    MirrorConfig {
        registry_address: NODE_PORT_REGISTRY.to_string(),
        registry_internal: true,
        registry_pull_secret_name: "private-registry".to_string(),
        git_address: GIT_SERVER.to_string(),
        git_push_username: "zarf-git-user".to_string(),
        git_pull_secret_name: "private-git-server".to_string(),
    }
}

fn router(mirror: Option<MirrorConfig>) -> axum::Router {
    let deps = HookDeps {
        state: Arc::new(StaticState {
            mirror: mirror.map(Arc::new),
        }),
        transformer: Transformer::new(ReferenceEncoding::Checksum),
    };
    webhook_router(Arc::new(WebhookState {
        registry: HookRegistry::new(all_hooks(&deps)),
        request_timeout: Duration::from_secs(10),
        lookup_timeout: Duration::from_secs(3),
        shutdown: Shutdown::default(),
    }))
}

fn review(gvk: (&str, &str, &str), resource: &str, operation: &str, object: &Value) -> Value {
    let (group, version, kind) = gvk;
    let old_object = if operation == "UPDATE" {
        object.clone()
    } else {
        Value::Null
    };
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": format!("{}-{}", kind.to_lowercase(), operation.to_lowercase()),
            "kind": {"group": group, "version": version, "kind": kind},
            "resource": {"group": group, "version": version, "resource": resource},
            "name": object["metadata"]["name"],
            "namespace": object["metadata"]["namespace"],
            "operation": operation,
            "userInfo": {"username": "system:serviceaccount:flux-system:kustomize-controller"},
            "object": object,
            "oldObject": old_object,
            "dryRun": false
        }
    })
}

async fn admit(router: &axum::Router, uri: &str, review: Value) -> Value {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(review.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    body["response"].clone()
}

fn apply(object: &mut Value, response: &Value) {
    let encoded = response["patch"].as_str().expect("response carries a patch");
    let raw = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .unwrap();
    let patch: json_patch::Patch = serde_json::from_slice(&raw).unwrap();
    json_patch::patch(object, &patch).unwrap();
}

const FLUX_GIT: (&str, &str, &str) = ("source.toolkit.fluxcd.io", "v1", "GitRepository");
const FLUX_HELM: (&str, &str, &str) = ("source.toolkit.fluxcd.io", "v1", "HelmRepository");
const POD: (&str, &str, &str) = ("", "v1", "Pod");

/// Story: a Flux git source is rewritten once and then left alone
#[tokio::test]
async fn story_git_repository_is_mutated_exactly_once() {
    let router = router(Some(mirror()));
    let mut object = json!({
        "apiVersion": "source.toolkit.fluxcd.io/v1",
        "kind": "GitRepository",
        "metadata": {"name": "podinfo", "namespace": "flux-system"},
        "spec": {"url": "https://github.com/stefanprodan/podinfo.git", "interval": "1m"}
    });

    let created = admit(
        &router,
        "/mutate/flux-gitrepository",
        review(FLUX_GIT, "gitrepositories", "CREATE", &object),
    )
    .await;
    assert_eq!(created["allowed"], json!(true));
    assert_eq!(created["uid"], json!("gitrepository-create"));
    assert_eq!(created["patchType"], json!("JSONPatch"));

    apply(&mut object, &created);
    assert_eq!(
        object["spec"]["url"],
        json!(format!(
            "{}/zarf-git-user/podinfo-{}.git",
            GIT_SERVER,
            checksum("https://github.com/stefanprodan/podinfo")
        ))
    );
    assert_eq!(object["spec"]["secretRef"], json!({"name": "private-git-server"}));
    assert_eq!(object["metadata"]["labels"]["zarf-agent"], json!("patched"));

    let updated = admit(
        &router,
        "/mutate",
        review(FLUX_GIT, "gitrepositories", "UPDATE", &object),
    )
    .await;
    assert_eq!(updated["allowed"], json!(true));
    assert!(updated.get("patch").is_none());
}

/// Story: pods pull from the node port, controllers reach the Service
#[tokio::test]
async fn story_pods_and_helm_repositories_use_their_own_registry_address() {
    let router = router(Some(mirror()));

    let mut pod = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": "podinfo", "namespace": "apps"},
        "spec": {"containers": [{"name": "app", "image": "ghcr.io/stefanprodan/podinfo:6.4.0"}]}
    });
    let response = admit(&router, "/mutate", review(POD, "pods", "CREATE", &pod)).await;
    apply(&mut pod, &response);
    assert!(pod["spec"]["containers"][0]["image"]
        .as_str()
        .unwrap()
        .starts_with("127.0.0.1:31999/stefanprodan/podinfo:6.4.0-zarf-"));
    assert_eq!(pod["spec"]["imagePullSecrets"], json!([{"name": "private-registry"}]));

    let mut helm = json!({
        "apiVersion": "source.toolkit.fluxcd.io/v1",
        "kind": "HelmRepository",
        "metadata": {"name": "podinfo", "namespace": "flux-system"},
        "spec": {"type": "oci", "url": "oci://ghcr.io/stefanprodan/charts"}
    });
    let response = admit(
        &router,
        "/mutate",
        review(FLUX_HELM, "helmrepositories", "CREATE", &helm),
    )
    .await;
    apply(&mut helm, &response);
    assert_eq!(
        helm["spec"]["url"],
        json!(format!("oci://{}/stefanprodan/charts", REGISTRY_SERVICE))
    );
    assert_eq!(helm["spec"]["insecure"], json!(true));
}

/// Story: a pod whose images already sit on the mirror still gets the
/// pull secret and the provenance label
#[tokio::test]
async fn story_mirrored_pod_is_still_labelled() {
    let router = router(Some(mirror()));
    let image = format!("{}/stefanprodan/podinfo:6.4.0-zarf-0a1b2c3d", NODE_PORT_REGISTRY);
    let mut pod = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": "podinfo", "namespace": "apps"},
        "spec": {"containers": [{"name": "app", "image": image}]}
    });
    let response = admit(&router, "/mutate", review(POD, "pods", "CREATE", &pod)).await;
    assert_eq!(response["allowed"], json!(true));

    apply(&mut pod, &response);
    assert_eq!(pod["spec"]["containers"][0]["image"], json!(image));
    assert_eq!(pod["spec"]["imagePullSecrets"], json!([{"name": "private-registry"}]));
    assert_eq!(pod["metadata"]["labels"]["zarf-agent"], json!("patched"));
}

/// Story: without a mirror configuration nothing is admitted unmirrored
#[tokio::test]
async fn story_missing_state_denies() {
    let router = router(None);
    let pod = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": "podinfo", "namespace": "apps"},
        "spec": {"containers": [{"name": "app", "image": "nginx:1.25"}]}
    });
    let response = admit(&router, "/mutate", review(POD, "pods", "CREATE", &pod)).await;
    assert_eq!(response["allowed"], json!(false));
    assert!(response["status"]["message"]
        .as_str()
        .unwrap()
        .contains("zarf/zarf-state"));
}

#[tokio::test]
async fn test_http_helm_repository_is_allowed_with_warning() {
    let router = router(Some(mirror()));
    let helm = json!({
        "apiVersion": "source.toolkit.fluxcd.io/v1",
        "kind": "HelmRepository",
        "metadata": {"name": "podinfo", "namespace": "flux-system"},
        "spec": {"url": "https://stefanprodan.github.io/podinfo"}
    });
    let response = admit(
        &router,
        "/mutate/flux-helmrepository",
        review(FLUX_HELM, "helmrepositories", "CREATE", &helm),
    )
    .await;
    assert_eq!(response["allowed"], json!(true));
    assert!(response.get("patch").is_none());
    assert_eq!(response["warnings"].as_array().unwrap().len(), 1);
}
