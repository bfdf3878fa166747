//! Argo CD Application mutation
//!
//! Git sources move to the mirror git server. Credentials come from the
//! repository secrets Argo CD keeps in its own namespace, so only the
//! `repoURL` fields are patched. Helm chart and OCI sources are left alone.

use async_trait::async_trait;
use jsonptr::PointerBuf;
use serde::Deserialize;
use tracing::{debug, info, warn};
use zarf_common::Error;
use zarf_transform::ReferenceKind;

use super::{decode, Hook, HookDeps, HookRequest, HookResult};
use crate::context::RequestContext;
use crate::guard::should_mutate;
use crate::patch::{build, PatchTarget};

const KIND: &str = "Application";

#[derive(Deserialize)]
struct ApplicationShape {
    spec: ApplicationSpec,
}

#[derive(Deserialize)]
struct ApplicationSpec {
    #[serde(default)]
    source: Option<ApplicationSource>,
    #[serde(default)]
    sources: Vec<ApplicationSource>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationSource {
    #[serde(rename = "repoURL", default)]
    repo_url: Option<String>,
    #[serde(default)]
    chart: Option<String>,
}

/// Points Argo CD git sources at the mirror git server
pub struct ArgoApplicationHook {
    deps: HookDeps,
}

impl ArgoApplicationHook {
    /// Create the hook
    pub fn new(deps: HookDeps) -> Self {
        Self { deps }
    }

    async fn mutate(
        &self,
        ctx: &RequestContext,
        request: &HookRequest<'_>,
    ) -> Result<HookResult, Error> {
        let object = request.object(KIND)?;
        let app: ApplicationShape = decode(KIND, object)?;

        let sources = app
            .spec
            .source
            .iter()
            .map(|source| (PointerBuf::from_tokens(["spec", "source", "repoURL"]), source))
            .chain(app.spec.sources.iter().enumerate().map(|(i, source)| {
                let index = i.to_string();
                (
                    PointerBuf::from_tokens(["spec", "sources", index.as_str(), "repoURL"]),
                    source,
                )
            }));

        let mirror = self.deps.state.load(ctx).await?;
        let mut target = PatchTarget::new(object);
        let mut warnings = Vec::new();

        for (path, source) in sources {
            let Some(url) = source.repo_url.as_deref() else {
                continue;
            };
            if source.chart.is_some() || ReferenceKind::of(url) != ReferenceKind::Git {
                warn!(
                    uid = %ctx.uid(),
                    name = %request.name,
                    url = %url,
                    "Skipping non-git Application source"
                );
                warnings.push(format!(
                    "Application {} source {} is not a git repository and was not mutated",
                    request.name, url
                ));
                continue;
            }
            if !should_mutate(&request.operation, url, &mirror.git_address) {
                continue;
            }

            let rewritten =
                self.deps
                    .transformer
                    .git_url(&mirror.git_address, &mirror.git_push_username, url)?;
            info!(
                uid = %ctx.uid(),
                name = %request.name,
                namespace = request.namespace.unwrap_or_default(),
                original = %url,
                mutated = %rewritten,
                "Mutating Argo CD Application source"
            );
            target = target.replace(path, rewritten);
        }

        if target.reference_count() == 0 {
            debug!(uid = %ctx.uid(), name = %request.name, "No Application source to mutate");
            return Ok(HookResult::allow().with_warnings(warnings));
        }
        Ok(HookResult::patched(build(&target, &mirror)?).with_warnings(warnings))
    }
}

#[async_trait]
impl Hook for ArgoApplicationHook {
    fn name(&self) -> &'static str {
        "argocd-application"
    }

    fn kind(&self) -> &'static str {
        KIND
    }

    fn group(&self) -> &'static str {
        "argoproj.io"
    }

    fn versions(&self) -> &'static [&'static str] {
        &["v1alpha1"]
    }

    async fn on_create(
        &self,
        ctx: &RequestContext,
        request: &HookRequest<'_>,
    ) -> Result<HookResult, Error> {
        self.mutate(ctx, request).await
    }

    async fn on_update(
        &self,
        ctx: &RequestContext,
        request: &HookRequest<'_>,
    ) -> Result<HookResult, Error> {
        self.mutate(ctx, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::test_support::{ctx, deps, mirror, state_with};
    use kube::core::admission::Operation;
    use serde_json::{json, Value};
    use zarf_transform::checksum;

    const GIT_MIRROR: &str = "http://zarf-gitea-http.zarf.svc.cluster.local:3000/zarf-git-user";

    fn hook() -> ArgoApplicationHook {
        ArgoApplicationHook::new(deps(state_with(mirror("127.0.0.1:31999", true), str::to_string)))
    }

    fn application(spec: Value) -> Value {
        json!({
            "apiVersion": "argoproj.io/v1alpha1",
            "kind": "Application",
            "metadata": {"name": "podinfo", "namespace": "argocd", "labels": {"team": "apps"}},
            "spec": spec
        })
    }

    fn request(operation: Operation, object: &Value) -> HookRequest<'_> {
        HookRequest {
            operation,
            object: Some(object),
            namespace: Some("argocd"),
            name: "podinfo",
        }
    }

    /// Story: a single git source is mirrored, credentials are left to Argo CD
    #[tokio::test]
    async fn story_single_source_round_trip() {
        let hook = hook();
        let mut object = application(json!({
            "project": "default",
            "source": {
                "repoURL": "https://github.com/stefanprodan/podinfo.git",
                "path": "kustomize"
            }
        }));

        let created = hook
            .on_create(&ctx(), &request(Operation::Create, &object))
            .await
            .unwrap();
        // repoURL and label only
        assert_eq!(created.patches().len(), 2);

        json_patch::patch(&mut object, created.patches()).unwrap();
        assert_eq!(
            object["spec"]["source"]["repoURL"],
            json!(format!(
                "{}/podinfo-{}.git",
                GIT_MIRROR,
                checksum("https://github.com/stefanprodan/podinfo")
            ))
        );
        assert_eq!(object["metadata"]["labels"], json!({"team": "apps", "zarf-agent": "patched"}));

        let updated = hook
            .on_update(&ctx(), &request(Operation::Update, &object))
            .await
            .unwrap();
        assert_eq!(updated, HookResult::allow());
    }

    #[tokio::test]
    async fn test_multi_source_skips_helm_and_oci() {
        let mut object = application(json!({
            "sources": [
                {"repoURL": "https://github.com/stefanprodan/podinfo.git", "path": "kustomize"},
                {
                    "repoURL": "https://stefanprodan.github.io/podinfo",
                    "chart": "podinfo",
                    "targetRevision": "6.4.0"
                },
                {"repoURL": "oci://ghcr.io/stefanprodan/charts/podinfo"},
                {"ref": "values"}
            ]
        }));
        let result = hook()
            .on_create(&ctx(), &request(Operation::Create, &object))
            .await
            .unwrap();
        assert_eq!(result.warnings().len(), 2);

        json_patch::patch(&mut object, result.patches()).unwrap();
        assert!(object["spec"]["sources"][0]["repoURL"]
            .as_str()
            .unwrap()
            .starts_with(GIT_MIRROR));
        assert_eq!(
            object["spec"]["sources"][1]["repoURL"],
            json!("https://stefanprodan.github.io/podinfo")
        );
        assert_eq!(
            object["spec"]["sources"][2]["repoURL"],
            json!("oci://ghcr.io/stefanprodan/charts/podinfo")
        );
    }

    #[tokio::test]
    async fn test_helm_only_application_is_allowed_with_warning() {
        let object = application(json!({
            "source": {"repoURL": "https://stefanprodan.github.io/podinfo", "chart": "podinfo"}
        }));
        let result = hook()
            .on_create(&ctx(), &request(Operation::Create, &object))
            .await
            .unwrap();
        assert!(result.allowed());
        assert!(result.patches().is_empty());
        assert_eq!(result.warnings().len(), 1);
    }

    #[tokio::test]
    async fn test_update_mutates_only_upstream_sources() {
        let mirrored = format!("{}/podinfo-0a1b2c3d.git", GIT_MIRROR);
        let object = application(json!({
            "sources": [
                {"repoURL": mirrored},
                {"repoURL": "https://github.com/fluxcd/flux2-kustomize-helm-example.git"}
            ]
        }));
        let result = hook()
            .on_update(&ctx(), &request(Operation::Update, &object))
            .await
            .unwrap();
        // one repoURL and label
        assert_eq!(result.patches().len(), 2);
    }

    #[tokio::test]
    async fn test_application_without_spec_is_decode_error() {
        let object = json!({"metadata": {"name": "podinfo"}});
        let err = hook()
            .on_create(&ctx(), &request(Operation::Create, &object))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode { ref kind, .. } if kind == "Application"));
    }
}
