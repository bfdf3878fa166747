//! Flux HelmRepository mutation
//!
//! Only OCI helm repositories live in the mirror registry. HTTP index
//! repositories (`type: default` or unset) are admitted unchanged with a
//! warning.

use async_trait::async_trait;
use jsonptr::PointerBuf;
use serde::Deserialize;
use tracing::{debug, info, warn};
use zarf_common::Error;

use super::{
    decode, Hook, HookDeps, HookRequest, HookResult, FLUX_SOURCE_GROUP, FLUX_SOURCE_VERSIONS,
};
use crate::context::RequestContext;
use crate::guard::should_mutate;
use crate::patch::{build, PatchTarget, SecretKind, SecretShape};

const KIND: &str = "HelmRepository";

/// Discriminant only: decoded before the full shape
#[derive(Deserialize)]
struct HelmRepositoryType {
    #[serde(default)]
    spec: HelmRepositoryTypeSpec,
}

#[derive(Deserialize, Default)]
struct HelmRepositoryTypeSpec {
    #[serde(rename = "type", default)]
    repo_type: Option<String>,
}

#[derive(Deserialize)]
struct OciHelmRepository {
    spec: OciHelmRepositorySpec,
}

#[derive(Deserialize)]
struct OciHelmRepositorySpec {
    url: String,
}

/// Points Flux OCI helm repositories at the mirror registry
pub struct FluxHelmRepositoryHook {
    deps: HookDeps,
}

impl FluxHelmRepositoryHook {
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

        let discriminant: HelmRepositoryType = decode(KIND, object)?;
        let repo_type = discriminant.spec.repo_type.unwrap_or_default();
        if !repo_type.eq_ignore_ascii_case("oci") {
            warn!(
                uid = %ctx.uid(),
                name = %request.name,
                repo_type = %repo_type,
                "Skipping non-OCI HelmRepository"
            );
            return Ok(HookResult::allow_with_warning(format!(
                "HelmRepository {} is not of type oci and was not mutated",
                request.name
            )));
        }

        let repo: OciHelmRepository = decode(KIND, object)?;
        let url = repo.spec.url.as_str();
        let mirror = self.deps.state.load(ctx).await?;
        let registry = self
            .deps
            .state
            .resolve_reachable_address(ctx, &mirror.registry_address)
            .await?;

        if !should_mutate(&request.operation, url, &registry) {
            debug!(
                uid = %ctx.uid(),
                name = %request.name,
                url = %url,
                "HelmRepository already points at the mirror"
            );
            return Ok(HookResult::allow());
        }

        let rewritten = self.deps.transformer.oci_url(&registry, url)?;
        info!(
            uid = %ctx.uid(),
            name = %request.name,
            namespace = request.namespace.unwrap_or_default(),
            registry = %registry,
            original = %url,
            mutated = %rewritten,
            "Mutating Flux HelmRepository URL"
        );

        let target = PatchTarget::new(object)
            .replace(PointerBuf::from_tokens(["spec", "url"]), rewritten)
            .insecure(PointerBuf::from_tokens(["spec", "insecure"]))
            .secret(
                PointerBuf::from_tokens(["spec", "secretRef"]),
                SecretKind::Registry,
                SecretShape::Object,
            );
        Ok(HookResult::patched(build(&target, &mirror)?))
    }
}

#[async_trait]
impl Hook for FluxHelmRepositoryHook {
    fn name(&self) -> &'static str {
        "flux-helmrepository"
    }

    fn kind(&self) -> &'static str {
        KIND
    }

    fn group(&self) -> &'static str {
        FLUX_SOURCE_GROUP
    }

    fn versions(&self) -> &'static [&'static str] {
        FLUX_SOURCE_VERSIONS
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
