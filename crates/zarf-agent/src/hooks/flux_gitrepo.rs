//! Flux GitRepository mutation

use async_trait::async_trait;
use jsonptr::PointerBuf;
use serde::Deserialize;
use tracing::{debug, info};
use zarf_common::Error;

use super::{
    decode, Hook, HookDeps, HookRequest, HookResult, FLUX_SOURCE_GROUP, FLUX_SOURCE_VERSIONS,
};
use crate::context::RequestContext;
use crate::guard::should_mutate;
use crate::patch::{build, PatchTarget, SecretKind, SecretShape};

const KIND: &str = "GitRepository";

#[derive(Deserialize)]
struct GitRepositoryShape {
    spec: GitRepositorySpec,
}

#[derive(Deserialize)]
struct GitRepositorySpec {
    url: String,
}

/// Points Flux git sources at the mirror git server
pub struct FluxGitRepositoryHook {
    deps: HookDeps,
}

impl FluxGitRepositoryHook {
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
        let repo: GitRepositoryShape = decode(KIND, object)?;
        let mirror = self.deps.state.load(ctx).await?;
        let url = repo.spec.url.as_str();

        if !should_mutate(&request.operation, url, &mirror.git_address) {
            debug!(
                uid = %ctx.uid(),
                name = %request.name,
                url = %url,
                "GitRepository already points at the mirror"
            );
            return Ok(HookResult::allow());
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
            "Mutating Flux GitRepository URL"
        );

        let target = PatchTarget::new(object)
            .replace(PointerBuf::from_tokens(["spec", "url"]), rewritten)
            .secret(
                PointerBuf::from_tokens(["spec", "secretRef"]),
                SecretKind::Git,
                SecretShape::Object,
            );
        Ok(HookResult::patched(build(&target, &mirror)?))
    }
}

#[async_trait]
impl Hook for FluxGitRepositoryHook {
    fn name(&self) -> &'static str {
        "flux-gitrepository"
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
