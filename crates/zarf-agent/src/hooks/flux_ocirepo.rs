//! Flux OCIRepository mutation
//!
//! Besides the URL, the artifact tag is rewritten the same way image tags
//! are, so the artifact is found under the tag it was mirrored with. Digest
//! references already pin the content and are kept.

use async_trait::async_trait;
use jsonptr::PointerBuf;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use zarf_common::Error;
use zarf_transform::{ReferenceEncoding, DEFAULT_TAG};

use super::{
    decode, Hook, HookDeps, HookRequest, HookResult, FLUX_SOURCE_GROUP, FLUX_SOURCE_VERSIONS,
};
use crate::context::RequestContext;
use crate::guard::should_mutate;
use crate::patch::{build, PatchTarget, SecretKind, SecretShape};

const KIND: &str = "OCIRepository";

#[derive(Deserialize)]
struct OciRepositoryShape {
    spec: OciRepositorySpec,
}

#[derive(Deserialize)]
struct OciRepositorySpec {
    url: String,
    #[serde(rename = "ref", default)]
    reference: Option<OciRepositoryRef>,
}

#[derive(Deserialize, Default)]
struct OciRepositoryRef {
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    semver: Option<String>,
    #[serde(default)]
    digest: Option<String>,
}

/// Points Flux OCI artifact sources at the mirror registry
pub struct FluxOciRepositoryHook {
    deps: HookDeps,
}

impl FluxOciRepositoryHook {
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
        let repo: OciRepositoryShape = decode(KIND, object)?;
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
                "OCIRepository already points at the mirror"
            );
            return Ok(HookResult::allow());
        }

        let rewritten = self.deps.transformer.oci_url(&registry, url)?;
        let mut target = PatchTarget::new(object)
            .replace(PointerBuf::from_tokens(["spec", "url"]), rewritten.clone());
        let mut warnings = Vec::new();

        // An object created from an already mirrored manifest keeps its tag
        if rewritten != url {
            let reference = repo.spec.reference.unwrap_or_default();
            let checksum_encoding = self.deps.transformer.encoding() == ReferenceEncoding::Checksum;
            if reference.digest.is_some() {
                // pinned by content
            } else if let (None, Some(semver)) = (&reference.tag, &reference.semver) {
                if checksum_encoding {
                    warn!(
                        uid = %ctx.uid(),
                        name = %request.name,
                        semver = %semver,
                        "Semver ref cannot match checksum tags"
                    );
                    warnings.push(format!(
                        "OCIRepository {} uses a semver ref; mirrored tags carry a checksum \
                         suffix and may not match",
                        request.name
                    ));
                }
            } else {
                let tag = reference.tag.as_deref().unwrap_or(DEFAULT_TAG);
                let mirrored_tag = self.deps.transformer.oci_tag(url, tag)?;
                if mirrored_tag != tag || reference.tag.is_none() {
                    target = target.set(
                        PointerBuf::from_tokens(["spec", "ref"]),
                        ref_with_tag(object, &mirrored_tag),
                    );
                }
            }
        }

        info!(
            uid = %ctx.uid(),
            name = %request.name,
            namespace = request.namespace.unwrap_or_default(),
            registry = %registry,
            original = %url,
            mutated = %rewritten,
            "Mutating Flux OCIRepository URL"
        );

        let target = target
            .insecure(PointerBuf::from_tokens(["spec", "insecure"]))
            .secret(
                PointerBuf::from_tokens(["spec", "secretRef"]),
                SecretKind::Registry,
                SecretShape::Object,
            );
        Ok(HookResult::patched(build(&target, &mirror)?).with_warnings(warnings))
    }
}

/// The object's `spec.ref` with `tag` replaced, other keys kept
fn ref_with_tag(object: &Value, tag: &str) -> Value {
    let mut reference = match object.pointer("/spec/ref") {
        Some(Value::Object(existing)) => existing.clone(),
        _ => Map::new(),
    };
    reference.insert("tag".to_string(), Value::String(tag.to_string()));
    Value::Object(reference)
}

#[async_trait]
impl Hook for FluxOciRepositoryHook {
    fn name(&self) -> &'static str {
        "flux-ocirepository"
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
