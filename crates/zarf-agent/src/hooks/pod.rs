//! Pod image mutation
//!
//! Images are pulled by the kubelet on the node, so the registry address is
//! used as stored in the state (usually a node port on localhost) without
//! Service resolution. Images already on the mirror are not replaced, but
//! every new pod gets the pull secret and the provenance label.

use async_trait::async_trait;
use jsonptr::PointerBuf;
use serde::Deserialize;
use tracing::{debug, info};
use zarf_common::Error;

use super::{decode, Hook, HookDeps, HookRequest, HookResult};
use crate::context::RequestContext;
use crate::patch::{build, PatchTarget, SecretKind, SecretShape};

const KIND: &str = "Pod";

#[derive(Deserialize)]
struct PodShape {
    spec: PodSpecShape,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodSpecShape {
    #[serde(default)]
    containers: Vec<ContainerShape>,
    #[serde(default)]
    init_containers: Vec<ContainerShape>,
    #[serde(default)]
    ephemeral_containers: Vec<ContainerShape>,
}

#[derive(Deserialize)]
struct ContainerShape {
    #[serde(default)]
    image: Option<String>,
}

/// Rewrites container images of new pods
pub struct PodHook {
    deps: HookDeps,
}

impl PodHook {
    /// Create the hook
    pub fn new(deps: HookDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Hook for PodHook {
    fn name(&self) -> &'static str {
        "pod"
    }

    fn kind(&self) -> &'static str {
        KIND
    }

    fn group(&self) -> &'static str {
        ""
    }

    fn versions(&self) -> &'static [&'static str] {
        &["v1"]
    }

    async fn on_create(
        &self,
        ctx: &RequestContext,
        request: &HookRequest<'_>,
    ) -> Result<HookResult, Error> {
        let object = request.object(KIND)?;
        let pod: PodShape = decode(KIND, object)?;
        let mirror = self.deps.state.load(ctx).await?;
        let registry = mirror.registry_address.as_str();

        let groups = [
            ("containers", &pod.spec.containers),
            ("initContainers", &pod.spec.init_containers),
            ("ephemeralContainers", &pod.spec.ephemeral_containers),
        ];

        let mut target = PatchTarget::new(object);
        for (field, containers) in groups {
            for (i, container) in containers.iter().enumerate() {
                let Some(image) = container.image.as_deref() else {
                    continue;
                };
                let rewritten = self.deps.transformer.image(registry, image)?;
                if rewritten == image {
                    continue;
                }
                debug!(
                    uid = %ctx.uid(),
                    original = %image,
                    mutated = %rewritten,
                    "Rewriting image"
                );
                let index = i.to_string();
                target = target.replace(
                    PointerBuf::from_tokens(["spec", field, index.as_str(), "image"]),
                    rewritten,
                );
            }
        }

        let replaced = target.reference_count();
        let target = target.secret(
            PointerBuf::from_tokens(["spec", "imagePullSecrets"]),
            SecretKind::Registry,
            SecretShape::List,
        );
        let patches = build(&target, &mirror)?;
        info!(
            uid = %ctx.uid(),
            name = %request.name,
            namespace = request.namespace.unwrap_or_default(),
            registry = %registry,
            images = replaced,
            "Mutating pod images"
        );
        Ok(HookResult::patched(patches))
    }
}
