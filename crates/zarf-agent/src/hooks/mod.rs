//! Mutation hooks, one per resource kind
//!
//! A hook decodes the admitted object into the few fields it cares about,
//! loads the mirror configuration, asks the idempotency guard whether the
//! reference still points upstream, rewrites it and hands the result to the
//! patch builder. Capabilities a kind doesn't need keep the pass-through
//! defaults of [`Hook`].

mod argocd_application;
mod flux_gitrepo;
mod flux_helmrepo;
mod flux_ocirepo;
mod pod;

pub use argocd_application::ArgoApplicationHook;
pub use flux_gitrepo::FluxGitRepositoryHook;
pub use flux_helmrepo::FluxHelmRepositoryHook;
pub use flux_ocirepo::FluxOciRepositoryHook;
pub use pod::PodHook;

use std::sync::Arc;

use async_trait::async_trait;
use json_patch::PatchOperation;
use kube::core::admission::Operation;
use serde::de::DeserializeOwned;
use serde_json::Value;
use zarf_common::{Error, AGENT_IGNORE_LABEL_KEY, AGENT_IGNORE_LABEL_VALUE};
use zarf_transform::Transformer;

use crate::context::RequestContext;
use crate::state::StateProvider;

/// Flux source-controller API group
pub const FLUX_SOURCE_GROUP: &str = "source.toolkit.fluxcd.io";

/// Flux source API versions the hooks are registered for
pub const FLUX_SOURCE_VERSIONS: &[&str] = &["v1", "v1beta2"];

/// Outcome of a hook for one request
///
/// A denied result never carries patches.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HookResult {
    allowed: bool,
    patches: Vec<PatchOperation>,
    warnings: Vec<String>,
    message: Option<String>,
}

impl HookResult {
    /// Allow the object unchanged
    pub fn allow() -> Self {
        Self {
            allowed: true,
            ..Default::default()
        }
    }

    /// Allow the object unchanged and tell the client why
    pub fn allow_with_warning(warning: impl Into<String>) -> Self {
        Self::allow().with_warning(warning)
    }

    /// Allow the object with `patches` applied
    pub fn patched(patches: Vec<PatchOperation>) -> Self {
        Self {
            allowed: true,
            patches,
            ..Default::default()
        }
    }

    /// Reject the object
    pub fn deny(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Add a warning returned to the client
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Add several warnings
    pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// Whether the object is admitted
    pub fn allowed(&self) -> bool {
        self.allowed
    }

    /// Ordered patch operations
    pub fn patches(&self) -> &[PatchOperation] {
        &self.patches
    }

    /// Warnings for the client
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Denial reason
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// The parts of an admission request a hook reads
#[derive(Clone, Debug)]
pub struct HookRequest<'a> {
    /// Operation being admitted
    pub operation: Operation,
    /// Object as it will be stored (absent on delete)
    pub object: Option<&'a Value>,
    /// Namespace of the object
    pub namespace: Option<&'a str>,
    /// Name of the object, empty for generated names
    pub name: &'a str,
}

impl<'a> HookRequest<'a> {
    /// The object being admitted, required for create and update
    pub fn object(&self, kind: &str) -> Result<&'a Value, Error> {
        self.object
            .ok_or_else(|| Error::decode_for_kind(kind, "request carries no object"))
    }
}

/// Mutation policy for one resource kind
#[async_trait]
pub trait Hook: Send + Sync {
    /// Route alias under `/mutate/{name}`
    fn name(&self) -> &'static str;

    /// Resource kind this hook handles
    fn kind(&self) -> &'static str;

    /// API group of the kind (`""` for core)
    fn group(&self) -> &'static str;

    /// Served versions the hook is registered under
    fn versions(&self) -> &'static [&'static str];

    /// Admission of a new object
    async fn on_create(
        &self,
        _ctx: &RequestContext,
        _request: &HookRequest<'_>,
    ) -> Result<HookResult, Error> {
        Ok(HookResult::allow())
    }

    /// Admission of a changed object
    async fn on_update(
        &self,
        _ctx: &RequestContext,
        _request: &HookRequest<'_>,
    ) -> Result<HookResult, Error> {
        Ok(HookResult::allow())
    }

    /// Admission of a deletion
    async fn on_delete(
        &self,
        _ctx: &RequestContext,
        _request: &HookRequest<'_>,
    ) -> Result<HookResult, Error> {
        Ok(HookResult::allow())
    }
}

/// What every hook needs besides the request
#[derive(Clone)]
pub struct HookDeps {
    /// Mirror configuration and address resolution
    pub state: Arc<dyn StateProvider>,
    /// Reference rewriting
    pub transformer: Transformer,
}

/// All hooks the agent serves
pub fn all_hooks(deps: &HookDeps) -> Vec<Arc<dyn Hook>> {
    vec![
        Arc::new(PodHook::new(deps.clone())),
        Arc::new(FluxGitRepositoryHook::new(deps.clone())),
        Arc::new(FluxHelmRepositoryHook::new(deps.clone())),
        Arc::new(FluxOciRepositoryHook::new(deps.clone())),
        Arc::new(ArgoApplicationHook::new(deps.clone())),
    ]
}

/// Whether the object opted out of mutation with `zarf.dev/agent: ignore`
pub fn is_opted_out(object: &Value) -> bool {
    object
        .pointer("/metadata/labels")
        .and_then(|labels| labels.get(AGENT_IGNORE_LABEL_KEY))
        .and_then(Value::as_str)
        == Some(AGENT_IGNORE_LABEL_VALUE)
}

/// Decode `object` into the shape a hook reads
pub(crate) fn decode<T: DeserializeOwned>(kind: &str, object: &Value) -> Result<T, Error> {
    T::deserialize(object).map_err(|e| Error::decode_for_kind(kind, e.to_string()))
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Shared fixtures for hook tests

    use std::sync::Arc;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;
    use zarf_common::MirrorConfig;
    use zarf_transform::{ReferenceEncoding, Transformer};

    use super::HookDeps;
    use crate::context::RequestContext;
    use crate::state::MockStateProvider;

    pub fn mirror(registry: &str, internal: bool) -> MirrorConfig {
        MirrorConfig {
            registry_address: registry.to_string(),
            registry_internal: internal,
            registry_pull_secret_name: "private-registry".to_string(),
            git_address: "http://zarf-gitea-http.zarf.svc.cluster.local:3000".to_string(),
            git_push_username: "zarf-git-user".to_string(),
            git_pull_secret_name: "private-git-server".to_string(),
        }
    }

    /// State provider returning `mirror` and resolving addresses with `resolve`
    pub fn state_with(
        mirror: MirrorConfig,
        resolve: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> MockStateProvider {
        let mirror = Arc::new(mirror);
        let mut state = MockStateProvider::new();
        state
            .expect_load()
            .returning(move |_| Ok(mirror.clone()));
        state
            .expect_resolve_reachable_address()
            .returning(move |_, raw| Ok(resolve(raw)));
        state
    }

    pub fn deps(state: MockStateProvider) -> HookDeps {
        HookDeps {
            state: Arc::new(state),
            transformer: Transformer::new(ReferenceEncoding::Checksum),
        }
    }

    pub fn ctx() -> RequestContext {
        RequestContext::new(
            "test-uid",
            Duration::from_secs(10),
            Duration::from_secs(3),
            CancellationToken::new(),
            tracing::Span::none(),
        )
    }
}
