//! Mirror configuration and address resolution for hooks
//!
//! [`StateProvider`] is the only way hooks reach outside the process. The
//! cluster implementation reads the Zarf state through a [`StateBackend`] and
//! Services through a [`ServiceLookup`], caching both for a configurable TTL.
//! Every call is bounded by the request's lookup budget.

mod backend;
mod cache;
mod service;

pub use backend::{FileStateBackend, SecretStateBackend, StateBackend};
pub use service::{
    is_node_port_address, resolve_node_port_address, KubeServiceLookup, ServiceLookup,
};

#[cfg(test)]
pub use backend::MockStateBackend;
#[cfg(test)]
pub use service::MockServiceLookup;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, warn};
use zarf_common::metrics::record_state_load;
use zarf_common::{Error, MirrorConfig, PullSecretNames};

use crate::context::RequestContext;
use cache::TtlCache;

/// Mirror configuration and address resolution as seen by hooks
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StateProvider: Send + Sync {
    /// Current mirror configuration
    async fn load(&self, ctx: &RequestContext) -> Result<Arc<MirrorConfig>, Error>;

    /// Address reachable from inside the cluster for `raw`
    ///
    /// Node port addresses resolve to their Service's DNS name; anything else
    /// comes back unchanged.
    async fn resolve_reachable_address(
        &self,
        ctx: &RequestContext,
        raw: &str,
    ) -> Result<String, Error>;
}

/// [`StateProvider`] backed by the cluster
pub struct ClusterStateProvider {
    backend: Arc<dyn StateBackend>,
    services: Arc<dyn ServiceLookup>,
    pull_secrets: PullSecretNames,
    state_cache: TtlCache<Arc<MirrorConfig>>,
    service_cache: TtlCache<Arc<Vec<Service>>>,
}

impl ClusterStateProvider {
    /// Create a provider; a zero TTL disables the matching cache
    pub fn new(
        backend: Arc<dyn StateBackend>,
        services: Arc<dyn ServiceLookup>,
        pull_secrets: PullSecretNames,
        state_ttl: Duration,
        service_ttl: Duration,
    ) -> Self {
        Self {
            backend,
            services,
            pull_secrets,
            state_cache: TtlCache::new(state_ttl),
            service_cache: TtlCache::new(service_ttl),
        }
    }

    async fn services(
        &self,
        ctx: &RequestContext,
        address: &str,
    ) -> Result<Arc<Vec<Service>>, Error> {
        if let Some(services) = self.service_cache.get() {
            return Ok(services);
        }

        let listed = ctx
            .bounded(self.services.list_services(), |msg| {
                Error::service_resolution(address, msg)
            })
            .await
            .map_err(|e| match e {
                Error::ServiceResolution { .. } => e,
                other => Error::service_resolution(address, other.to_string()),
            })?;

        let services = Arc::new(listed);
        self.service_cache.put(services.clone());
        Ok(services)
    }
}

#[async_trait]
impl StateProvider for ClusterStateProvider {
    async fn load(&self, ctx: &RequestContext) -> Result<Arc<MirrorConfig>, Error> {
        if let Some(mirror) = self.state_cache.get() {
            return Ok(mirror);
        }

        let source = self.backend.source();
        let result = ctx
            .bounded(self.backend.read(), |msg| Error::state_load_from(source, msg))
            .await;
        record_state_load(source, result.is_ok());
        let state = result.inspect_err(|e| {
            warn!(uid = %ctx.uid(), source, error = %e, "Failed to load cluster state");
        })?;

        if state.registry_info.address.trim().is_empty() {
            return Err(Error::state_load_from(source, "state has no registry address"));
        }

        let mirror = Arc::new(MirrorConfig::from_state(&state, &self.pull_secrets));
        debug!(
            uid = %ctx.uid(),
            source,
            registry = %mirror.registry_address,
            git = %mirror.git_address,
            "Loaded cluster state"
        );
        self.state_cache.put(mirror.clone());
        Ok(mirror)
    }

    async fn resolve_reachable_address(
        &self,
        ctx: &RequestContext,
        raw: &str,
    ) -> Result<String, Error> {
        if !is_node_port_address(raw) {
            return Ok(raw.to_string());
        }

        let services = self.services(ctx, raw).await?;
        match resolve_node_port_address(&services, raw) {
            Some(resolved) => {
                debug!(
                    uid = %ctx.uid(),
                    address = %raw,
                    resolved = %resolved,
                    "Resolved node port address"
                );
                Ok(resolved)
            }
            None => Ok(raw.to_string()),
        }
    }
}
