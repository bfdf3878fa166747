//! NodePort address resolution
//!
//! The registry address in the state is what the container runtime uses:
//! usually `127.0.0.1:<nodePort>`, which only works from the node itself.
//! Controllers running in pods (Flux source-controller) need the Service's
//! cluster DNS name instead.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::ListParams;
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use zarf_common::Error;

/// Lists the Services a node port address may belong to
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceLookup: Send + Sync {
    /// List Services in all namespaces
    async fn list_services(&self) -> Result<Vec<Service>, Error>;
}

/// [`ServiceLookup`] backed by the Kubernetes API
pub struct KubeServiceLookup {
    api: Api<Service>,
}

impl KubeServiceLookup {
    /// Create a lookup using `client`
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl ServiceLookup for KubeServiceLookup {
    async fn list_services(&self) -> Result<Vec<Service>, Error> {
        let list = self.api.list(&ListParams::default()).await?;
        Ok(list.items)
    }
}

/// A raw address split around its node port
struct NodePortAddress<'a> {
    scheme: Option<&'a str>,
    node_port: i32,
    tail: &'a str,
}

/// Parse `[scheme://]{127.0.0.1|localhost}:port[/path]`
///
/// Anything else cannot be a node port address and is never looked up.
fn parse_node_port_address(raw: &str) -> Option<NodePortAddress<'_>> {
    let (scheme, rest) = match raw.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, raw),
    };
    let (authority, tail) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    let (host, port) = authority.rsplit_once(':')?;
    if host != "127.0.0.1" && !host.eq_ignore_ascii_case("localhost") {
        return None;
    }
    let node_port = port.parse().ok()?;
    Some(NodePortAddress {
        scheme,
        node_port,
        tail,
    })
}

/// Whether resolving `raw` needs a Service lookup at all
pub fn is_node_port_address(raw: &str) -> bool {
    parse_node_port_address(raw).is_some()
}

/// Map a node port address onto the in-cluster address of its Service
///
/// Returns `None` when `raw` is not a node port address or no `NodePort`
/// Service exposes that port.
pub fn resolve_node_port_address(services: &[Service], raw: &str) -> Option<String> {
    let address = parse_node_port_address(raw)?;

    services.iter().find_map(|svc| {
        let spec = svc.spec.as_ref()?;
        if spec.type_.as_deref() != Some("NodePort") {
            return None;
        }
        let port = spec
            .ports
            .iter()
            .flatten()
            .find(|p| p.node_port == Some(address.node_port))?;
        let name = svc.metadata.name.as_deref()?;
        let namespace = svc.metadata.namespace.as_deref()?;

        let scheme = address
            .scheme
            .map(|s| format!("{}://", s))
            .unwrap_or_default();
        Some(format!(
            "{}{}.{}.svc.cluster.local:{}{}",
            scheme, name, namespace, port.port, address.tail
        ))
    })
}
