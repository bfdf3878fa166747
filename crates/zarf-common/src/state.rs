//! Cluster state written by `zarf init` and the mirror view derived from it
//!
//! The agent only reads this state. It is mounted into the agent pod as a JSON
//! file or stored in the `zarf-state` secret; both hold the same document.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The subset of the Zarf cluster state the agent consumes
///
/// Unknown fields are ignored so newer state documents keep loading.
#[derive(Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZarfState {
    /// Kubernetes distribution detected at init time
    #[serde(default)]
    pub distro: String,
    /// Cluster architecture (amd64, arm64)
    #[serde(default)]
    pub architecture: String,
    /// Default storage class used by the mirror services
    #[serde(default)]
    pub storage_class: String,
    /// Git server the agent points git sources at
    #[serde(default)]
    pub git_server: GitServerInfo,
    /// Image registry the agent points images and OCI sources at
    #[serde(default)]
    pub registry_info: RegistryInfo,
}

// Credentials must never reach the logs.
impl fmt::Debug for ZarfState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZarfState")
            .field("distro", &self.distro)
            .field("architecture", &self.architecture)
            .field("storage_class", &self.storage_class)
            .field("git_server", &self.git_server)
            .field("registry_info", &self.registry_info)
            .finish()
    }
}

/// Git server connection info
#[derive(Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GitServerInfo {
    /// Base URL of the git server (e.g., `http://zarf-gitea-http.zarf.svc.cluster.local:3000`)
    #[serde(default)]
    pub address: String,
    /// User that owns mirrored repositories
    #[serde(default)]
    pub push_username: String,
    /// Password of the push user
    #[serde(default)]
    pub push_password: String,
    /// Read-only user
    #[serde(default)]
    pub pull_username: String,
    /// Password of the read-only user
    #[serde(default)]
    pub pull_password: String,
    /// Whether the git server runs inside the cluster
    #[serde(default)]
    pub internal_server: bool,
}

impl fmt::Debug for GitServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitServerInfo")
            .field("address", &self.address)
            .field("push_username", &self.push_username)
            .field("pull_username", &self.pull_username)
            .field("internal_server", &self.internal_server)
            .finish_non_exhaustive()
    }
}

/// Image registry connection info
#[derive(Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryInfo {
    /// Registry address as seen by the container runtime (e.g., `127.0.0.1:31999`)
    #[serde(default)]
    pub address: String,
    /// Node port the internal registry is exposed on
    #[serde(default)]
    pub node_port: u16,
    /// Whether the registry runs inside the cluster
    #[serde(default)]
    pub internal_registry: bool,
    /// User with push access
    #[serde(default)]
    pub push_username: String,
    /// Password of the push user
    #[serde(default)]
    pub push_password: String,
    /// Read-only user
    #[serde(default)]
    pub pull_username: String,
    /// Password of the read-only user
    #[serde(default)]
    pub pull_password: String,
}

impl fmt::Debug for RegistryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryInfo")
            .field("address", &self.address)
            .field("node_port", &self.node_port)
            .field("internal_registry", &self.internal_registry)
            .field("push_username", &self.push_username)
            .field("pull_username", &self.pull_username)
            .finish_non_exhaustive()
    }
}

/// Secret names the mutated objects are pointed at
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullSecretNames {
    /// Image pull secret for the registry
    pub registry: String,
    /// Credentials secret for the git server
    pub git: String,
}

impl Default for PullSecretNames {
    fn default() -> Self {
        Self {
            registry: crate::DEFAULT_REGISTRY_PULL_SECRET.to_string(),
            git: crate::DEFAULT_GIT_PULL_SECRET.to_string(),
        }
    }
}

/// Mirror endpoints a request is rewritten against
///
/// Shared read-only between concurrently handled requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorConfig {
    /// Registry address as stored in the state (may be a node port address)
    pub registry_address: String,
    /// Internal registries are reached over plain HTTP inside the cluster
    pub registry_internal: bool,
    /// Image pull secret name
    pub registry_pull_secret_name: String,
    /// Git server base URL
    pub git_address: String,
    /// Owner of mirrored repositories on the git server
    pub git_push_username: String,
    /// Git credentials secret name
    pub git_pull_secret_name: String,
}

impl MirrorConfig {
    /// Derive the mirror view from the cluster state
    pub fn from_state(state: &ZarfState, secrets: &PullSecretNames) -> Self {
        Self {
            registry_address: state.registry_info.address.clone(),
            registry_internal: state.registry_info.internal_registry,
            registry_pull_secret_name: secrets.registry.clone(),
            git_address: state.git_server.address.trim_end_matches('/').to_string(),
            git_push_username: state.git_server.push_username.clone(),
            git_pull_secret_name: secrets.git.clone(),
        }
    }
}
