//! Cluster state backends
//!
//! `zarf init` writes the state into the `zarf-state` secret; the agent
//! deployment mounts the same secret as a file. Either can be read.

use std::path::PathBuf;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use zarf_common::{Error, ZarfState, ZARF_STATE_DATA_KEY};

/// Source of the raw cluster state
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Metric label of this backend (`file`, `secret`)
    fn source(&self) -> &'static str;

    /// Read and decode the state document
    async fn read(&self) -> Result<ZarfState, Error>;
}

/// Reads the state file mounted into the agent pod
pub struct FileStateBackend {
    path: PathBuf,
}

impl FileStateBackend {
    /// Read the state from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StateBackend for FileStateBackend {
    fn source(&self) -> &'static str {
        "file"
    }

    async fn read(&self) -> Result<ZarfState, Error> {
        let location = self.path.display().to_string();
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|e| Error::state_load_from(&location, e.to_string()))?;
        decode_state(&location, &raw)
    }
}

/// Reads the state from the Zarf state secret
pub struct SecretStateBackend {
    api: Api<Secret>,
    namespace: String,
    name: String,
}

impl SecretStateBackend {
    /// Read the state from secret `namespace/name`
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl StateBackend for SecretStateBackend {
    fn source(&self) -> &'static str {
        "secret"
    }

    async fn read(&self) -> Result<ZarfState, Error> {
        let location = format!("secret {}/{}", self.namespace, self.name);
        let secret = self
            .api
            .get(&self.name)
            .await
            .map_err(|e| Error::state_load_from(&location, e.to_string()))?;
        let raw = secret
            .data
            .as_ref()
            .and_then(|data| data.get(ZARF_STATE_DATA_KEY))
            .ok_or_else(|| {
                Error::state_load_from(&location, format!("missing key '{}'", ZARF_STATE_DATA_KEY))
            })?;
        decode_state(&location, &raw.0)
    }
}

fn decode_state(location: &str, raw: &[u8]) -> Result<ZarfState, Error> {
    serde_json::from_slice(raw)
        .map_err(|e| Error::state_load_from(location, format!("malformed state: {}", e)))
}
