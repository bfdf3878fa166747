//! Common types for the Zarf admission agent: errors, cluster state, telemetry

#![deny(missing_docs)]

pub mod error;
pub mod metrics;
pub mod state;
pub mod telemetry;

pub use error::Error;
pub use state::{MirrorConfig, PullSecretNames, ZarfState};

/// Namespace the Zarf services and the agent run in
pub const ZARF_NAMESPACE: &str = "zarf";

/// Secret holding the cluster state when it is not file-mounted
pub const ZARF_STATE_SECRET_NAME: &str = "zarf-state";

/// Key of the state document inside the state secret
pub const ZARF_STATE_DATA_KEY: &str = "state";

/// Path the state secret is mounted at inside the agent pod
pub const DEFAULT_STATE_PATH: &str = "/etc/zarf-state/state";

/// Image pull secret created in every namespace Zarf deploys to
pub const DEFAULT_REGISTRY_PULL_SECRET: &str = "private-registry";

/// Git credentials secret created in every namespace Zarf deploys to
pub const DEFAULT_GIT_PULL_SECRET: &str = "private-git-server";

/// Label key stamped on every object the agent mutates
///
/// External tooling queries on this key; it must not change between releases.
pub const AGENT_LABEL_KEY: &str = "zarf-agent";

/// Label value stamped on every object the agent mutates
pub const AGENT_LABEL_VALUE: &str = "patched";

/// Label key that lets users opt an object out of mutation
pub const AGENT_IGNORE_LABEL_KEY: &str = "zarf.dev/agent";

/// Label value that opts an object out of mutation
pub const AGENT_IGNORE_LABEL_VALUE: &str = "ignore";
