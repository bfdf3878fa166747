//! Agent configuration
//!
//! Command line flags (with environment fallbacks) are parsed by [`Cli`] and
//! validated into an [`AgentConfig`]; nothing downstream reads flags or
//! environment variables directly.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use zarf_common::telemetry::{LogFormat, TelemetryConfig, TelemetryError};
use zarf_common::{
    Error, PullSecretNames, DEFAULT_GIT_PULL_SECRET, DEFAULT_REGISTRY_PULL_SECRET,
    DEFAULT_STATE_PATH, ZARF_NAMESPACE, ZARF_STATE_SECRET_NAME,
};
use zarf_transform::ReferenceEncoding;

/// Upper bound Kubernetes accepts for a webhook's `timeoutSeconds`
const MAX_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Where the cluster state is read from
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StateSource {
    /// JSON file mounted into the agent pod
    File,
    /// `state` key of the Zarf state secret
    Secret,
}

/// Zarf agent - rewrites workloads to pull from the air-gap mirror
#[derive(Parser, Debug, Clone)]
#[command(name = "zarf-agent", version, about, long_about = None)]
pub struct Cli {
    /// Address the HTTPS webhook server listens on
    #[arg(long, env = "ZARF_AGENT_LISTEN_ADDR", default_value = "0.0.0.0:8443")]
    pub listen_addr: SocketAddr,

    /// PEM certificate served to the API server
    #[arg(long, env = "ZARF_AGENT_TLS_CERT", default_value = "/etc/certs/tls.crt")]
    pub tls_cert: PathBuf,

    /// PEM private key for the serving certificate
    #[arg(long, env = "ZARF_AGENT_TLS_KEY", default_value = "/etc/certs/tls.key")]
    pub tls_key: PathBuf,

    /// Where to read the cluster state from
    #[arg(long, env = "ZARF_AGENT_STATE_SOURCE", value_enum, default_value_t = StateSource::File)]
    pub state_source: StateSource,

    /// Path of the mounted state file (`--state-source file`)
    #[arg(long, env = "ZARF_AGENT_STATE_FILE", default_value = DEFAULT_STATE_PATH)]
    pub state_file: PathBuf,

    /// Namespace of the state secret (`--state-source secret`)
    #[arg(long, env = "ZARF_AGENT_STATE_NAMESPACE", default_value = ZARF_NAMESPACE)]
    pub state_namespace: String,

    /// Name of the state secret (`--state-source secret`)
    #[arg(long, env = "ZARF_AGENT_STATE_SECRET", default_value = ZARF_STATE_SECRET_NAME)]
    pub state_secret: String,

    /// Seconds a loaded state is reused; 0 reads it on every request
    #[arg(long, env = "ZARF_AGENT_STATE_CACHE_TTL_SECS", default_value_t = 30)]
    pub state_cache_ttl_secs: u64,

    /// Seconds a Service listing is reused; 0 lists on every request
    #[arg(long, env = "ZARF_AGENT_SERVICE_CACHE_TTL_SECS", default_value_t = 30)]
    pub service_cache_ttl_secs: u64,

    /// Deadline of one admission request (the webhook's timeoutSeconds)
    #[arg(long, env = "ZARF_AGENT_REQUEST_TIMEOUT_SECS", default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// Budget for a single state load or Service lookup
    #[arg(long, env = "ZARF_AGENT_LOOKUP_TIMEOUT_SECS", default_value_t = 3)]
    pub lookup_timeout_secs: u64,

    /// Image pull secret added to mutated pods and OCI sources
    #[arg(
        long,
        env = "ZARF_AGENT_REGISTRY_PULL_SECRET",
        default_value = DEFAULT_REGISTRY_PULL_SECRET
    )]
    pub registry_pull_secret: String,

    /// Git credentials secret added to mutated git sources
    #[arg(long, env = "ZARF_AGENT_GIT_PULL_SECRET", default_value = DEFAULT_GIT_PULL_SECRET)]
    pub git_pull_secret: String,

    /// How upstream hosts are encoded into mirror paths
    #[arg(
        long,
        env = "ZARF_AGENT_REFERENCE_ENCODING",
        default_value = "checksum",
        value_parser = parse_encoding
    )]
    pub reference_encoding: ReferenceEncoding,

    /// Log line format: `json` or `text`
    #[arg(
        long,
        env = "ZARF_AGENT_LOG_FORMAT",
        default_value = "json",
        value_parser = parse_log_format
    )]
    pub log_format: LogFormat,

    /// Log filter directives, overridden by `RUST_LOG`
    #[arg(long, env = "ZARF_AGENT_LOG_FILTER")]
    pub log_filter: Option<String>,
}

fn parse_encoding(value: &str) -> Result<ReferenceEncoding, String> {
    value.parse().map_err(|e: Error| e.to_string())
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse().map_err(|e: TelemetryError| e.to_string())
}

impl Cli {
    /// Telemetry settings; parsed before validation so startup errors are logged
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_format: self.log_format,
            log_filter: self.log_filter.clone(),
            ..TelemetryConfig::default()
        }
    }
}

/// Where and how the state backend is reached
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateLocation {
    /// Mounted file
    File {
        /// Path of the JSON document
        path: PathBuf,
    },
    /// Cluster secret
    Secret {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
    },
}

/// Validated agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// HTTPS listen address
    pub listen_addr: SocketAddr,
    /// Serving certificate
    pub tls_cert: PathBuf,
    /// Serving key
    pub tls_key: PathBuf,
    /// State backend location
    pub state: StateLocation,
    /// Reuse window of a loaded state, zero disables caching
    pub state_cache_ttl: Duration,
    /// Reuse window of a Service listing, zero disables caching
    pub service_cache_ttl: Duration,
    /// Deadline of one admission request
    pub request_timeout: Duration,
    /// Budget for one lookup, always shorter than `request_timeout`
    pub lookup_timeout: Duration,
    /// Secrets referenced by mutated objects
    pub pull_secrets: PullSecretNames,
    /// Host encoding used by the reference transform
    pub reference_encoding: ReferenceEncoding,
}

impl AgentConfig {
    /// Validate parsed flags
    pub fn from_cli(cli: Cli) -> Result<Self, Error> {
        if cli.request_timeout_secs == 0 || cli.request_timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
            return Err(Error::config(
                "request-timeout-secs",
                format!("must be between 1 and {}", MAX_REQUEST_TIMEOUT_SECS),
            ));
        }
        if cli.lookup_timeout_secs == 0 || cli.lookup_timeout_secs >= cli.request_timeout_secs {
            return Err(Error::config(
                "lookup-timeout-secs",
                format!(
                    "must be at least 1 and shorter than the request timeout ({}s)",
                    cli.request_timeout_secs
                ),
            ));
        }

        let state = match cli.state_source {
            StateSource::File => {
                if cli.state_file.as_os_str().is_empty() {
                    return Err(Error::config("state-file", "path is empty"));
                }
                StateLocation::File {
                    path: cli.state_file,
                }
            }
            StateSource::Secret => {
                require_non_empty("state-namespace", &cli.state_namespace)?;
                require_non_empty("state-secret", &cli.state_secret)?;
                StateLocation::Secret {
                    namespace: cli.state_namespace,
                    name: cli.state_secret,
                }
            }
        };

        require_non_empty("registry-pull-secret", &cli.registry_pull_secret)?;
        require_non_empty("git-pull-secret", &cli.git_pull_secret)?;

        Ok(Self {
            listen_addr: cli.listen_addr,
            tls_cert: cli.tls_cert,
            tls_key: cli.tls_key,
            state,
            state_cache_ttl: Duration::from_secs(cli.state_cache_ttl_secs),
            service_cache_ttl: Duration::from_secs(cli.service_cache_ttl_secs),
            request_timeout: Duration::from_secs(cli.request_timeout_secs),
            lookup_timeout: Duration::from_secs(cli.lookup_timeout_secs),
            pull_secrets: PullSecretNames {
                registry: cli.registry_pull_secret,
                git: cli.git_pull_secret,
            },
            reference_encoding: cli.reference_encoding,
        })
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::config(field, "must not be empty"));
    }
    Ok(())
}
