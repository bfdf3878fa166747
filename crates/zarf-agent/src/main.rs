//! Zarf agent binary

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tracing::info;

use zarf_agent::config::{AgentConfig, Cli, StateLocation};
use zarf_agent::hooks::{all_hooks, HookDeps};
use zarf_agent::server::{serve, shutdown_signal, Shutdown, SHUTDOWN_GRACE};
use zarf_agent::state::{
    ClusterStateProvider, FileStateBackend, KubeServiceLookup, SecretStateBackend, StateBackend,
};
use zarf_agent::webhook::{webhook_router, HookRegistry, WebhookState};
use zarf_common::telemetry::init_telemetry;
use zarf_transform::Transformer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider - FIPS-validated aws-lc-rs
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!(
            "CRITICAL: Failed to install FIPS-validated crypto provider: {:?}. \
             The webhook cannot serve TLS without it.",
            e
        );
        std::process::exit(1);
    }

    let cli = Cli::parse();
    let telemetry = init_telemetry(cli.telemetry())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let config = AgentConfig::from_cli(cli)?;
    info!(
        otlp_export = telemetry.is_exporting(),
        listen_addr = %config.listen_addr,
        encoding = %config.reference_encoding,
        request_timeout_secs = config.request_timeout.as_secs(),
        "Starting zarf-agent"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let backend: Arc<dyn StateBackend> = match &config.state {
        StateLocation::File { path } => Arc::new(FileStateBackend::new(path.clone())),
        StateLocation::Secret { namespace, name } => {
            Arc::new(SecretStateBackend::new(client.clone(), namespace, name))
        }
    };
    let state = ClusterStateProvider::new(
        backend,
        Arc::new(KubeServiceLookup::new(client)),
        config.pull_secrets.clone(),
        config.state_cache_ttl,
        config.service_cache_ttl,
    );

    let deps = HookDeps {
        state: Arc::new(state),
        transformer: Transformer::new(config.reference_encoding),
    };
    let shutdown = Shutdown::default();
    let webhook = Arc::new(WebhookState {
        registry: HookRegistry::new(all_hooks(&deps)),
        request_timeout: config.request_timeout,
        lookup_timeout: config.lookup_timeout,
        shutdown: shutdown.clone(),
    });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_shutdown.start(SHUTDOWN_GRACE);
    });

    serve(
        webhook_router(webhook),
        config.listen_addr,
        &config.tls_cert,
        &config.tls_key,
        shutdown.drain_token(),
    )
    .await?;

    info!("zarf-agent stopped");
    telemetry.shutdown();
    Ok(())
}
