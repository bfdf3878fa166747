//! HTTPS listener

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use zarf_common::Error;

/// How long in-flight reviews may take to finish after shutdown starts
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Two-phase shutdown of the webhook
///
/// Draining stops the listener from accepting connections while requests
/// already admitted keep running. Their tokens are cancelled only once the
/// grace period has run out.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    drain: CancellationToken,
    abort: CancellationToken,
}

impl Shutdown {
    /// Token the listener watches to stop accepting connections
    pub fn drain_token(&self) -> CancellationToken {
        self.drain.clone()
    }

    /// Cancellation token for one admission request
    pub fn request_token(&self) -> CancellationToken {
        self.abort.child_token()
    }

    /// Start draining now and abandon in-flight requests after `grace`
    pub fn start(&self, grace: Duration) -> JoinHandle<()> {
        info!(grace_secs = grace.as_secs(), "Draining admission requests");
        self.drain.cancel();

        let abort = self.abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            warn!("Shutdown grace period elapsed, cancelling in-flight requests");
            abort.cancel();
        })
    }
}

/// Serve `router` over TLS until `drain` is cancelled
pub async fn serve(
    router: Router,
    addr: SocketAddr,
    cert: &Path,
    key: &Path,
    drain: CancellationToken,
) -> Result<(), Error> {
    let tls_config = RustlsConfig::from_pem_file(cert, key).await.map_err(|e| {
        Error::config("tls-cert", format!("failed to load {}: {}", cert.display(), e))
    })?;

    let handle = Handle::new();
    let watcher = handle.clone();
    tokio::spawn(async move {
        drain.cancelled().await;
        watcher.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    info!(addr = %addr, "Starting admission webhook server");
    axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await
        .map_err(|e| Error::Server(e.to_string()))
}

/// Resolve on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
