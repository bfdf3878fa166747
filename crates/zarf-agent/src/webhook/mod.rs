//! Admission webhook HTTP surface
//!
//! - `POST /mutate` dispatches by the request's group, version and kind
//! - `POST /mutate/{hook}` does the same but denies requests for any kind
//!   other than the named hook's
//! - `GET /healthz` answers `ok`

mod dispatcher;

pub use dispatcher::{mutate_handler, mutate_named_handler, HookRegistry, WebhookError};

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;

use crate::server::Shutdown;

/// Shared state of the webhook handlers
pub struct WebhookState {
    /// Hooks by kind and by name
    pub registry: HookRegistry,
    /// Deadline of one admission request
    pub request_timeout: Duration,
    /// Budget of one lookup within a request
    pub lookup_timeout: Duration,
    /// Source of per-request cancellation tokens
    pub shutdown: Shutdown,
}

/// Build the webhook router
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate_handler))
        .route("/mutate/{hook}", post(mutate_named_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}
