//! Per-request context
//!
//! Every admission request carries its own deadline, cancellation token and
//! logging span. Lookups that leave the process go through
//! [`RequestContext::bounded`], which caps them at the lookup budget and the
//! time left before the API server gives up on the request.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};
use zarf_common::Error;

/// Deadline, cancellation and span of one admission request
#[derive(Clone, Debug)]
pub struct RequestContext {
    uid: String,
    deadline: Instant,
    lookup_timeout: Duration,
    cancel: CancellationToken,
    span: Span,
}

impl RequestContext {
    /// Create a context for the request `uid`, starting now
    pub fn new(
        uid: impl Into<String>,
        request_timeout: Duration,
        lookup_timeout: Duration,
        cancel: CancellationToken,
        span: Span,
    ) -> Self {
        Self {
            uid: uid.into(),
            deadline: Instant::now() + request_timeout,
            lookup_timeout,
            cancel,
            span,
        }
    }

    /// Admission request uid
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Token cancelled on shutdown or when the request is abandoned
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Time left before the request deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Budget for the next lookup: the lookup timeout, clipped to the deadline
    pub fn lookup_budget(&self) -> Duration {
        self.lookup_timeout.min(self.remaining())
    }

    /// Run `fut` within the lookup budget, inside the request span
    ///
    /// Timeouts and cancellation are reported through `on_failure` so each
    /// caller keeps its own error kind. Nothing is retried.
    pub async fn bounded<T, F>(
        &self,
        fut: F,
        on_failure: impl FnOnce(String) -> Error,
    ) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        let budget = self.lookup_budget();
        if budget.is_zero() {
            return Err(on_failure("request deadline already passed".to_string()));
        }

        let fut = fut.instrument(self.span.clone());
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = tokio::time::timeout(budget, fut) => Some(result),
        };

        match outcome {
            None => Err(on_failure("request cancelled".to_string())),
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(on_failure(format!(
                "timed out after {}ms",
                budget.as_millis()
            ))),
        }
    }
}
