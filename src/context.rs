//! Per-request context threaded through every layer and into the handler.
//!
//! Each inbound request owns exactly one [`RequestContext`]. The identity
//! layer fills in the request id; the timeout layer fills in the deadline and
//! narrows the cancellation token. Handlers read it through
//! [`Request::context`](crate::Request::context).

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Request-scoped state: identifier, deadline, and cancellation signal.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    request_id: Option<Arc<str>>,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The request identifier, or `""` when the identity layer has not run
    /// (for example when a handler is called directly in a test).
    pub fn request_id(&self) -> &str {
        self.request_id.as_deref().unwrap_or("")
    }

    /// The instant after which the pipeline stops waiting for the handler.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancelled when the deadline passes or the client goes away.
    ///
    /// Handlers doing long work should `select!` on
    /// [`cancelled()`](CancellationToken::cancelled) and return early.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub(crate) fn set_request_id(&mut self, id: impl Into<Arc<str>>) {
        self.request_id = Some(id.into());
    }

    /// Installs a deadline and replaces the token with a child of the current
    /// one, so cancelling the child never cancels the parent.
    pub(crate) fn set_deadline(&mut self, deadline: Instant) -> CancellationToken {
        self.deadline = Some(deadline);
        self.cancellation = self.cancellation.child_token();
        self.cancellation.clone()
    }
}
