//! Deadline enforcement.
//!
//! The downstream chain runs in its own tokio task; the guard waits for
//! whichever comes first, that task's response or the deadline. Each
//! request's race is a tiny state machine:
//!
//! ```text
//!            handler finishes
//!   Running ──────────────────▶ Completed   (handler's response is sent)
//!      │
//!      └──────────────────────▶ TimedOut    (fixed 504 is sent)
//!            deadline expires
//! ```
//!
//! Only the first transition succeeds, so exactly one response leaves the
//! guard. On timeout the request's cancellation token is cancelled; the task
//! is not aborted. A handler that ignores the token runs to completion, and
//! its late response is dropped with a warning.
//!
//! Panics inside the task are caught inside the task, around the
//! downstream call only, and become a `500`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{error, warn};

use super::recovery::{catch_panic, internal_error};
use super::{Middleware, Next};
use crate::handler::BoxFuture;
use crate::request::Request;
use crate::response::Response;
use crate::status::Status;

const RUNNING: u8 = 0;
const COMPLETED: u8 = 1;
const TIMED_OUT: u8 = 2;

/// Who produced the response for one request.
#[derive(Debug, Default)]
struct Race(AtomicU8);

impl Race {
    /// Moves out of `Running` into `outcome`. `false` if another side won.
    fn finish(&self, outcome: u8) -> bool {
        self.0
            .compare_exchange(RUNNING, outcome, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// The fixed response for a request that missed its deadline.
pub fn timeout_response() -> Response {
    Response::builder()
        .status(Status::GatewayTimeout)
        .text("Request Timeout")
}

/// Races the rest of the chain against a per-request deadline.
#[derive(Debug, Clone)]
pub struct Timeout {
    duration: Duration,
}

impl Timeout {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Middleware for Timeout {
    fn handle(&self, mut req: Request, next: Next) -> BoxFuture {
        let deadline = Instant::now() + self.duration;
        let token = req.context_mut().set_deadline(deadline);
        let request_id = req.request_id().to_owned();
        let path = req.path().to_owned();

        Box::pin(async move {
            let race = Arc::new(Race::default());
            let (tx, mut rx) = oneshot::channel();

            let task_race = Arc::clone(&race);
            let task_request_id = request_id.clone();
            tokio::spawn(async move {
                let response = match catch_panic(async move { next.run(req).await }).await {
                    Ok(response) => response,
                    Err(panic) => {
                        error!(request_id = %task_request_id, panic = panic.message(), "panic in handler");
                        internal_error()
                    }
                };

                if task_race.finish(COMPLETED) {
                    let _ = tx.send(response);
                } else {
                    warn!(
                        request_id = %task_request_id,
                        status = response.status_code(),
                        "handler finished after deadline, response suppressed"
                    );
                }
            });

            tokio::select! {
                res = &mut rx => res.unwrap_or_else(|_| internal_error()),
                () = tokio::time::sleep_until(deadline) => {
                    if race.finish(TIMED_OUT) {
                        token.cancel();
                        warn!(request_id = %request_id, %path, "request deadline exceeded");
                        timeout_response()
                    } else {
                        // The handler won by a hair; its response is in flight.
                        rx.await.unwrap_or_else(|_| internal_error())
                    }
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "timeout"
    }
}
