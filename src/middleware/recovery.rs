//! Panic containment.
//!
//! [`catch_panic`] is the boundary construct: run a response future, and if
//! it panics, hand back a typed [`Panicked`] instead of unwinding further.
//! It is used in exactly two places: by [`Recovery`], around the whole
//! chain, and by the timeout layer, around the downstream call inside its
//! spawned task.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use thiserror::Error;
use tracing::error;

use super::{Middleware, Next};
use crate::handler::BoxFuture;
use crate::request::Request;
use crate::response::Response;
use crate::status::Status;

/// A panic caught at a containment boundary.
#[derive(Debug, Error)]
#[error("handler panicked: {message}")]
pub struct Panicked {
    message: String,
}

impl Panicked {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Polls `fut` to completion, converting a panic into `Err(Panicked)`.
pub async fn catch_panic<F>(fut: F) -> Result<Response, Panicked>
where
    F: Future<Output = Response>,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(Panicked::from_payload)
}

/// The fixed response for a contained panic.
pub fn internal_error() -> Response {
    Response::builder()
        .status(Status::InternalServerError)
        .text("Internal Server Error")
}

/// Outermost layer: any panic below becomes a logged `500`.
#[derive(Debug, Clone, Default)]
pub struct Recovery;

impl Middleware for Recovery {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        let method = req.method();
        let path = req.path().to_owned();
        Box::pin(async move {
            // `next.run` executes the next layer's synchronous setup, so it
            // has to happen inside the boundary too.
            match catch_panic(async move { next.run(req).await }).await {
                Ok(response) => response,
                Err(panic) => {
                    error!(%method, %path, panic = panic.message(), "recovered from panic");
                    internal_error()
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "recovery"
    }
}
