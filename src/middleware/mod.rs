//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns. A middleware receives the request and a [`Next`]
//! handle to the rest of the chain; it may answer on its own (reject, time
//! out, recover) or call `next.run(req)` and work on the response on its way
//! back out.
//!
//! Built-in layers, in the order [`Pipeline`](crate::Pipeline) applies them:
//!
//! | Layer | Module | Does |
//! |---|---|---|
//! | [`Recovery`] | [`recovery`] | turns panics into `500` |
//! | [`RequestId`] | [`request_id`] | assigns `X-Request-ID` |
//! | [`Timeout`] | [`timeout`] | races the handler against a deadline, `504` |
//! | [`RateLimit`] | [`rate_limit`] | per-client token bucket, `429` |
//! | [`Logger`] | [`logger`] | access log + metrics |
//!
//! Custom layers are plain structs implementing [`Middleware`], or closures
//! wrapped with [`from_fn`].

use std::future::Future;
use std::sync::Arc;

use crate::handler::{BoxFuture, BoxedHandler};
use crate::request::Request;
use crate::response::Response;

pub mod logger;
pub mod rate_limit;
pub mod recovery;
pub mod request_id;
pub mod timeout;

pub use logger::Logger;
pub use rate_limit::RateLimit;
pub use recovery::Recovery;
pub use request_id::RequestId;
pub use timeout::Timeout;

/// One layer of the request pipeline.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, req: Request, next: Next) -> BoxFuture;

    /// Short name used in logs and diagnostics.
    fn name(&self) -> &'static str {
        "custom"
    }
}

// ── Next ──────────────────────────────────────────────────────────────────────

/// The remainder of the chain after the current middleware.
///
/// Owned and `'static`: a middleware may move it into a spawned task.
#[derive(Clone)]
pub struct Next {
    chain: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    endpoint: BoxedHandler,
}

impl Next {
    pub(crate) fn new(chain: Arc<[Arc<dyn Middleware>]>, endpoint: BoxedHandler) -> Self {
        Self { chain, index: 0, endpoint }
    }

    /// Passes `req` to the next layer, or to the endpoint after the last one.
    pub fn run(self, req: Request) -> BoxFuture {
        match self.chain.get(self.index) {
            Some(layer) => {
                let layer = Arc::clone(layer);
                let next = Self { index: self.index + 1, ..self };
                layer.handle(req, next)
            }
            None => self.endpoint.call(req),
        }
    }
}

// ── from_fn ───────────────────────────────────────────────────────────────────

/// Adapts an async closure into a [`Middleware`].
///
/// ```rust
/// use waypost::middleware::{from_fn, Next};
/// use waypost::Request;
///
/// let layer = from_fn(|req: Request, next: Next| async move {
///     let mut resp = next.run(req).await;
///     resp.set_header("x-powered-by", "waypost");
///     resp
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    FromFn(f)
}

/// Middleware returned by [`from_fn`].
pub struct FromFn<F>(F);

impl<F, Fut> Middleware for FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        Box::pin((self.0)(req, next))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::handler::Handler;

    /// A `Next` that runs `layers` and then `endpoint`.
    pub fn chain(layers: Vec<Arc<dyn Middleware>>, endpoint: impl Handler) -> Next {
        Next::new(Arc::from(layers), endpoint.into_boxed_handler())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::test_support::chain;
    use super::*;
    use crate::method::Method;

    #[tokio::test]
    async fn layers_run_in_order_and_unwind_in_reverse() {
        let trace = Arc::new(Mutex::new(Vec::new()));

        let layer = |tag: &'static str| {
            let trace = Arc::clone(&trace);
            Arc::new(from_fn(move |req: Request, next: Next| {
                let trace = Arc::clone(&trace);
                async move {
                    trace.lock().unwrap().push(format!("{tag}>"));
                    let resp = next.run(req).await;
                    trace.lock().unwrap().push(format!("<{tag}"));
                    resp
                }
            })) as Arc<dyn Middleware>
        };

        let endpoint_trace = Arc::clone(&trace);
        let next = chain(vec![layer("a"), layer("b")], move |_req: Request| {
            let trace = Arc::clone(&endpoint_trace);
            async move {
                trace.lock().unwrap().push("handler".to_owned());
                Response::text("ok")
            }
        });

        let resp = next.run(Request::new(Method::Get, "/")).await;
        assert_eq!(resp.body(), b"ok");
        assert_eq!(*trace.lock().unwrap(), ["a>", "b>", "handler", "<b", "<a"]);
    }

    #[tokio::test]
    async fn a_layer_can_short_circuit() {
        let reject = Arc::new(from_fn(|_req: Request, _next: Next| async {
            Response::status(crate::Status::Forbidden)
        })) as Arc<dyn Middleware>;

        let next = chain(vec![reject], |_req: Request| async { Response::text("unreachable") });
        let resp = next.run(Request::new(Method::Get, "/")).await;
        assert_eq!(resp.status_code(), 403);
    }
}
