//! Access logging and metrics recording.
//!
//! Sits directly above the handler, so the latency it measures is handler
//! time only, and the status it records is whatever the handler answered.
//! Metrics are keyed by the route pattern the router tagged the response
//! with, falling back to the request path when no router ran.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::info;

use super::{Middleware, Next};
use crate::handler::BoxFuture;
use crate::metrics::Metrics;
use crate::request::Request;

/// Emits one structured log line per request and feeds [`Metrics`].
#[derive(Debug, Clone)]
pub struct Logger {
    metrics: Arc<Metrics>,
}

impl Logger {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl Middleware for Logger {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        let metrics = Arc::clone(&self.metrics);
        let request_id = req.request_id().to_owned();
        let method = req.method();
        let path = req.path().to_owned();
        let remote_addr = req.remote_addr();

        Box::pin(async move {
            let start = Instant::now();
            let response = next.run(req).await;
            let latency = start.elapsed();

            let status = response.status_code();
            let endpoint = response.route().unwrap_or(&path);
            metrics.record_request(status, latency, endpoint);

            info!(
                request_id = %request_id,
                %method,
                %path,
                %remote_addr,
                status,
                bytes = response.body().len(),
                latency_ms = latency.as_secs_f64() * 1000.0,
                "request completed"
            );
            response
        })
    }

    fn name(&self) -> &'static str {
        "logger"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::handler::BoxedHandler;
    use crate::method::Method;
    use crate::middleware::test_support::chain;
    use crate::response::Response;
    use crate::router::{Router, UNMATCHED_ROUTE};
    use crate::status::Status;

    #[tokio::test(start_paused = true)]
    async fn records_handler_status_latency_and_path() {
        let metrics = Arc::new(Metrics::new());
        let next = chain(vec![Arc::new(Logger::new(Arc::clone(&metrics)))], |_req: Request| async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Response::builder().status(Status::Created).text("ok")
        });

        let resp = next.run(Request::new(Method::Post, "/api/v1/users")).await;
        assert_eq!(resp.status_code(), 201);

        let snap = metrics.snapshot();
        assert_eq!(snap.total, 1);
        assert_eq!(snap.success, 1);
        assert_eq!(snap.status_codes[&201], 1);
        assert_eq!(snap.endpoints["/api/v1/users"], 1);
        assert!(snap.min_latency >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn unmatched_paths_share_one_endpoint_key() {
        let metrics = Arc::new(Metrics::new());
        let router: BoxedHandler =
            Arc::new(Router::new().get("/users/{id}", |_req: Request| async { "user" }));
        let logger: Vec<Arc<dyn Middleware>> = vec![Arc::new(Logger::new(Arc::clone(&metrics)))];
        let layers: Arc<[Arc<dyn Middleware>]> = Arc::from(logger);

        for path in ["/users/1", "/users/2", "/wp-admin", "/.env", "/a/b/c"] {
            Next::new(Arc::clone(&layers), Arc::clone(&router))
                .run(Request::new(Method::Get, path))
                .await;
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.endpoints.len(), 2);
        assert_eq!(snap.endpoints["/users/{id}"], 2);
        assert_eq!(snap.endpoints[UNMATCHED_ROUTE], 3);
    }
}
