//! # waypost
//!
//! A request pipeline for hyper services. Handlers stay plain
//! `async fn(Request) -> impl IntoResponse`; waypost wraps them in the
//! cross-cutting layers every service ends up writing by hand.
//!
//! ## The pipeline
//!
//! Outermost to innermost:
//!
//! - **Recovery** — a panic anywhere below becomes a `500`, and the server
//!   keeps serving.
//! - **Request id** — a UUID v4 per request, in the request context and in
//!   the `X-Request-ID` response header.
//! - **Timeout** — the handler runs in its own task and races a deadline.
//!   The loser is cancelled and exactly one response goes out (`504` on
//!   timeout).
//! - **Rate limit** — a token bucket per client IP, `429` when empty. Idle
//!   clients are swept in the background.
//! - **Logger** — one structured `tracing` line per request, and live
//!   [`Metrics`] (counts by class, code and endpoint; min/avg/max latency).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use waypost::{handlers, Metrics, Pipeline, Request, Response, Router, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), waypost::Error> {
//!     let metrics = Arc::new(Metrics::new());
//!     let app = Router::new()
//!         .get("/hello", hello)
//!         .get("/metrics", handlers::metrics_report(Arc::clone(&metrics)));
//!
//!     let pipeline = Pipeline::builder(app)
//!         .metrics(metrics)
//!         .timeout(Duration::from_secs(5))
//!         .build();
//!
//!     Server::bind("0.0.0.0:8080")?.serve(pipeline).await
//! }
//!
//! async fn hello(req: Request) -> Response {
//!     Response::text(format!("hello, request {}", req.request_id()))
//! }
//! ```

mod context;
mod error;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;
mod status;

pub mod config;
pub mod handlers;
pub mod health;
pub mod limiter;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod sink;

pub use context::RequestContext;
pub use error::Error;
pub use handler::{BoxFuture, Handler};
pub use limiter::{LimiterConfig, RateLimiter};
pub use method::{Method, UnknownMethod};
pub use metrics::{Metrics, Snapshot};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
pub use status::{Status, StatusClass};
