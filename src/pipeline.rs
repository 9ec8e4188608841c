//! Pipeline composition.
//!
//! Layer order, outermost to innermost, is fixed:
//!
//! 1. [`Recovery`] — catches panics from every layer below it
//! 2. [`RequestId`] — the id must exist before anything logs or rejects
//! 3. [`Timeout`] — bounds everything below, rate limiting included
//! 4. [`RateLimit`] — reject before doing handler work
//! 5. user layers added with [`PipelineBuilder::layer`]
//! 6. [`Logger`] — directly above the handler, measuring handler time only
//! 7. the [`Router`]

use std::sync::Arc;
use std::time::Duration;

use crate::handler::{BoxFuture, BoxedHandler};
use crate::limiter::{LimiterConfig, RateLimiter};
use crate::metrics::Metrics;
use crate::middleware::{Logger, Middleware, Next, RateLimit, Recovery, RequestId, Timeout};
use crate::request::Request;
use crate::router::Router;

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A router wrapped in the full middleware chain.
///
/// Cheap to share: clone the `Arc` the server keeps, or call
/// [`handle`](Self::handle) directly in tests.
pub struct Pipeline {
    chain: Arc<[Arc<dyn Middleware>]>,
    endpoint: BoxedHandler,
    metrics: Arc<Metrics>,
    limiter: Arc<RateLimiter>,
}

impl Pipeline {
    pub fn builder(router: Router) -> PipelineBuilder {
        PipelineBuilder {
            router,
            metrics: None,
            limiter: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            extra: Vec::new(),
        }
    }

    /// Runs one request through every layer and the router.
    pub fn handle(&self, req: Request) -> BoxFuture {
        Next::new(Arc::clone(&self.chain), Arc::clone(&self.endpoint)).run(req)
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Layer names, outermost first.
    pub fn layer_names(&self) -> Vec<&'static str> {
        self.chain.iter().map(|layer| layer.name()).collect()
    }
}

/// Configures a [`Pipeline`]. Obtain via [`Pipeline::builder`].
pub struct PipelineBuilder {
    router: Router,
    metrics: Option<Arc<Metrics>>,
    limiter: Option<Arc<RateLimiter>>,
    timeout: Duration,
    extra: Vec<Arc<dyn Middleware>>,
}

impl PipelineBuilder {
    /// Shares an existing aggregator, typically the one the `/metrics`
    /// handler reads. A fresh one is created otherwise.
    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Uses an existing registry, typically one with a sweeper attached.
    /// Defaults to 10 req/s with a burst of 20.
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds a layer between rate limiting and logging. Layers added first
    /// run first.
    pub fn layer(mut self, layer: impl Middleware) -> Self {
        self.extra.push(Arc::new(layer));
        self
    }

    pub fn build(self) -> Pipeline {
        let metrics = self.metrics.unwrap_or_default();
        let limiter = self
            .limiter
            .unwrap_or_else(|| Arc::new(RateLimiter::new(LimiterConfig::default())));

        let mut chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Recovery),
            Arc::new(RequestId),
            Arc::new(Timeout::new(self.timeout)),
            Arc::new(RateLimit::new(Arc::clone(&limiter))),
        ];
        chain.extend(self.extra);
        chain.push(Arc::new(Logger::new(Arc::clone(&metrics))));

        Pipeline {
            chain: Arc::from(chain),
            endpoint: Arc::new(self.router),
            metrics,
            limiter,
        }
    }
}
