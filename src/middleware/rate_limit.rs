//! Per-client admission control in front of the handler.
//!
//! The client key is the peer IP address. Rejected requests never reach the
//! logging layer or the handler.

use std::sync::Arc;

use tracing::debug;

use super::{Middleware, Next};
use crate::handler::BoxFuture;
use crate::limiter::{Decision, RateLimiter};
use crate::request::Request;
use crate::response::Response;
use crate::status::Status;

/// Rejects clients whose token bucket is empty with `429 Too Many Requests`.
#[derive(Debug, Clone)]
pub struct RateLimit {
    limiter: Arc<RateLimiter>,
}

impl RateLimit {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

/// The fixed response for a rejected request. `Retry-After` is in whole
/// seconds, rounded up, never below one.
pub fn too_many_requests(retry_after: std::time::Duration) -> Response {
    let secs = retry_after
        .as_secs()
        .saturating_add(u64::from(retry_after.subsec_nanos() > 0));
    Response::builder()
        .status(Status::TooManyRequests)
        .header("retry-after", &secs.max(1).to_string())
        .text("Rate limit exceeded")
}

impl Middleware for RateLimit {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        let client = req.remote_addr().ip();
        match self.limiter.check(client) {
            Decision::Admitted => next.run(req),
            Decision::Rejected { retry_after } => {
                debug!(request_id = req.request_id(), %client, "rate limit exceeded");
                Box::pin(async move { too_many_requests(retry_after) })
            }
        }
    }

    fn name(&self) -> &'static str {
        "rate_limit"
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use super::*;
    use crate::limiter::LimiterConfig;
    use crate::method::Method;
    use crate::middleware::test_support::chain;

    fn from(addr: &str) -> Request {
        let addr: SocketAddr = addr.parse().unwrap();
        Request::new(Method::Get, "/").with_remote_addr(addr)
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_past_the_burst_with_429() {
        let limiter = Arc::new(RateLimiter::new(LimiterConfig {
            requests_per_second: 0.5,
            burst: 2,
            ..LimiterConfig::default()
        }));
        let next = chain(vec![Arc::new(RateLimit::new(limiter))], |_req: Request| async { "ok" });

        assert_eq!(next.clone().run(from("10.1.1.1:5000")).await.status_code(), 200);
        // Same IP, different source port: still the same client.
        assert_eq!(next.clone().run(from("10.1.1.1:5001")).await.status_code(), 200);

        let rejected = next.clone().run(from("10.1.1.1:5002")).await;
        assert_eq!(rejected.status_code(), 429);
        assert_eq!(rejected.body(), b"Rate limit exceeded");
        assert_eq!(rejected.header("retry-after"), Some("2"));

        assert_eq!(next.run(from("10.1.1.2:5000")).await.status_code(), 200);
    }

    #[test]
    fn retry_after_rounds_up_and_has_a_floor() {
        let resp = too_many_requests(Duration::from_millis(1500));
        assert_eq!(resp.header("retry-after"), Some("2"));
        let resp = too_many_requests(Duration::ZERO);
        assert_eq!(resp.header("retry-after"), Some("1"));
        let resp = too_many_requests(Duration::MAX);
        assert_eq!(resp.header("retry-after"), Some(u64::MAX.to_string().as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_rate_still_rejects_with_429() {
        let limiter = Arc::new(RateLimiter::new(LimiterConfig {
            requests_per_second: 0.0,
            burst: 1,
            ..LimiterConfig::default()
        }));
        let next = chain(vec![Arc::new(RateLimit::new(limiter))], |_req: Request| async { "ok" });

        assert_eq!(next.clone().run(from("10.2.0.1:1")).await.status_code(), 200);
        let rejected = next.run(from("10.2.0.1:2")).await;
        assert_eq!(rejected.status_code(), 429);
        assert!(rejected.header("retry-after").is_some());
    }
}
