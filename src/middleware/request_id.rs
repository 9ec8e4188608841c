//! Request identity.
//!
//! Every request gets a fresh UUID v4. It is bound into the request context
//! before the rest of the chain runs, and copied onto whatever response comes
//! back, including rejections and timeouts produced by inner layers.

use std::sync::Arc;

use uuid::Uuid;

use super::{Middleware, Next};
use crate::handler::BoxFuture;
use crate::request::Request;

/// Response header carrying the request identifier.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Generates a new request identifier.
pub fn generate() -> Arc<str> {
    Arc::from(Uuid::new_v4().to_string())
}

/// Assigns a request id and echoes it as `X-Request-ID`.
#[derive(Debug, Clone, Default)]
pub struct RequestId;

impl Middleware for RequestId {
    fn handle(&self, mut req: Request, next: Next) -> BoxFuture {
        let id = generate();
        req.context_mut().set_request_id(Arc::clone(&id));
        Box::pin(async move {
            let mut response = next.run(req).await;
            response.set_header(X_REQUEST_ID, &id);
            response
        })
    }

    fn name(&self) -> &'static str {
        "request_id"
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::method::Method;
    use crate::middleware::test_support::chain;
    use crate::response::Response;

    fn echo_id() -> Next {
        chain(vec![Arc::new(RequestId)], |req: Request| async move {
            Response::text(req.request_id().to_owned())
        })
    }

    #[tokio::test]
    async fn handler_sees_the_id_sent_in_the_header() {
        let resp = echo_id().run(Request::new(Method::Get, "/")).await;
        let header = resp.header("X-Request-ID").expect("header set");
        assert_eq!(resp.body(), header.as_bytes());
        assert!(Uuid::parse_str(header).is_ok());
    }

    #[tokio::test]
    async fn ids_are_unique_across_concurrent_requests() {
        let next = echo_id();
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..10_000 {
            let next = next.clone();
            tasks.spawn(async move {
                let resp = next.run(Request::new(Method::Get, "/")).await;
                resp.header(X_REQUEST_ID).unwrap_or_default().to_owned()
            });
        }

        let mut seen = HashSet::new();
        while let Some(id) = tasks.join_next().await {
            assert!(seen.insert(id.unwrap()), "duplicate request id");
        }
        assert_eq!(seen.len(), 10_000);
    }
}
