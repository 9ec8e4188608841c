//! Demo application handlers served by the `waypost` binary.
//!
//! They exist to exercise the pipeline: a plain page, a mock users API, the
//! metrics report, a handler that panics, and one that outlives the request
//! deadline unless it is cancelled.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use crate::handler::Handler;
use crate::metrics::Metrics;
use crate::request::Request;
use crate::response::Response;
use crate::status::Status;

/// How long [`slow`] works before answering.
pub const SLOW_DURATION: Duration = Duration::from_secs(10);

/// `GET /`
pub async fn home(_req: Request) -> Response {
    Response::text("Welcome to the HTTP server\n")
}

/// `GET /api/v1/users`
pub async fn list_users(_req: Request) -> Value {
    json!([
        { "id": 1, "name": "Alice" },
        { "id": 2, "name": "Bob" },
    ])
}

/// `POST /api/v1/users`: echoes the JSON object back with a mock id.
pub async fn create_user(req: Request) -> Response {
    let mut user: serde_json::Map<String, Value> = match serde_json::from_slice(req.body()) {
        Ok(user) => user,
        Err(_) => {
            return Response::builder().status(Status::BadRequest).text("Invalid JSON");
        }
    };
    user.insert("id".to_owned(), json!(3));

    match serde_json::to_vec(&user) {
        Ok(body) => Response::builder().status(Status::Created).json(body),
        Err(_) => Response::status(Status::InternalServerError),
    }
}

/// `GET /metrics`: the JSON report of `metrics`.
pub fn metrics_report(metrics: Arc<Metrics>) -> impl Handler {
    move |_req: Request| {
        let metrics = Arc::clone(&metrics);
        async move {
            match metrics.snapshot().to_json() {
                Ok(body) => Response::json(body),
                Err(_) => Response::status(Status::InternalServerError),
            }
        }
    }
}

/// `GET /panic`: for exercising panic recovery.
pub async fn panic(_req: Request) -> Response {
    panic!("intentional panic for testing recovery middleware");
}

/// `GET /slow`: takes [`SLOW_DURATION`] unless the request is cancelled first.
pub async fn slow(req: Request) -> Response {
    let token = req.context().cancellation().clone();
    tokio::select! {
        () = token.cancelled() => Response::status(Status::ServiceUnavailable),
        () = tokio::time::sleep(SLOW_DURATION) => {
            Response::builder().status(Status::Ok).text("This took 10 seconds\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ErasedHandler;
    use crate::method::Method;

    #[tokio::test]
    async fn create_user_assigns_mock_id() {
        let req = Request::new(Method::Post, "/api/v1/users").with_body(r#"{"name":"Carol"}"#);
        let resp = create_user(req).await;
        assert_eq!(resp.status_code(), 201);

        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["id"], 3);
        assert_eq!(body["name"], "Carol");
    }

    #[tokio::test]
    async fn create_user_rejects_bad_json() {
        let req = Request::new(Method::Post, "/api/v1/users").with_body("{not json");
        let resp = create_user(req).await;
        assert_eq!(resp.status_code(), 400);
        assert_eq!(resp.body(), b"Invalid JSON");
    }

    #[tokio::test]
    async fn metrics_report_serves_the_snapshot() {
        let metrics = Arc::new(Metrics::new());
        metrics.record_request(200, Duration::from_millis(3), "/");

        let handler = metrics_report(Arc::clone(&metrics)).into_boxed_handler();
        let resp = handler.call(Request::new(Method::Get, "/metrics")).await;
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["requests"]["total"], 1);
        assert_eq!(body["endpoints"]["/"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_stops_when_cancelled() {
        let req = Request::new(Method::Get, "/slow");
        req.context().cancellation().cancel();
        let resp = slow(req).await;
        assert_eq!(resp.status_code(), 503);
    }
}
