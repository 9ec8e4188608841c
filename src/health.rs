//! Health-check handlers.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/health` | Is the process alive? |
//! | **Readiness** | `/readyz` | Can it take traffic? |
//!
//! ```rust,no_run
//! use waypost::{Router, health};
//!
//! let app = Router::new()
//!     .get("/health", health::liveness)
//!     .get("/readyz", health::readiness);
//! ```

use serde_json::json;

use crate::{Request, Response};

/// Service name reported by the health endpoints.
pub const SERVICE_NAME: &str = "waypost";

/// Always `200 OK` with `{"status":"ok","service":"waypost"}`.
///
/// If the process can answer HTTP at all, it is alive; this handler has no
/// dependencies.
pub async fn liveness(_req: Request) -> serde_json::Value {
    json!({ "status": "ok", "service": SERVICE_NAME })
}

/// `200 OK` with `{"status":"ready"}`. Replace with your own handler to gate
/// on dependency health.
pub async fn readiness(_req: Request) -> Response {
    Response::json(br#"{"status":"ready"}"#.to_vec())
}
