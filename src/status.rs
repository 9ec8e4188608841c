//! HTTP status codes as a typed enum, plus the class buckets metrics count.
//!
//! Use [`Status`] anywhere a status code is accepted: `Response::status()`,
//! `Response::builder().status()`, or as a bare handler return value.
//!
//! ```rust
//! use waypost::{Response, Status};
//!
//! Response::status(Status::NoContent);
//!
//! Response::builder()
//!     .status(Status::Created)
//!     .header("location", "/api/v1/users/3")
//!     .json(br#"{"id":3}"#.to_vec());
//! ```

/// The status codes the pipeline and its handlers produce.
///
/// Handlers that need something more exotic can still build a response
/// with any `u16` through [`ResponseBuilder::code`](crate::ResponseBuilder::code).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Status {
    // ── 2xx Success ───────────────────────────────────────────────────────────
    Ok,                   // 200
    Created,              // 201
    Accepted,             // 202
    NoContent,            // 204

    // ── 3xx Redirection ───────────────────────────────────────────────────────
    MovedPermanently,     // 301
    Found,                // 302
    SeeOther,             // 303
    NotModified,          // 304
    TemporaryRedirect,    // 307
    PermanentRedirect,    // 308

    // ── 4xx Client errors ─────────────────────────────────────────────────────
    BadRequest,           // 400
    Unauthorized,         // 401
    Forbidden,            // 403
    NotFound,             // 404
    MethodNotAllowed,     // 405
    RequestTimeout,       // 408
    Conflict,             // 409
    ContentTooLarge,      // 413
    UnsupportedMediaType, // 415
    UnprocessableContent, // 422
    TooManyRequests,      // 429

    // ── 5xx Server errors ─────────────────────────────────────────────────────
    InternalServerError,  // 500
    NotImplemented,       // 501
    BadGateway,           // 502
    ServiceUnavailable,   // 503
    GatewayTimeout,       // 504
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Self::Ok                   => 200,
            Self::Created              => 201,
            Self::Accepted             => 202,
            Self::NoContent            => 204,
            Self::MovedPermanently     => 301,
            Self::Found                => 302,
            Self::SeeOther             => 303,
            Self::NotModified          => 304,
            Self::TemporaryRedirect    => 307,
            Self::PermanentRedirect    => 308,
            Self::BadRequest           => 400,
            Self::Unauthorized         => 401,
            Self::Forbidden            => 403,
            Self::NotFound             => 404,
            Self::MethodNotAllowed     => 405,
            Self::RequestTimeout       => 408,
            Self::Conflict             => 409,
            Self::ContentTooLarge      => 413,
            Self::UnsupportedMediaType => 415,
            Self::UnprocessableContent => 422,
            Self::TooManyRequests      => 429,
            Self::InternalServerError  => 500,
            Self::NotImplemented       => 501,
            Self::BadGateway           => 502,
            Self::ServiceUnavailable   => 503,
            Self::GatewayTimeout       => 504,
        }
    }
}

impl From<Status> for u16 {
    fn from(s: Status) -> u16 {
        s.code()
    }
}

// ── Status classes ────────────────────────────────────────────────────────────

/// The buckets the metrics aggregator sorts responses into.
///
/// Codes outside 200–599, and 1xx/3xx codes, belong to no bucket: they count
/// toward the total and the per-code breakdown only.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusClass {
    Success,
    ClientError,
    ServerError,
}

impl StatusClass {
    pub fn of(code: u16) -> Option<Self> {
        match code {
            200..=299 => Some(Self::Success),
            400..=499 => Some(Self::ClientError),
            500..=599 => Some(Self::ServerError),
            _ => None,
        }
    }
}
