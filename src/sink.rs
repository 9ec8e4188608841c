//! Response sinks: the transport-facing writer and the status recorder that
//! decorates it.
//!
//! HTTP allows exactly one status line per response. [`HttpWriter`] keeps the
//! first status it is given and drops later ones with a warning, so a late
//! writer can never produce a second status line. [`StatusRecorder`] sits in
//! front of any writer and remembers what was written, for logging and
//! metrics, without changing a single byte.

use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use tracing::warn;

/// Something a response can be streamed into.
pub trait ResponseWriter {
    /// Sets the status. Only the first call can take effect on the wire.
    fn write_status(&mut self, status: u16);

    /// Adds a header. Must be called before [`write_status`](Self::write_status).
    fn append_header(&mut self, name: &str, value: &str);

    /// Appends body bytes, implicitly writing `200` if no status was set.
    /// Returns the number of bytes accepted.
    fn write(&mut self, bytes: &[u8]) -> usize;
}

// ── HttpWriter ────────────────────────────────────────────────────────────────

/// Buffers one response and converts it into a hyper-compatible
/// `http::Response`.
#[derive(Debug, Default)]
pub struct HttpWriter {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
}

impl HttpWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a status line has been committed.
    pub fn is_committed(&self) -> bool {
        self.status.is_some()
    }

    pub fn finish(self) -> http::Response<Full<Bytes>> {
        let mut response = http::Response::new(Full::new(self.body.freeze()));
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.headers;
        response
    }
}

impl ResponseWriter for HttpWriter {
    fn write_status(&mut self, status: u16) {
        if let Some(committed) = self.status {
            warn!(committed = committed.as_u16(), ignored = status, "superfluous status write");
            return;
        }
        let code = StatusCode::from_u16(status).unwrap_or_else(|_| {
            warn!(status, "invalid status code, sending 500");
            StatusCode::INTERNAL_SERVER_ERROR
        });
        self.status = Some(code);
    }

    fn append_header(&mut self, name: &str, value: &str) {
        if self.is_committed() {
            warn!(header = name, "header written after status, ignored");
            return;
        }
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => warn!(header = name, "invalid header dropped"),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        if !self.is_committed() {
            self.write_status(StatusCode::OK.as_u16());
        }
        self.body.extend_from_slice(bytes);
        bytes.len()
    }
}

// ── StatusRecorder ────────────────────────────────────────────────────────────

/// Decorates a [`ResponseWriter`] and records the first status written and
/// the total body size.
///
/// Every call is forwarded unchanged; the underlying writer decides what a
/// second status write means. The recorded status is the first one seen,
/// or `200` when none was written explicitly.
#[derive(Debug)]
pub struct StatusRecorder<W> {
    inner: W,
    status: Option<u16>,
    size: usize,
}

impl<W: ResponseWriter> StatusRecorder<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, status: None, size: 0 }
    }

    pub fn status_code(&self) -> u16 {
        self.status.unwrap_or(200)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: ResponseWriter> ResponseWriter for StatusRecorder<W> {
    fn write_status(&mut self, status: u16) {
        if self.status.is_none() {
            self.status = Some(status);
        }
        self.inner.write_status(status);
    }

    fn append_header(&mut self, name: &str, value: &str) {
        self.inner.append_header(name, value);
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        let n = self.inner.write(bytes);
        self.size += n;
        n
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    #[test]
    fn recorder_defaults_to_200_and_zero_bytes() {
        let rec = StatusRecorder::new(HttpWriter::new());
        assert_eq!(rec.status_code(), 200);
        assert_eq!(rec.size(), 0);
    }

    #[test]
    fn first_status_is_authoritative() {
        let mut rec = StatusRecorder::new(HttpWriter::new());
        rec.write_status(504);
        rec.write_status(200);

        assert_eq!(rec.status_code(), 504);
        assert_eq!(rec.into_inner().finish().status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn body_bytes_are_counted_across_writes() {
        let mut rec = StatusRecorder::new(HttpWriter::new());
        rec.write(b"hello ");
        rec.write(b"world");
        assert_eq!(rec.size(), 11);
        assert_eq!(rec.status_code(), 200);
        assert!(rec.get_ref().is_committed());
    }

    #[tokio::test]
    async fn recorder_does_not_alter_bytes_or_headers() {
        let mut rec = StatusRecorder::new(HttpWriter::new());
        rec.append_header("content-type", "text/plain; charset=utf-8");
        rec.append_header("x-request-id", "abc");
        rec.write_status(201);
        rec.write(b"created");

        let out = rec.into_inner().finish();
        assert_eq!(out.status(), StatusCode::CREATED);
        assert_eq!(out.headers()["x-request-id"], "abc");
        let body = out.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"created");
    }

    #[test]
    fn headers_after_status_are_ignored() {
        let mut writer = HttpWriter::new();
        writer.write_status(200);
        writer.append_header("x-late", "1");
        assert!(writer.finish().headers().get("x-late").is_none());
    }

    #[test]
    fn invalid_status_becomes_500() {
        let mut writer = HttpWriter::new();
        writer.write_status(42);
        assert_eq!(writer.finish().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
