//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};

use bytes::Bytes;

use crate::context::RequestContext;
use crate::method::Method;

/// An incoming HTTP request with its body fully buffered.
///
/// The server builds these from hyper requests. Tests and custom transports
/// build them with [`Request::new`] and the `with_*` methods.
pub struct Request {
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
    body: Bytes,
    params: HashMap<String, String>,
    remote_addr: SocketAddr,
    context: RequestContext,
}

impl Request {
    /// A request with no headers, no body, and a loopback remote address.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            params: HashMap::new(),
            remote_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            context: RequestContext::new(),
        }
    }

    pub(crate) fn from_parts(
        method: Method,
        path: String,
        headers: Vec<(String, String)>,
        body: Bytes,
        remote_addr: SocketAddr,
    ) -> Self {
        Self { headers, body, remote_addr, ..Self::new(method, path) }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = addr;
        self
    }

    pub fn method(&self) -> Method { self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> SocketAddr { self.remote_addr }
    pub fn context(&self) -> &RequestContext { &self.context }

    pub(crate) fn context_mut(&mut self) -> &mut RequestContext { &mut self.context }

    /// Shorthand for `req.context().request_id()`; `""` outside the pipeline.
    pub fn request_id(&self) -> &str {
        self.context.request_id()
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }
}
