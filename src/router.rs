//! Path dispatch table.
//!
//! One radix tree per HTTP method. Exact paths and `{param}` segments. The
//! router is the innermost endpoint of the [`Pipeline`](crate::Pipeline):
//! it answers `404` for unknown paths and `405` for known paths requested
//! with an unregistered method.
//!
//! Every response leaving the router is tagged with the route pattern that
//! produced it, or [`UNMATCHED_ROUTE`] for 404s and 405s, so per-endpoint
//! metrics stay bounded by the route table.

use std::collections::HashMap;
use std::sync::Arc;

use matchit::Router as MatchitRouter;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler};
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;
use crate::status::Status;

/// Route key recorded for requests that matched no route.
pub const UNMATCHED_ROUTE: &str = "unmatched";

type Route = (Arc<str>, BoxedHandler);

/// The application router.
///
/// Build it once at startup and hand it to [`Pipeline::builder`](crate::Pipeline::builder).
/// Each registration returns `self` so calls chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Route>>,
}

pub(crate) enum Lookup {
    Found(Arc<str>, BoxedHandler, HashMap<String, String>),
    MethodNotAllowed,
    NotFound,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// ```rust,no_run
    /// # use waypost::{Method, Request, Response, Router};
    /// # async fn list(_: Request) -> Response { Response::text("") }
    /// # async fn create(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::Get,  "/api/v1/users", list)
    ///     .on(Method::Post, "/api/v1/users", create);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics on a malformed or conflicting route. Routes are fixed at
    /// startup, so this surfaces during boot rather than under traffic.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, (Arc::from(path), handler.into_boxed_handler()))
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Get, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Post, path, handler)
    }

    pub(crate) fn lookup(&self, method: Method, path: &str) -> Lookup {
        if let Some(matched) = self.routes.get(&method).and_then(|tree| tree.at(path).ok()) {
            let (route, handler) = matched.value;
            let (route, handler) = (Arc::clone(route), Arc::clone(handler));
            let params = matched.params.iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Lookup::Found(route, handler, params);
        }

        let other_method = self.routes.iter()
            .any(|(m, tree)| *m != method && tree.at(path).is_ok());
        if other_method { Lookup::MethodNotAllowed } else { Lookup::NotFound }
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

impl ErasedHandler for Router {
    fn call(&self, mut req: Request) -> BoxFuture {
        match self.lookup(req.method(), req.path()) {
            Lookup::Found(route, handler, params) => {
                req.set_params(params);
                let fut = handler.call(req);
                Box::pin(async move {
                    let mut response = fut.await;
                    response.set_route(route);
                    response
                })
            }
            Lookup::MethodNotAllowed => Box::pin(async {
                unmatched(Response::builder().status(Status::MethodNotAllowed).text("Method not allowed"))
            }),
            Lookup::NotFound => Box::pin(async {
                unmatched(Response::builder().status(Status::NotFound).text("Not Found"))
            }),
        }
    }
}

fn unmatched(mut response: Response) -> Response {
    response.set_route(Arc::from(UNMATCHED_ROUTE));
    response
}
