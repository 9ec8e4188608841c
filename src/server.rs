//! HTTP server and graceful shutdown.
//!
//! On **SIGTERM** or **Ctrl-C** the server:
//! 1. stops `listener.accept()` immediately;
//! 2. asks every open connection to close once its in-flight request is
//!    answered;
//! 3. waits up to the shutdown grace period (30 s) for them, then returns
//!    from [`Server::serve`] so `main` can exit.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::method::Method;
use crate::pipeline::Pipeline;
use crate::request::Request;
use crate::response::Response;
use crate::sink::{HttpWriter, StatusRecorder};
use crate::status::Status;

/// How long a shutdown waits for open connections to drain.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Connection-level time limits.
#[derive(Debug, Clone, Copy)]
struct Limits {
    read_timeout: Duration,
    write_timeout: Duration,
    idle_timeout: Duration,
}

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
    limits: Limits,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called, with the default 5 s / 10 s / 120 s read, write and idle
    /// timeouts.
    ///
    /// ```rust,no_run
    /// use waypost::Server;
    /// let server = Server::bind("0.0.0.0:8080")?;
    /// # Ok::<(), waypost::Error>(())
    /// ```
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let addr = addr.parse().map_err(|source| Error::InvalidAddress {
            addr: addr.to_owned(),
            source,
        })?;
        Ok(Self {
            addr,
            limits: Limits {
                read_timeout: Duration::from_secs(5),
                write_timeout: Duration::from_secs(10),
                idle_timeout: Duration::from_secs(120),
            },
        })
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self, Error> {
        Ok(Self {
            addr: config.addr()?,
            limits: Limits {
                read_timeout: config.read_timeout,
                write_timeout: config.write_timeout,
                idle_timeout: config.idle_timeout,
            },
        })
    }

    /// Serves `pipeline` until SIGTERM or Ctrl-C, then drains.
    pub async fn serve(self, pipeline: Pipeline) -> Result<(), Error> {
        self.serve_with_shutdown(pipeline, shutdown_signal()).await
    }

    /// Like [`serve`](Self::serve), but stops when `signal` resolves.
    pub async fn serve_with_shutdown(
        self,
        pipeline: Pipeline,
        signal: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        let pipeline = Arc::new(pipeline);
        let limits = self.limits;
        let shutdown = CancellationToken::new();

        info!(addr = %self.addr, "waypost listening");

        // JoinSet tracks every connection task so shutdown can wait for them.
        let mut tasks = tokio::task::JoinSet::new();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Check shutdown first so a SIGTERM stops accepting even if
                // more connections are queued.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };
                    let pipeline = Arc::clone(&pipeline);
                    let shutdown = shutdown.clone();
                    tasks.spawn(serve_connection(stream, remote_addr, pipeline, limits, shutdown));
                }

                // Reap finished connection tasks so the JoinSet stays small.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        shutdown.cancel();
        let drain = async { while tasks.join_next().await.is_some() {} };
        if tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, drain).await.is_err() {
            warn!(remaining = tasks.len(), "grace period elapsed, dropping open connections");
            tasks.abort_all();
        }

        info!("waypost stopped");
        Ok(())
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

async fn serve_connection(
    stream: tokio::net::TcpStream,
    remote_addr: SocketAddr,
    pipeline: Arc<Pipeline>,
    limits: Limits,
    shutdown: CancellationToken,
) {
    let io = TokioIo::new(stream);
    // Called once per request on the connection, not once per connection.
    let svc = service_fn(move |req| dispatch(Arc::clone(&pipeline), req, remote_addr, limits.write_timeout));

    let mut builder = ConnBuilder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(limits.read_timeout);

    let conn = builder.serve_connection(io, svc);
    tokio::pin!(conn);

    let lifetime = tokio::time::sleep(limits.idle_timeout);
    tokio::pin!(lifetime);

    let result = tokio::select! {
        res = conn.as_mut() => res,
        () = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
        () = &mut lifetime => {
            debug!(peer = %remote_addr, "connection lifetime reached, closing");
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(e) = result {
        debug!(peer = %remote_addr, "connection error: {e}");
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Hot path: buffers one request, runs it through the pipeline, and writes
/// the single response.
///
/// The error type is [`Infallible`]: every failure becomes a response.
async fn dispatch(
    pipeline: Arc<Pipeline>,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
    write_timeout: Duration,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();

    let Ok(method) = Method::try_from(&parts.method) else {
        return Ok(finish(Response::builder().status(Status::MethodNotAllowed).text("Method not allowed")));
    };

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(peer = %remote_addr, "failed to read request body: {e}");
            return Ok(finish(Response::builder().status(Status::BadRequest).text("Bad Request")));
        }
    };

    let headers = parts.headers.iter()
        .filter_map(|(k, v)| Some((k.as_str().to_owned(), v.to_str().ok()?.to_owned())))
        .collect();
    let request = Request::from_parts(method, parts.uri.path().to_owned(), headers, body, remote_addr);

    // Cancels the request context when this future finishes or is dropped
    // because the client went away.
    let _cancel_on_exit = request.context().cancellation().clone().drop_guard();

    let response = match tokio::time::timeout(write_timeout, pipeline.handle(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(peer = %remote_addr, "write timeout elapsed before a response was ready");
            Response::builder().status(Status::ServiceUnavailable).text("Service Unavailable")
        }
    };

    Ok(finish(response))
}

fn finish(response: Response) -> http::Response<Full<Bytes>> {
    let mut recorder = StatusRecorder::new(HttpWriter::new());
    response.write_to(&mut recorder);
    debug!(status = recorder.status_code(), bytes = recorder.size(), "response written");
    recorder.into_inner().finish()
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives: SIGTERM or
/// SIGINT on Unix, Ctrl-C elsewhere.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    // On non-Unix platforms the SIGTERM arm never resolves.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_rejects_malformed_addresses() {
        assert!(matches!(Server::bind("nope"), Err(Error::InvalidAddress { .. })));
        assert!(Server::bind("127.0.0.1:0").is_ok());
    }

    #[tokio::test]
    async fn finish_preserves_status_headers_and_body() {
        let resp = finish(
            Response::builder()
                .status(Status::TooManyRequests)
                .header("retry-after", "1")
                .text("Rate limit exceeded"),
        );
        assert_eq!(resp.status(), http::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()["retry-after"], "1");
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"Rate limit exceeded");
    }

    #[tokio::test]
    async fn serve_stops_on_the_shutdown_signal() {
        let pipeline = Pipeline::builder(crate::Router::new()).build();
        let server = Server::bind("127.0.0.1:0").unwrap();
        server.serve_with_shutdown(pipeline, async {}).await.unwrap();
    }
}
