//! `waypost` server binary: the demo handlers behind the full pipeline.
//!
//! Run with:
//!   RUST_LOG=info cargo run
//!
//! Try:
//!   curl -i http://localhost:8080/
//!   curl -i http://localhost:8080/api/v1/users
//!   curl -i -X POST http://localhost:8080/api/v1/users -d '{"name":"Carol"}'
//!   curl -i http://localhost:8080/slow      # 504 after the request deadline
//!   curl -i http://localhost:8080/panic     # 500, server keeps running
//!   curl    http://localhost:8080/metrics

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use waypost::config::{Config, LogFormat};
use waypost::{Metrics, Pipeline, RateLimiter, Router, Server, handlers, health};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    init_tracing(config.log_format);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn run(config: Config) -> Result<(), waypost::Error> {
    config.validate()?;

    let metrics = Arc::new(Metrics::new());
    let limiter = Arc::new(RateLimiter::new(config.rate_limit.limiter_config()));
    let sweeper = limiter.spawn_sweeper(config.rate_limit.sweep_interval)?;

    let app = Router::new()
        .get("/", handlers::home)
        .get("/health", health::liveness)
        .get("/readyz", health::readiness)
        .get("/api/v1/users", handlers::list_users)
        .post("/api/v1/users", handlers::create_user)
        .get("/metrics", handlers::metrics_report(Arc::clone(&metrics)))
        .get("/panic", handlers::panic)
        .get("/slow", handlers::slow);

    let pipeline = Pipeline::builder(app)
        .metrics(metrics)
        .rate_limiter(limiter)
        .timeout(config.server.request_timeout)
        .build();

    info!(
        request_timeout = ?config.server.request_timeout,
        rps = config.rate_limit.requests_per_second,
        burst = config.rate_limit.burst,
        "pipeline ready"
    );

    let result = Server::from_config(&config.server)?.serve(pipeline).await;
    sweeper.abort();
    result
}
