//! Runtime configuration.
//!
//! Every setting is a command-line flag that can also come from the
//! environment. Durations accept `500ms`, `5s`, `2m`, `1h`, or a bare number
//! of seconds.
//!
//! | Variable | Default |
//! |---|---|
//! | `SERVER_HOST` | `0.0.0.0` |
//! | `SERVER_PORT` | `8080` |
//! | `SERVER_READ_TIMEOUT` | `5s` |
//! | `SERVER_WRITE_TIMEOUT` | `10s` |
//! | `SERVER_IDLE_TIMEOUT` | `120s` |
//! | `SERVER_REQUEST_TIMEOUT` | `5s` |
//! | `RATE_LIMIT_RPS` | `10` |
//! | `RATE_LIMIT_BURST` | `20` |
//! | `RATE_LIMIT_SWEEP_INTERVAL` | `5m` |
//! | `RATE_LIMIT_IDLE_RETENTION` | `3m` |
//! | `LOG_FORMAT` | `text` |

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, ValueEnum};

use crate::error::Error;
use crate::limiter::LimiterConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "waypost", version, about = "HTTP server with a request pipeline")]
pub struct Config {
    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub rate_limit: RateLimitConfig,

    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    /// Interface to listen on.
    #[arg(long = "host", env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on.
    #[arg(long = "port", env = "SERVER_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Maximum time to read a request's headers.
    #[arg(long, env = "SERVER_READ_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
    pub read_timeout: Duration,

    /// Maximum time the server waits for the pipeline to produce a response.
    #[arg(long, env = "SERVER_WRITE_TIMEOUT", default_value = "10s", value_parser = parse_duration)]
    pub write_timeout: Duration,

    /// Maximum lifetime of a keep-alive connection.
    #[arg(long, env = "SERVER_IDLE_TIMEOUT", default_value = "120s", value_parser = parse_duration)]
    pub idle_timeout: Duration,

    /// Per-request deadline enforced by the timeout layer.
    #[arg(long, env = "SERVER_REQUEST_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Args)]
pub struct RateLimitConfig {
    /// Sustained requests per second per client.
    #[arg(long = "rate-limit-rps", env = "RATE_LIMIT_RPS", default_value_t = 10.0)]
    pub requests_per_second: f64,

    /// Requests a client may burst above the sustained rate.
    #[arg(long = "rate-limit-burst", env = "RATE_LIMIT_BURST", default_value_t = 20)]
    pub burst: u32,

    /// How often idle clients are swept from the limiter.
    #[arg(long = "rate-limit-sweep-interval", env = "RATE_LIMIT_SWEEP_INTERVAL", default_value = "5m", value_parser = parse_duration)]
    pub sweep_interval: Duration,

    /// How long a client may stay idle before its bucket is swept.
    #[arg(long = "rate-limit-idle-retention", env = "RATE_LIMIT_IDLE_RETENTION", default_value = "3m", value_parser = parse_duration)]
    pub idle_retention: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    /// Checks the values clap cannot check on its own.
    pub fn validate(&self) -> Result<(), Error> {
        let rl = &self.rate_limit;
        if !(rl.requests_per_second.is_finite() && rl.requests_per_second > 0.0) {
            return Err(Error::Config("rate limit rps must be a positive number".into()));
        }
        if rl.burst == 0 {
            return Err(Error::Config("rate limit burst must be at least 1".into()));
        }
        if self.server.request_timeout.is_zero() {
            return Err(Error::Config("request timeout must be non-zero".into()));
        }
        if rl.sweep_interval.is_zero() {
            return Err(Error::Config("sweep interval must be non-zero".into()));
        }
        Ok(())
    }
}

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr, Error> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|source| Error::InvalidAddress { addr, source })
    }
}

impl RateLimitConfig {
    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig {
            requests_per_second: self.requests_per_second,
            burst: self.burst,
            idle_retention: self.idle_retention,
        }
    }
}

/// Parses `500ms`, `5s`, `2m`, `1h`, or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration `{s}`: expected e.g. 500ms, 5s, 2m"))?;

    match unit {
        "ms" => Ok(Duration::from_millis(n)),
        "" | "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n.saturating_mul(60))),
        "h" => Ok(Duration::from_secs(n.saturating_mul(3600))),
        other => Err(format!("invalid duration unit `{other}` in `{s}`")),
    }
}
