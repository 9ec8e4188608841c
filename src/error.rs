//! Unified error type.

use thiserror::Error;

/// The error type returned by waypost's fallible operations.
///
/// Application-level outcomes (404, 429, 504, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// infrastructure failures: configuration, binding to a port, accepting a
/// connection.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid listen address `{addr}`: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}
