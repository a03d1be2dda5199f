//! Unified error type.
//!
//! Application-level failures are [`Fault`](crate::Fault)s and flow through
//! the pipeline's error scope. This type surfaces infrastructure failures:
//! binding a port, accepting a connection, reading or parsing config.

use thiserror::Error;

/// The error type returned by strata's fallible operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("config parse: {0}")]
    ConfigParse(#[from] toml::de::Error),
}
