//! Error types for the marketplace reader.

use std::fmt;

/// Marketplace reader error type.
#[derive(Debug)]
pub enum Error {
    /// Configuration error.
    Config(String),
    /// Contract call or RPC transport error.
    Contract(String),
    /// Token metadata could not be fetched or parsed.
    Metadata { uri: String, reason: String },
    /// Snapshot store error (MongoDB or file).
    Store(String),
    /// Bad user input (CLI arguments, prices, bids).
    InvalidInput(String),
    /// An on-chain integer did not fit the target type.
    Overflow(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn metadata(uri: &str, reason: impl Into<String>) -> Self {
        Error::Metadata {
            uri: uri.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "config error: {msg}"),
            Error::Contract(msg) => write!(f, "contract error: {msg}"),
            Error::Metadata { uri, reason } => write!(f, "metadata error for {uri}: {reason}"),
            Error::Store(msg) => write!(f, "store error: {msg}"),
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::Overflow(msg) => write!(f, "overflow: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<mongodb::error::Error> for Error {
    fn from(err: mongodb::error::Error) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Store(format!("json: {err}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Store(format!("io: {err}"))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let uri = err.url().map(|u| u.to_string()).unwrap_or_default();
        Error::Metadata {
            uri,
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_variant() {
        assert_eq!(
            Error::Config("missing rpc_url".into()).to_string(),
            "config error: missing rpc_url"
        );
        assert_eq!(
            Error::metadata("ipfs://abc", "HTML, not JSON").to_string(),
            "metadata error for ipfs://abc: HTML, not JSON"
        );
    }
}
