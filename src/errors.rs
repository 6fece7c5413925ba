//! Error types shared across the crate.
//!
//! The wire codec reports parse failures as a plain [`std::io::Error`]
//! built with [`bail!`]; everything above the codec (rule engine,
//! upstream clients, configuration) gets its own [`thiserror`] variant
//! so the forwarder can decide, without downcasting, how to answer the
//! client.

use thiserror::Error;

/// Constructs and returns an `io::Error` of the given `ErrorKind`. Used
/// throughout the wire codec where a `std::io::Result` is the natural
/// error type for `Read`/`Seek`-based parsing.
#[macro_export]
macro_rules! bail {
    ($kind:ident, $($arg:tt)*) => {
        return Err(
            ::std::io::Error::new(::std::io::ErrorKind::$kind, format!($($arg)*))
        )
    };
}

/// Error produced while decoding a DNS message from the wire.
pub type ParseError = std::io::Error;

/// Failure contacting or validating a response from an upstream endpoint.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("{endpoint}: connect failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{endpoint}: timed out after {elapsed:?}")]
    Timeout { endpoint: String, elapsed: std::time::Duration },

    #[error("{endpoint}: socks5 proxy failure: {reason}")]
    Proxy { endpoint: String, reason: String },

    #[error("{endpoint}: unexpected content-type '{content_type}'")]
    BadContentType { endpoint: String, content_type: String },

    #[error("{endpoint}: unexpected HTTP status {status}")]
    BadStatus { endpoint: String, status: u16 },

    #[error("{endpoint}: response did not validate against the request: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("all {attempted} attempt(s) against group '{group}' failed")]
    Exhausted { group: String, attempted: usize },

    #[error("{endpoint}: {source}")]
    Io { endpoint: String, source: std::io::Error },
}

/// Failure loading or validating `appsettings.json`.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("rule '{rule}' references unknown dnsServer '{group}'")]
    DanglingRule { rule: String, group: String },

    #[error("dnsServer '{group}' references unknown proxy '{proxy}'")]
    DanglingProxy { group: String, proxy: String },

    #[error("dnsServer '{group}' has no forwarderAddresses")]
    EmptyGroup { group: String },

    #[error("proxyServer '{proxy}' has unsupported type '{kind}'")]
    UnsupportedProxyType { proxy: String, kind: String },
}

/// Failure loading or querying the geosite blob.
#[derive(Error, Debug)]
pub enum GeositeError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed geosite entry: {0}")]
    Malformed(String),

    #[error("invalid regex pattern '{pattern}': {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
