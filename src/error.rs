use thiserror::Error;

/// A payload arrived but did not have the shape we expected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(String),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` has unexpected value: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Failures talking to the node or the transactions service.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("unexpected response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: DecodeError,
    },
}

/// Local key/value persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode value for key {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("notification permission denied")]
    PermissionDenied,
    #[error("address is empty")]
    EmptyAddress,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("no active wallet")]
    NoIdentity,
    #[error("invalid seed: {0}")]
    InvalidSeed(&'static str),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("amount must be a whole number, got {0:?}")]
    InvalidAmount(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

/// A command line that could not be understood
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`, press ? for help")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}
