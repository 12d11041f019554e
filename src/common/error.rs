//! Error types for chunkmesh

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Storage Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("No verified copy of chunk {chunk} is reachable")]
    NoVerifiedCopy { chunk: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // === Coordination Errors ===
    #[error("No coordinator endpoint available for service {0}")]
    NoCoordinator(String),

    #[error("Not coordinator: current coordinator is {0}")]
    NotCoordinator(String),

    #[error("Cache error: {0}")]
    Cache(String),

    // === Network Errors ===
    #[error("Peer unavailable: {0}")]
    PeerUnavailable(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Remote error from {node}: {message}")]
    Remote { node: String, message: String },

    #[error("Codec error: {0}")]
    Codec(String),

    // === Metadata Errors ===
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Metadata corrupted: {0}")]
    MetadataCorrupted(String),

    // === Config Errors ===
    #[error("Invalid node identifier: {0}")]
    InvalidNodeId(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::ConnectionFailed(_)
                | Error::PeerUnavailable(_)
                | Error::NoCoordinator(_)
                | Error::NotCoordinator(_)
        )
    }

    /// Is this a fatal configuration error?
    pub fn is_config(&self) -> bool {
        matches!(self, Error::InvalidNodeId(_) | Error::InvalidConfig(_))
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidRequest(_) | Error::InvalidConfig(_) | Error::InvalidNodeId(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::NotCoordinator(_) => StatusCode::MISDIRECTED_REQUEST,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::NoCoordinator(_)
            | Error::PeerUnavailable(_)
            | Error::ConnectionFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::ChecksumMismatch { .. } | Error::NoVerifiedCopy { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_connect() {
            Error::ConnectionFailed(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}
