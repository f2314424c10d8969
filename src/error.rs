use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::time::Duration;
use thiserror::Error;

use crate::recovery::ErrorPattern;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Circuit breaker is OPEN after {failures} failures, next attempt in {retry_after_ms}ms")]
    CircuitOpen { failures: u32, retry_after_ms: u64 },

    #[error("Operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// A socket operation the OS gave up on; no deadline of ours was involved
    #[error("Socket timed out: {0}")]
    SocketTimeout(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Connection pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("SSL/TLS error: {0}")]
    Tls(String),

    #[error("DNS resolution failed: {0}")]
    Dns(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Unknown connection '{0}'")]
    UnknownConnection(String),

    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type GuardResult<T> = Result<T, GuardError>;

impl GuardError {
    /// The recoverable category carried by the variant itself, if any.
    ///
    /// Errors built from driver messages (`Database`, `InternalError`, `IoError`)
    /// carry no tag; `recovery::classify` falls back to message matching for those.
    pub fn kind(&self) -> Option<ErrorPattern> {
        match self {
            GuardError::ConnectionLost(_) => Some(ErrorPattern::ConnectionLost),
            GuardError::ConnectionRefused(_) => Some(ErrorPattern::ConnectionRefused),
            GuardError::Timeout(_) | GuardError::SocketTimeout(_) => Some(ErrorPattern::Timeout),
            GuardError::PoolExhausted(_) => Some(ErrorPattern::PoolExhausted),
            GuardError::Tls(_) => Some(ErrorPattern::SslError),
            GuardError::Dns(_) => Some(ErrorPattern::DnsError),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, GuardError::CircuitOpen { .. })
    }

    /// Map a socket-level error onto the tagged variants.
    pub fn from_io(err: std::io::Error, target: &str) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused => {
                GuardError::ConnectionRefused(format!("{}: {}", target, err))
            }
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::NotConnected => GuardError::ConnectionLost(format!("{}: {}", target, err)),
            ErrorKind::TimedOut => GuardError::SocketTimeout(format!("{}: {}", target, err)),
            _ => GuardError::IoError(err),
        }
    }
}

impl Clone for GuardError {
    fn clone(&self) -> Self {
        match self {
            GuardError::CircuitOpen {
                failures,
                retry_after_ms,
            } => GuardError::CircuitOpen {
                failures: *failures,
                retry_after_ms: *retry_after_ms,
            },
            GuardError::Timeout(d) => GuardError::Timeout(*d),
            GuardError::SocketTimeout(m) => GuardError::SocketTimeout(m.clone()),
            GuardError::ConnectionLost(m) => GuardError::ConnectionLost(m.clone()),
            GuardError::ConnectionRefused(m) => GuardError::ConnectionRefused(m.clone()),
            GuardError::PoolExhausted(m) => GuardError::PoolExhausted(m.clone()),
            GuardError::Tls(m) => GuardError::Tls(m.clone()),
            GuardError::Dns(m) => GuardError::Dns(m.clone()),
            GuardError::Database(m) => GuardError::Database(m.clone()),
            GuardError::UnknownConnection(m) => GuardError::UnknownConnection(m.clone()),
            GuardError::UnknownTool(m) => GuardError::UnknownTool(m.clone()),
            GuardError::Config(m) => GuardError::Config(m.clone()),
            // io and serde errors are not Clone; keep kind and message
            GuardError::IoError(e) => GuardError::IoError(std::io::Error::new(e.kind(), e.to_string())),
            GuardError::JsonError(e) => GuardError::InternalError(e.to_string()),
            GuardError::InternalError(m) => GuardError::InternalError(m.clone()),
        }
    }
}

impl serde::Serialize for GuardError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let status = match &self {
            GuardError::CircuitOpen { .. } | GuardError::PoolExhausted(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GuardError::Timeout(_) | GuardError::SocketTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GuardError::UnknownConnection(_) | GuardError::UnknownTool(_) => StatusCode::NOT_FOUND,
            GuardError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16(),
            "type": format!("{:?}", self).split([' ', '(', '{']).next().unwrap_or("Error")
        });

        (status, Json(body)).into_response()
    }
}
