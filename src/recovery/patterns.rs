//! Error pattern classification
//!
//! Errors raised inside this crate carry their category in the variant. Messages
//! coming back from an external driver are matched against a fixed table, in
//! order; the first hit wins.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::GuardError;

/// Recoverable error category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorPattern {
    ConnectionLost,
    ConnectionRefused,
    Timeout,
    PoolExhausted,
    SslError,
    DnsError,
}

impl ErrorPattern {
    pub const ALL: [ErrorPattern; 6] = [
        ErrorPattern::ConnectionLost,
        ErrorPattern::ConnectionRefused,
        ErrorPattern::Timeout,
        ErrorPattern::PoolExhausted,
        ErrorPattern::SslError,
        ErrorPattern::DnsError,
    ];
}

impl std::fmt::Display for ErrorPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorPattern::ConnectionLost => write!(f, "CONNECTION_LOST"),
            ErrorPattern::ConnectionRefused => write!(f, "CONNECTION_REFUSED"),
            ErrorPattern::Timeout => write!(f, "TIMEOUT"),
            ErrorPattern::PoolExhausted => write!(f, "POOL_EXHAUSTED"),
            ErrorPattern::SslError => write!(f, "SSL_ERROR"),
            ErrorPattern::DnsError => write!(f, "DNS_ERROR"),
        }
    }
}

static MESSAGE_PATTERNS: Lazy<Vec<(ErrorPattern, Regex)>> = Lazy::new(|| {
    [
        (
            ErrorPattern::ConnectionLost,
            r"(?i)connection (terminated|lost|closed|reset)|ECONNRESET|server closed the connection|broken pipe",
        ),
        (
            ErrorPattern::ConnectionRefused,
            r"(?i)ECONNREFUSED|connection refused",
        ),
        (
            ErrorPattern::Timeout,
            r"(?i)timeout|timed out|ETIMEDOUT",
        ),
        (
            ErrorPattern::PoolExhausted,
            r"(?i)pool (is )?exhausted|too many (clients|connections)|remaining connection slots",
        ),
        (
            ErrorPattern::SslError,
            r"(?i)\bssl\b|\btls\b|certificate",
        ),
        (
            ErrorPattern::DnsError,
            r"(?i)ENOTFOUND|EAI_AGAIN|getaddrinfo|failed to lookup address|name resolution",
        ),
    ]
    .into_iter()
    .map(|(pattern, re)| (pattern, Regex::new(re).expect("static error pattern")))
    .collect()
});

/// First pattern in table order whose expression matches `message`
pub fn match_message(message: &str) -> Option<ErrorPattern> {
    MESSAGE_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(message))
        .map(|(pattern, _)| *pattern)
}

/// Category of `error`, or `None` when it must not be auto-recovered
pub fn classify(error: &GuardError) -> Option<ErrorPattern> {
    if let Some(kind) = error.kind() {
        return Some(kind);
    }
    match error {
        GuardError::Database(msg) | GuardError::InternalError(msg) => match_message(msg),
        GuardError::IoError(e) => match_message(&e.to_string()),
        _ => None,
    }
}
