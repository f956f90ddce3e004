use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure at the provider boundary.
///
/// The five variants are mutually exclusive and cover every way a backend
/// call can fail, so callers never handle an untyped error.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderError {
    #[error("authentication failed: {message}")]
    Authentication { message: String },
    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        #[serde(rename = "retryAfterSecs", skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
    #[error("connection failed: {message}")]
    Connection { message: String },
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("{message}")]
    Unclassified { message: String },
}

impl ProviderError {
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn unclassified(message: impl Display) -> Self {
        Self::Unclassified {
            message: message.to_string(),
        }
    }

    pub fn aborted() -> Self {
        Self::unclassified("request aborted")
    }

    /// Classifies a non-success HTTP response.
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: impl Into<String>) -> Self {
        let message = body.into();
        match status {
            401 | 403 => Self::Authentication { message },
            429 => Self::RateLimit {
                message,
                retry_after_secs: retry_after.map(|duration| duration.as_secs()),
            },
            _ => Self::Status { status, message },
        }
    }

    pub fn from_transport(error: &reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return Self::from_status(status.as_u16(), None, error.to_string());
        }
        if error.is_connect() || error.is_timeout() || error.is_request() || error.is_body() {
            return Self::connection(error.to_string());
        }
        Self::unclassified(error)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "authentication",
            Self::RateLimit { .. } => "rate_limit",
            Self::Connection { .. } => "connection",
            Self::Status { .. } => "status",
            Self::Unclassified { .. } => "unclassified",
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit {
                retry_after_secs, ..
            } => retry_after_secs.map(Duration::from_secs),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Authentication { .. } | Self::RateLimit { .. } => None,
            Self::Connection { .. } | Self::Unclassified { .. } => None,
        }
    }

    pub fn as_compact_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"kind\":\"unclassified\",\"message\":\"{}\"}}",
                self.to_string().replace('\"', "\\\"")
            )
        })
    }
}

/// Parses a `retry-after` header given in whole seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Why an event stream ended without resolving.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream cancelled")]
    Cancelled,
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_status_maps_auth_and_rate_limit_codes() {
        assert_eq!(
            ProviderError::from_status(401, None, "bad key").kind(),
            "authentication"
        );
        assert_eq!(
            ProviderError::from_status(403, None, "forbidden").kind(),
            "authentication"
        );

        let limited = ProviderError::from_status(429, Some(Duration::from_secs(12)), "slow down");
        assert_eq!(limited.kind(), "rate_limit");
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(12)));

        let server = ProviderError::from_status(503, None, "overloaded");
        assert_eq!(server.status(), Some(503));
        assert_eq!(server.to_string(), "HTTP 503: overloaded");
    }

    #[test]
    fn parse_retry_after_accepts_whole_seconds_only() {
        assert_eq!(parse_retry_after(" 7 "), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn compact_json_is_tagged_by_kind() {
        let json = ProviderError::from_status(429, Some(Duration::from_secs(3)), "busy")
            .as_compact_json();
        assert_eq!(
            json,
            r#"{"kind":"rate_limit","message":"busy","retryAfterSecs":3}"#
        );
    }
}
