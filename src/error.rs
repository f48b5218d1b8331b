//! Error types shared by the playlist pipeline

use std::fmt;
use thiserror::Error;

/// Failure categories surfaced by the fetch/parse pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or empty target URL
    InvalidUrl,
    /// Transport failure or non-200 status
    Network,
    /// Response body is not decodable as text
    InvalidData,
    /// Fetch succeeded but no channel could be extracted
    ParseEmpty,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::InvalidUrl => "Invalid URL",
            ErrorKind::Network => "Network error",
            ErrorKind::InvalidData => "Invalid data",
            ErrorKind::ParseEmpty => "Empty playlist",
        };
        f.write_str(label)
    }
}

/// Pipeline error carrying a kind for structured handling and a message for display
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidUrl, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidData, message)
    }

    pub fn parse_empty(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseEmpty, message)
    }
}

/// Errors raised by the settings store
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Settings I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_message() {
        let err = PipelineError::network("HTTP 404");
        assert_eq!(err.to_string(), "Network error: HTTP 404");
        assert_eq!(err.kind, ErrorKind::Network);
    }

    #[test]
    fn test_constructors_set_kind() {
        assert_eq!(PipelineError::invalid_url("x").kind, ErrorKind::InvalidUrl);
        assert_eq!(PipelineError::invalid_data("x").kind, ErrorKind::InvalidData);
        assert_eq!(PipelineError::parse_empty("x").kind, ErrorKind::ParseEmpty);
    }
}
