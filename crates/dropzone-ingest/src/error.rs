//! Ingestion error taxonomy
//!
//! Per-file errors never escape the fetch-parse pipeline: they are rendered
//! into an [`IngestResult`](crate::pipeline::IngestResult) failure. Only
//! [`IngestError::ClaimStoreUnavailable`] and a failed listing abort a cycle.

use std::time::Duration;
use thiserror::Error;

/// Fixed prefix of the unresolved-document diagnostic. Downstream consumers
/// match on it, so it must not change.
pub const UNRESOLVED_XML_MESSAGE: &str =
    "Unsupported XML for XmlDocument: cannot resolve subtype via namespace";

/// Longest diagnostic carried by a failure result
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Listing or fetching failed on the transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// No marker element matched the root
    #[error("{prefix} (root element <{root}>)", prefix = UNRESOLVED_XML_MESSAGE)]
    UnresolvedXmlType { root: String },

    #[error("Malformed XML: {0}")]
    MalformedXml(String),

    /// A typed field was missing or could not be converted
    #[error("Invalid field <{element}>: {reason}")]
    InvalidField { element: String, reason: String },

    #[error("Fetch and parse exceeded the {}ms budget", .0.as_millis())]
    Timeout(Duration),

    #[error("Claim store unavailable: {0}")]
    ClaimStoreUnavailable(String),

    /// The fetch or parse code panicked
    #[error("worker panicked: {0}")]
    WorkerPanic(String),
}

impl IngestError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        IngestError::Transport(err.to_string())
    }

    pub fn claim_store(err: impl std::fmt::Display) -> Self {
        IngestError::ClaimStoreUnavailable(err.to_string())
    }

    pub fn invalid_field(element: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        IngestError::InvalidField {
            element: element.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable name of the variant, used as the `error.type` span tag
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Transport(_) => "TransportError",
            IngestError::UnresolvedXmlType { .. } => "UnresolvedXmlType",
            IngestError::MalformedXml(_) => "MalformedXml",
            IngestError::InvalidField { .. } => "InvalidField",
            IngestError::Timeout(_) => "TimeoutError",
            IngestError::ClaimStoreUnavailable(_) => "ClaimStoreUnavailable",
            IngestError::WorkerPanic(_) => "WorkerPanic",
        }
    }

    /// Display text cut to [`MAX_ERROR_MESSAGE_CHARS`]
    pub fn diagnostic(&self) -> String {
        truncate_message(&self.to_string(), MAX_ERROR_MESSAGE_CHARS)
    }
}

impl From<quick_xml::Error> for IngestError {
    fn from(err: quick_xml::Error) -> Self {
        match err {
            quick_xml::Error::Io(io) => IngestError::Transport(io.to_string()),
            other => IngestError::MalformedXml(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::ClaimStoreUnavailable(err.to_string())
    }
}

/// Cut `message` to at most `max_chars` characters, on a char boundary
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => message[..byte_idx].to_string(),
        None => message.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_message_prefix() {
        let err = IngestError::UnresolvedXmlType {
            root: "orders".to_string(),
        };
        assert!(err.to_string().starts_with(UNRESOLVED_XML_MESSAGE));
        assert_eq!(err.kind(), "UnresolvedXmlType");
    }

    #[test]
    fn test_diagnostic_is_bounded() {
        let err = IngestError::MalformedXml("x".repeat(2_000));
        assert_eq!(err.diagnostic().chars().count(), MAX_ERROR_MESSAGE_CHARS);

        let short = IngestError::Timeout(Duration::from_millis(1500));
        assert_eq!(short.diagnostic(), "Fetch and parse exceeded the 1500ms budget");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "é".repeat(600);
        let cut = truncate_message(&text, 500);
        assert_eq!(cut.chars().count(), 500);
        assert_eq!(truncate_message("short", 500), "short");
    }
}
