//! # Cityling
//!
//! Generative-content gateway and scan/answer orchestration for a
//! city-exploration learning app.
//!
//! A child scans a real-world object; cityling identifies it, produces a
//! short fact and quiz, judges the answer, and can drive a companion
//! character with generated dialogue, a portrait, and synthesized speech.
//!
//! ## Layers
//!
//! - [`llm`]: provider clients (chat/vision gateway, image and voice adapters)
//!   plus the response normalizer that tolerates noisy model output
//! - [`rendering`]: external rule-template rendering and age-layer phrasing
//! - [`services`]: content cache, scan/answer orchestration, companion flow,
//!   collection queries and badge matching
//! - [`storage`]: the [`storage::Store`] contract with in-memory and `SQLite`
//!   implementations
//!
//! ## Example
//!
//! ```rust,ignore
//! use cityling::services::{ScanRequest, ScanService};
//! use cityling::storage::MemoryStore;
//! use std::sync::Arc;
//!
//! let service = ScanService::new(Arc::new(MemoryStore::new()));
//! let scan = service.scan(&ScanRequest::with_label("mailbox", 8))?;
//! println!("{}", scan.quiz);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod llm;
pub mod models;
pub mod observability;
pub mod rendering;
pub mod services;
pub mod storage;

pub use config::CitylingConfig;
pub use llm::{GenerativeGateway, GenerativeProvider, ImageAdapter, VoiceAdapter};
pub use models::{
    AgeBucket, AnswerJudgeResult, Capture, CompanionReply, CompanionScene, LearningContent,
    RecognizeResult, ScanSession, Spirit,
};
pub use services::{CollectionService, CompanionService, ContentCache, ScanService};
pub use storage::{MemoryStore, SqliteStore, Store};

/// Provider capability that may be left unconfigured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Image recognition.
    Vision,
    /// Text generation (learning content, judging, companion dialogue).
    Text,
    /// Character image generation.
    Image,
    /// Speech synthesis.
    Voice,
    /// Binary asset upload.
    Upload,
}

impl Capability {
    /// Returns the capability name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vision => "vision",
            Self::Text => "text",
            Self::Image => "image",
            Self::Voice => "voice",
            Self::Upload => "upload",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for cityling operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `CapabilityUnavailable` | No credentials/model configured for a provider |
/// | `UpstreamRequestFailed` | Transport error, timeout, or non-2xx status from a provider |
/// | `InvalidResponse` | Required fields still empty after every recovery strategy |
/// | `InvalidInput` | Malformed caller input not covered by a dedicated variant |
/// | `InvalidChildAge` .. `ChildMessageMissing` | Domain validation of scan/companion requests |
/// | `SessionNotFound` / `AlreadyCaptured` | Answer submission against a bad session |
/// | `MediaUnavailable` | Companion portrait or voice cannot be produced |
/// | `OperationFailed` | Storage, configuration, or I/O failure |
#[derive(Debug, ThisError)]
pub enum Error {
    /// A provider capability is not configured.
    ///
    /// Raised when:
    /// - No API key is set for the chat/vision endpoint
    /// - Image or voice credentials (or voice model) are missing
    /// - Image recognition is requested without a configured provider
    ///
    /// Never retried; callers degrade gracefully.
    #[error("{0} capability is not configured")]
    CapabilityUnavailable(Capability),

    /// An upstream provider call failed.
    ///
    /// Raised when:
    /// - The HTTP transport errors or times out
    /// - The provider returns a non-2xx status
    /// - The provider reports an error object or non-OK code in its body
    /// - Every voice candidate is rejected
    #[error("upstream request '{operation}' failed{}: {cause}", status_suffix(.status))]
    UpstreamRequestFailed {
        /// The operation that failed.
        operation: String,
        /// HTTP status, when one was received.
        status: Option<u16>,
        /// The underlying cause.
        cause: String,
    },

    /// The provider answered but the payload is unusable.
    ///
    /// Raised when:
    /// - Required fields are empty after JSON and regex recovery
    /// - No image or audio payload is present in a media response
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - Speech synthesis receives empty text
    /// - A data URI cannot be decoded
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Child age outside the supported 3..=15 range.
    #[error("child_age must be between 3 and 15, got {0}")]
    InvalidChildAge(u32),

    /// Companion request without an object type.
    #[error("object_type is required")]
    ObjectTypeMissing,

    /// Companion chat without a child message.
    #[error("child_message is required")]
    ChildMessageMissing,

    /// Scan without a usable label or image.
    ///
    /// Raised when the detected label is empty or recognition returned `unknown`.
    #[error("a detected label or an image is required to scan")]
    ScanInputRequired,

    /// Image recognition without an image.
    #[error("image_base64 or image_url is required")]
    ImageRequired,

    /// Answer submitted for an unknown session.
    #[error("scan session '{0}' not found")]
    SessionNotFound(String),

    /// Answer submitted for a session that is already captured.
    #[error("scan session '{0}' is already captured")]
    AlreadyCaptured(String),

    /// Companion media (portrait or voice) is unavailable.
    #[error("companion media is unavailable")]
    MediaUnavailable,

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` or in-memory store operations fail
    /// - Configuration files cannot be read or parsed
    /// - Logging initialization fails
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

#[allow(clippy::ref_option)]
fn status_suffix(status: &Option<u16>) -> String {
    status.map_or_else(String::new, |code| format!(" (status {code})"))
}

/// Outward classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Capability or media not available.
    Unavailable,
    /// Caller supplied bad input.
    BadInput,
    /// Referenced entity does not exist.
    NotFound,
    /// State conflict (already captured).
    Conflict,
    /// Upstream provider failure or unusable payload.
    Upstream,
    /// Internal failure.
    Internal,
}

impl Error {
    /// Classifies this error for callers that need a coarse signal.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::CapabilityUnavailable(_) | Self::MediaUnavailable => ErrorKind::Unavailable,
            Self::InvalidInput(_)
            | Self::InvalidChildAge(_)
            | Self::ObjectTypeMissing
            | Self::ChildMessageMissing
            | Self::ScanInputRequired
            | Self::ImageRequired => ErrorKind::BadInput,
            Self::SessionNotFound(_) => ErrorKind::NotFound,
            Self::AlreadyCaptured(_) => ErrorKind::Conflict,
            Self::UpstreamRequestFailed { .. } | Self::InvalidResponse(_) => ErrorKind::Upstream,
            Self::OperationFailed { .. } => ErrorKind::Internal,
        }
    }

    /// Builds an [`Error::UpstreamRequestFailed`] without a status.
    pub fn upstream(operation: impl Into<String>, cause: impl ToString) -> Self {
        Self::UpstreamRequestFailed {
            operation: operation.into(),
            status: None,
            cause: cause.to_string(),
        }
    }

    /// Builds an [`Error::OperationFailed`].
    pub fn operation(operation: impl Into<String>, cause: impl ToString) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for cityling operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("empty text".to_string());
        assert_eq!(err.to_string(), "invalid input: empty text");

        let err = Error::operation("save_session", "disk full");
        assert_eq!(err.to_string(), "operation 'save_session' failed: disk full");

        let err = Error::CapabilityUnavailable(Capability::Voice);
        assert_eq!(err.to_string(), "voice capability is not configured");
    }

    #[test]
    fn test_upstream_display_includes_status() {
        let err = Error::UpstreamRequestFailed {
            operation: "chat_completion".to_string(),
            status: Some(502),
            cause: "bad gateway".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "upstream request 'chat_completion' failed (status 502): bad gateway"
        );

        let err = Error::upstream("chat_completion", "timed out");
        assert_eq!(
            err.to_string(),
            "upstream request 'chat_completion' failed: timed out"
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::CapabilityUnavailable(Capability::Text).kind(),
            ErrorKind::Unavailable
        );
        assert_eq!(Error::InvalidChildAge(2).kind(), ErrorKind::BadInput);
        assert_eq!(
            Error::SessionNotFound("s".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            Error::AlreadyCaptured("s".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            Error::InvalidResponse("x".into()).kind(),
            ErrorKind::Upstream
        );
        assert_eq!(Error::operation("a", "b").kind(), ErrorKind::Internal);
    }
}
