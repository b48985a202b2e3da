//! Persisted scan records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generated persona for a scanned object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spirit {
    /// Unique identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Object type the spirit represents.
    pub object_type: String,
    /// Personality derived from the age bucket.
    pub personality: String,
    /// Self-introduction line.
    pub intro: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// One scan and its quiz state.
///
/// Transitions from not-captured to captured at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSession {
    /// Unique identifier.
    pub id: String,
    /// Child identifier.
    pub child_id: String,
    /// Child age at scan time.
    pub child_age: u32,
    /// Object type, fixed at creation.
    pub object_type: String,
    /// Spirit attached to the cached content.
    pub spirit_id: String,
    /// Quiz question.
    pub quiz_question: String,
    /// Expected answer, lowercased.
    pub quiz_answer: String,
    /// Fact shown with the quiz.
    pub fact: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Whether the content came from the cache.
    pub cache_hit: bool,
    /// Whether the quiz was answered correctly.
    pub captured: bool,
    /// When the session was captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
    /// Last normalized answer given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_given: Option<String>,
}

/// Append-only record of a collected spirit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    /// Unique identifier.
    pub id: String,
    /// Child identifier.
    pub child_id: String,
    /// Spirit identifier.
    pub spirit_id: String,
    /// Spirit name at capture time.
    pub spirit_name: String,
    /// Object type.
    pub object_type: String,
    /// Fact learned.
    pub fact: String,
    /// Capture time.
    pub captured_at: DateTime<Utc>,
}
