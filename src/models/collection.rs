//! Knowledge base entries and collection views.

use super::Capture;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Static quiz item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizItem {
    /// Question text.
    pub question: String,
    /// Expected answer.
    pub answer: String,
}

/// Seed knowledge for a well-known object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    /// Canonical object type.
    pub object_type: String,
    /// Child-facing display name.
    pub display_name: String,
    /// Labels that resolve to this object type.
    pub aliases: Vec<String>,
    /// Facts to pick from.
    pub facts: Vec<String>,
    /// Quiz items to pick from.
    pub quiz: Vec<QuizItem>,
}

/// Collection badge definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeRule {
    /// Unique identifier.
    pub id: String,
    /// Category used for ordering.
    pub category_id: String,
    /// Display name.
    pub name: String,
    /// Category code matched against object types.
    pub code: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// What counts toward progress.
    #[serde(default)]
    pub record_scope: String,
    /// Human-readable unlock rule.
    #[serde(default)]
    pub rule: String,
    /// Configured target, used when there are no examples or keywords.
    #[serde(default)]
    pub target: usize,
    /// Artwork file name.
    #[serde(default)]
    pub image_file: String,
    /// Artwork URL.
    #[serde(default)]
    pub image_url: String,
    /// Matching keywords.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Example objects; one distinct capture each unlocks the badge.
    #[serde(default)]
    pub examples: Vec<String>,
}

/// Badge joined with a child's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PokedexBadge {
    /// Badge identifier.
    pub id: String,
    /// Category used for ordering.
    pub category_id: String,
    /// Display name.
    pub name: String,
    /// Category code.
    pub code: String,
    /// Description.
    pub description: String,
    /// What counts toward progress.
    pub record_scope: String,
    /// Human-readable unlock rule.
    pub rule: String,
    /// Artwork URL.
    pub image_url: String,
    /// Artwork file name.
    pub image_file: String,
    /// `progress >= target`.
    pub unlocked: bool,
    /// Distinct matched object tokens.
    pub progress: usize,
    /// Required distinct objects.
    pub target: usize,
    /// Example objects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

/// Captures aggregated per spirit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PokedexEntry {
    /// Spirit identifier.
    pub spirit_id: String,
    /// Spirit name.
    pub spirit_name: String,
    /// Object type.
    pub object_type: String,
    /// Number of captures.
    pub captures: usize,
    /// Most recent capture time.
    pub last_seen_at: DateTime<Utc>,
}

/// Summary of one day's collecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyReport {
    /// Calendar day (UTC).
    pub date: NaiveDate,
    /// Child identifier.
    pub child_id: String,
    /// Number of captures that day.
    pub total_captured: usize,
    /// The captures, newest first.
    pub captures: Vec<Capture>,
    /// Distinct facts, sorted.
    pub knowledge_points: Vec<String>,
    /// Summary sentence.
    pub generated_text: String,
    /// Report generation time.
    pub generated_at: DateTime<Utc>,
}
