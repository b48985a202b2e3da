//! Provider-facing request and result types.

use serde::{Deserialize, Serialize};

/// Output of image recognition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognizeResult {
    /// Canonical lowercase object token; may be `"unknown"`.
    pub object_type: String,
    /// Label as the model phrased it.
    pub raw_label: String,
    /// One-line recognition rationale.
    pub reason: String,
}

/// Generated teaching bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningContent {
    /// One-sentence fact.
    pub fact: String,
    /// Quiz question.
    pub quiz_question: String,
    /// Expected short answer.
    pub quiz_answer: String,
    /// Spirit dialogue lines, blanks removed.
    pub dialogues: Vec<String>,
}

/// Semantic judgement of a free-text answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerJudgeResult {
    /// Whether the answer is accepted.
    pub correct: bool,
    /// Short rationale.
    pub reason: String,
}

/// Opening scene for a companion character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionScene {
    /// Character name.
    pub character_name: String,
    /// Character personality.
    pub personality: String,
    /// Spoken opening line(s).
    pub dialog_text: String,
    /// Prompt for the portrait.
    pub image_prompt: String,
}

/// A single companion reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionReply {
    /// Spoken reply text.
    pub reply_text: String,
}

/// Input for companion scene generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionSceneRequest {
    /// Object the companion embodies.
    pub object_type: String,
    /// Child age.
    pub child_age: u32,
    /// Weather description; defaulted when empty.
    #[serde(default)]
    pub weather: String,
    /// Environment description; defaulted when empty.
    #[serde(default)]
    pub environment: String,
    /// Object traits; defaulted when empty.
    #[serde(default)]
    pub object_traits: String,
    /// Prior turns, oldest first.
    #[serde(default)]
    pub history: Vec<String>,
}

/// Input for a companion reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionReplyRequest {
    /// Object the companion embodies.
    pub object_type: String,
    /// Child age.
    pub child_age: u32,
    /// Character name from the scene.
    #[serde(default)]
    pub character_name: String,
    /// Character personality from the scene.
    #[serde(default)]
    pub personality: String,
    /// Weather description.
    #[serde(default)]
    pub weather: String,
    /// Environment description.
    #[serde(default)]
    pub environment: String,
    /// Object traits.
    #[serde(default)]
    pub object_traits: String,
    /// Prior turns, oldest first.
    #[serde(default)]
    pub history: Vec<String>,
    /// The child's latest message.
    pub child_message: String,
}

/// Image supplied for recognition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// Publicly reachable URL.
    Url(String),
    /// Raw base64 payload or a `data:image/...` URI.
    Base64(String),
}

impl ImageRef {
    /// Builds a reference from optional request fields, preferring the URL.
    #[must_use]
    pub fn from_parts(image_base64: Option<&str>, image_url: Option<&str>) -> Option<Self> {
        let url = image_url.map(str::trim).filter(|v| !v.is_empty());
        let b64 = image_base64.map(str::trim).filter(|v| !v.is_empty());
        match (url, b64) {
            (Some(url), _) => Some(Self::Url(url.to_string())),
            (None, Some(b64)) => Some(Self::Base64(b64.to_string())),
            (None, None) => None,
        }
    }

    /// Value placed in a vision message's `image_url.url` field.
    #[must_use]
    pub fn to_message_url(&self) -> String {
        match self {
            Self::Url(url) => url.trim().to_string(),
            Self::Base64(b64) => {
                let trimmed = b64.trim();
                if trimmed.starts_with("data:image") {
                    trimmed.to_string()
                } else {
                    format!("data:image/jpeg;base64,{trimmed}")
                }
            },
        }
    }
}

/// Synthesized audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechAudio {
    /// Encoded audio.
    pub bytes: Vec<u8>,
    /// MIME type of `bytes`.
    pub mime_type: String,
}
