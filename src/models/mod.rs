//! Data models for cityling.
//!
//! Provider results, persisted scan/capture records, and collection views.

mod age;
mod collection;
mod content;
mod session;

pub use age::{AgeBucket, AgeLayer, MAX_CHILD_AGE, MIN_CHILD_AGE, clamp_age, validate_child_age};
pub use collection::{BadgeRule, DailyReport, KnowledgeItem, PokedexBadge, PokedexEntry, QuizItem};
pub use content::{
    AnswerJudgeResult, CompanionReply, CompanionReplyRequest, CompanionScene,
    CompanionSceneRequest, ImageRef, LearningContent, RecognizeResult, SpeechAudio,
};
pub use session::{Capture, ScanSession, Spirit};
