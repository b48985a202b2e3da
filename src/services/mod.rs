//! Business logic services.
//!
//! Services orchestrate the providers, the content cache, and the store:
//!
//! - [`ScanService`]: scan sessions and quiz answers
//! - [`CompanionService`]: companion scenes and chat
//! - [`CollectionService`]: pokedex, badges, and daily reports

mod badges;
mod collection;
mod companion;
mod content_cache;
mod knowledge;
mod scan;

pub use badges::{BadgeMatcher, FULL_COLLECTION_RULE, default_badge_code, normalize_badge_token};
pub use collection::CollectionService;
pub use companion::{
    ChatRequest, ChatResponse, CompanionService, SceneRequest, SceneResponse, default_scene,
    image_to_image_prompt,
};
pub use content_cache::{
    CacheEntry, CacheKey, ContentCache, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL,
};
pub use knowledge::KnowledgeBase;
pub use scan::{
    AnswerRequest, AnswerResponse, GUEST_CHILD_ID, ScanImageRequest, ScanImageResponse,
    ScanRequest, ScanResponse, ScanService, default_dialogues, default_learning_content,
    is_answer_correct, normalize_answer, normalize_child_id,
};
