//! Scan and answer orchestration.
//!
//! A scan resolves an object label, reuses or generates learning content, and
//! opens a quiz session. Answering the quiz moves the session to captured at
//! most once; tracked objects also add a capture to the child's collection.
//!
//! Content generation degrades in order: provider, knowledge base, then a
//! templated default that always succeeds.

use super::badges::BadgeMatcher;
use super::content_cache::{CacheEntry, CacheKey, ContentCache};
use super::knowledge::KnowledgeBase;
use crate::llm::GenerativeProvider;
use crate::models::{
    AgeBucket, Capture, ImageRef, LearningContent, QuizItem, ScanSession, Spirit,
    validate_child_age,
};
use crate::storage::Store;
use crate::{Capability, Error, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// Child ID used when a request leaves it blank.
pub const GUEST_CHILD_ID: &str = "guest";

const FALLBACK_SPIRIT_NAME: &str = "小灵";
const UNKNOWN_SPIRIT_NAME: &str = "未知精灵";

const MSG_INCORRECT: &str = "答案不正确，再扫描一次获取新题目吧。";
const MSG_UNTRACKED: &str = "回答正确，已记录识别结果；该对象不在勋章收集范围内。";
const MSG_CAPTURED: &str = "回答正确，已成功收集精灵。";

/// Trims a child ID, defaulting blanks to [`GUEST_CHILD_ID`].
#[must_use]
pub fn normalize_child_id(child_id: &str) -> String {
    let trimmed = child_id.trim();
    if trimmed.is_empty() {
        GUEST_CHILD_ID.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Lowercases and trims an answer for comparison.
#[must_use]
pub fn normalize_answer(answer: &str) -> String {
    answer.trim().to_lowercase()
}

/// Heuristic judge: equal, or either side contains the other.
///
/// Both sides must already be normalized; an empty side never matches.
#[must_use]
pub fn is_answer_correct(given: &str, expected: &str) -> bool {
    if given.is_empty() || expected.is_empty() {
        return false;
    }
    given == expected || given.contains(expected) || expected.contains(given)
}

/// Scan input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Child identifier; blank means guest.
    #[serde(default)]
    pub child_id: String,
    /// Child age, 3 to 15.
    pub child_age: u32,
    /// Label detected on the client.
    #[serde(default)]
    pub detected_label: String,
    /// Image as raw base64 or a data URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    /// Publicly reachable image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl ScanRequest {
    /// A guest scan of a known label.
    #[must_use]
    pub fn with_label(label: impl Into<String>, child_age: u32) -> Self {
        Self {
            child_age,
            detected_label: label.into(),
            ..Self::default()
        }
    }

    /// Sets the child ID.
    #[must_use]
    pub fn for_child(mut self, child_id: impl Into<String>) -> Self {
        self.child_id = child_id.into();
        self
    }

    fn image(&self) -> Option<ImageRef> {
        ImageRef::from_parts(self.image_base64.as_deref(), self.image_url.as_deref())
    }
}

/// Scan output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResponse {
    /// New session ID.
    pub session_id: String,
    /// Canonical object type.
    pub object_type: String,
    /// Child-facing object name.
    pub display_name: String,
    /// Spirit attached to the content.
    pub spirit: Spirit,
    /// Fact.
    pub fact: String,
    /// Quiz question.
    pub quiz: String,
    /// Spirit dialogue lines.
    pub dialogues: Vec<String>,
    /// Whether the content came from the cache.
    pub cache_hit: bool,
}

/// Recognition-only input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanImageRequest {
    /// Child identifier.
    #[serde(default)]
    pub child_id: String,
    /// Child age.
    #[serde(default)]
    pub child_age: u32,
    /// Image as raw base64 or a data URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    /// Publicly reachable image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Recognition-only output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanImageResponse {
    /// Child-facing object name.
    pub detected_label: String,
    /// Canonical object type.
    pub detected_label_en: String,
    /// Label as the model phrased it.
    pub raw_label: String,
    /// Recognition rationale.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

/// Quiz answer input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerRequest {
    /// Session being answered.
    pub session_id: String,
    /// Child identifier.
    #[serde(default)]
    pub child_id: String,
    /// Free-text answer.
    pub answer: String,
}

/// Quiz answer outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResponse {
    /// Whether the answer was accepted.
    pub correct: bool,
    /// Whether a capture was recorded.
    pub captured: bool,
    /// Child-facing message.
    pub message: String,
    /// The new capture, when one was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<Capture>,
}

fn spirit_names(object_type: &str) -> &'static [&'static str] {
    match object_type {
        "manhole" => &["井井", "盖盖", "小阀"],
        "mailbox" => &["邮邮", "信信", "小筒"],
        "tree" => &["木木", "叶叶", "芽芽"],
        "road_sign" => &["路路", "标标", "向向"],
        "traffic_light" => &["红灯灯", "绿闪闪", "信号宝"],
        _ => &[FALLBACK_SPIRIT_NAME],
    }
}

const fn personality_for(bucket: AgeBucket) -> &'static str {
    match bucket {
        AgeBucket::Early => "活泼好奇",
        AgeBucket::Middle => "勇敢友善",
        AgeBucket::Senior => "爱思考有创意",
    }
}

const fn age_tone(child_age: u32) -> &'static str {
    match child_age {
        0..=6 => "慢慢来，我们一步一步发现城市秘密。",
        7..=9 => "你已经是很棒的小探索家啦。",
        _ => "我们用观察和思考来解锁更多知识点。",
    }
}

/// Templated dialogue used when generation produced none.
#[must_use]
pub fn default_dialogues(spirit: &Spirit, child_age: u32, fact: &str, quiz: &str) -> Vec<String> {
    vec![
        format!("嗨，我是{}，性格是{}。", spirit.name, spirit.personality),
        age_tone(child_age).to_string(),
        format!("我刚发现一个线索：{fact}"),
        format!("轮到你回答：{quiz}"),
    ]
}

/// Templated learning content that is always available.
#[must_use]
pub fn default_learning_content(display_name: &str) -> (String, QuizItem) {
    let name = match display_name.trim() {
        "" => "这个物体",
        trimmed => trimmed,
    };
    let fact = format!("{name}是我们生活中常见的事物，认真观察它的外形和用途，就能发现很多小知识。");
    let quiz = QuizItem {
        question: "小挑战：我们刚刚认识的物体叫什么名字？".to_string(),
        answer: name.to_string(),
    };
    (fact, quiz)
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7().simple())
}

/// Scan and answer orchestrator.
pub struct ScanService {
    store: Arc<dyn Store>,
    provider: Option<Arc<dyn GenerativeProvider>>,
    cache: Arc<ContentCache>,
    knowledge: KnowledgeBase,
    badges: Arc<BadgeMatcher>,
    rng: Mutex<StdRng>,
}

impl ScanService {
    /// Creates a service with no provider, a default cache, and the built-in
    /// knowledge base and badges.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            provider: None,
            cache: Arc::new(ContentCache::default()),
            knowledge: KnowledgeBase::builtin(),
            badges: Arc::new(BadgeMatcher::default()),
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Sets the generative provider.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn GenerativeProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Replaces the content cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ContentCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces the knowledge base.
    #[must_use]
    pub fn with_knowledge(mut self, knowledge: KnowledgeBase) -> Self {
        self.knowledge = knowledge;
        self
    }

    /// Replaces the badge matcher.
    #[must_use]
    pub fn with_badges(mut self, badges: Arc<BadgeMatcher>) -> Self {
        self.badges = badges;
        self
    }

    /// Seeds the random source for reproducible picks.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Returns the content cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Scan rng lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Identifies the object in an image without opening a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapabilityUnavailable`] without a provider,
    /// [`Error::ImageRequired`] without an image, or the provider's error.
    #[instrument(skip(self, request), fields(child_id = %request.child_id))]
    pub fn scan_image(&self, request: &ScanImageRequest) -> Result<ScanImageResponse> {
        let provider = self
            .provider
            .as_ref()
            .ok_or(Error::CapabilityUnavailable(Capability::Vision))?;
        let image = ImageRef::from_parts(request.image_base64.as_deref(), request.image_url.as_deref())
            .ok_or(Error::ImageRequired)?;

        let recognized = provider.recognize_object(&image)?;
        let object_type = self.knowledge.resolve(&recognized.object_type);
        tracing::info!(object_type = %object_type, raw_label = %recognized.raw_label, "Recognized image");

        Ok(ScanImageResponse {
            detected_label: self.knowledge.display_name(&object_type),
            detected_label_en: object_type,
            raw_label: recognized.raw_label,
            reason: recognized.reason,
        })
    }

    /// Resolves the object, reuses or generates content, and opens a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidChildAge`] for ages outside 3..=15,
    /// [`Error::CapabilityUnavailable`] when an image is given without a
    /// provider, [`Error::ScanInputRequired`] when no label can be resolved,
    /// or a store error.
    #[instrument(
        skip(self, request),
        fields(child_age = request.child_age, object_type = tracing::field::Empty, cache_hit = tracing::field::Empty)
    )]
    pub fn scan(&self, request: &ScanRequest) -> Result<ScanResponse> {
        let start = Instant::now();
        let child_id = normalize_child_id(&request.child_id);
        let child_age = validate_child_age(request.child_age)?;

        let mut label = request.detected_label.trim().to_string();
        if let Some(image) = request.image() {
            let provider = self
                .provider
                .as_ref()
                .ok_or(Error::CapabilityUnavailable(Capability::Vision))?;
            label = provider.recognize_object(&image)?.object_type;
        }
        if label.is_empty() || label.eq_ignore_ascii_case("unknown") {
            return Err(Error::ScanInputRequired);
        }

        let object_type = self.knowledge.resolve(&label);
        let span = tracing::Span::current();
        span.record("object_type", object_type.as_str());

        let key = CacheKey::new(object_type.clone(), child_age);
        let (entry, cache_hit) = match self.cache.get(&key) {
            Some(entry) => (entry, true),
            None => {
                let entry = self.build_entry(&object_type, child_age)?;
                (self.cache.put(key, entry), false)
            },
        };
        span.record("cache_hit", cache_hit);

        let session = ScanSession {
            id: new_id("sess"),
            child_id,
            child_age,
            object_type: object_type.clone(),
            spirit_id: entry.spirit.id.clone(),
            quiz_question: entry.quiz_question.clone(),
            quiz_answer: normalize_answer(&entry.quiz_answer),
            fact: entry.fact.clone(),
            created_at: Utc::now(),
            cache_hit,
            captured: false,
            captured_at: None,
            answer_given: None,
        };
        self.store.save_session(&session)?;

        let dialogues = if entry.dialogues.is_empty() {
            default_dialogues(&entry.spirit, child_age, &entry.fact, &entry.quiz_question)
        } else {
            entry.dialogues.clone()
        };

        metrics::counter!("cityling_scans_total", "cache" => if cache_hit { "hit" } else { "miss" })
            .increment(1);
        metrics::histogram!("cityling_scan_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        tracing::info!(session_id = %session.id, "Opened scan session");

        Ok(ScanResponse {
            session_id: session.id,
            display_name: self.knowledge.display_name(&object_type),
            object_type,
            spirit: entry.spirit.clone(),
            fact: entry.fact.clone(),
            quiz: entry.quiz_question.clone(),
            dialogues,
            cache_hit,
        })
    }

    fn build_entry(&self, object_type: &str, child_age: u32) -> Result<CacheEntry> {
        let spirit = self.create_spirit(object_type, child_age);
        self.store.save_spirit(&spirit)?;

        let (fact, quiz, dialogues) = match self.generate_content(object_type, child_age, &spirit) {
            Some(content) => (
                content.fact,
                QuizItem {
                    question: content.quiz_question,
                    answer: content.quiz_answer,
                },
                content.dialogues,
            ),
            None => {
                let (fact, quiz) = self.fallback_content(object_type);
                let dialogues = default_dialogues(&spirit, child_age, &fact, &quiz.question);
                (fact, quiz, dialogues)
            },
        };

        let now = Utc::now();
        Ok(CacheEntry {
            object_type: object_type.to_string(),
            spirit,
            fact,
            quiz_question: quiz.question,
            quiz_answer: quiz.answer,
            dialogues,
            expire_at: self.cache.expiry_from(now),
        })
    }

    fn create_spirit(&self, object_type: &str, child_age: u32) -> Spirit {
        let name = spirit_names(object_type)
            .choose(&mut *self.rng())
            .copied()
            .unwrap_or(FALLBACK_SPIRIT_NAME);
        let display = self.knowledge.display_name(object_type);
        Spirit {
            id: new_id("spirit"),
            name: name.to_string(),
            object_type: object_type.to_string(),
            personality: personality_for(AgeBucket::from_age(child_age)).to_string(),
            intro: format!("我是{name}，来自{display}的城市精灵，一起学习吧。"),
            created_at: Utc::now(),
        }
    }

    fn generate_content(
        &self,
        object_type: &str,
        child_age: u32,
        spirit: &Spirit,
    ) -> Option<LearningContent> {
        let provider = self.provider.as_ref()?;
        match provider.generate_learning_content(
            object_type,
            child_age,
            &spirit.name,
            &spirit.personality,
        ) {
            Ok(content)
                if !content.fact.trim().is_empty()
                    && !content.quiz_question.trim().is_empty()
                    && !content.quiz_answer.trim().is_empty() =>
            {
                Some(content)
            },
            Ok(_) => {
                tracing::warn!(provider = provider.name(), "Learning content incomplete, falling back");
                metrics::counter!("cityling_content_fallbacks_total", "reason" => "incomplete")
                    .increment(1);
                None
            },
            Err(err) => {
                tracing::warn!(provider = provider.name(), error = %err, "Learning content generation failed, falling back");
                metrics::counter!("cityling_content_fallbacks_total", "reason" => "error")
                    .increment(1);
                None
            },
        }
    }

    fn fallback_content(&self, object_type: &str) -> (String, QuizItem) {
        let picked = self.knowledge.pick(object_type, &mut *self.rng());
        match picked {
            Some((fact, quiz))
                if !fact.trim().is_empty()
                    && !quiz.question.trim().is_empty()
                    && !quiz.answer.trim().is_empty() =>
            {
                tracing::debug!(object_type, "Using knowledge base content");
                (fact, quiz)
            },
            _ => {
                tracing::debug!(object_type, "Using templated default content");
                default_learning_content(&self.knowledge.display_name(object_type))
            },
        }
    }

    /// Judges an answer and advances the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] for an unknown session,
    /// [`Error::AlreadyCaptured`] for a finished one, or a store error.
    #[instrument(skip(self, request), fields(session_id = %request.session_id))]
    pub fn submit_answer(&self, request: &AnswerRequest) -> Result<AnswerResponse> {
        let mut session = self
            .store
            .get_session(&request.session_id)?
            .ok_or_else(|| Error::SessionNotFound(request.session_id.clone()))?;
        if session.captured {
            return Err(Error::AlreadyCaptured(session.id));
        }

        let raw_answer = request.answer.trim();
        let answer = normalize_answer(raw_answer);
        let correct = self.judge(&session, raw_answer, &answer);
        session.answer_given = Some(answer);

        if !correct {
            self.store.update_session(&session)?;
            metrics::counter!("cityling_answers_total", "result" => "incorrect").increment(1);
            return Ok(AnswerResponse {
                correct: false,
                captured: false,
                message: MSG_INCORRECT.to_string(),
                capture: None,
            });
        }

        let now = Utc::now();
        if !self.badges.is_tracked(&session.object_type) {
            session.captured = true;
            session.captured_at = Some(now);
            self.store.update_session(&session)?;
            metrics::counter!("cityling_answers_total", "result" => "untracked").increment(1);
            tracing::info!(object_type = %session.object_type, "Correct answer for untracked object");
            return Ok(AnswerResponse {
                correct: true,
                captured: false,
                message: MSG_UNTRACKED.to_string(),
                capture: None,
            });
        }

        let spirit_name = match self.store.get_spirit(&session.spirit_id) {
            Ok(Some(spirit)) => spirit.name,
            Ok(None) => UNKNOWN_SPIRIT_NAME.to_string(),
            Err(err) => {
                tracing::warn!(error = %err, spirit_id = %session.spirit_id, "Spirit lookup failed");
                UNKNOWN_SPIRIT_NAME.to_string()
            },
        };
        let capture = Capture {
            id: new_id("cap"),
            child_id: session.child_id.clone(),
            spirit_id: session.spirit_id.clone(),
            spirit_name,
            object_type: session.object_type.clone(),
            fact: session.fact.clone(),
            captured_at: now,
        };
        self.store.add_capture(&capture)?;

        session.captured = true;
        session.captured_at = Some(capture.captured_at);
        self.store.update_session(&session)?;

        metrics::counter!("cityling_answers_total", "result" => "captured").increment(1);
        tracing::info!(capture_id = %capture.id, object_type = %capture.object_type, "Captured spirit");

        Ok(AnswerResponse {
            correct: true,
            captured: true,
            message: MSG_CAPTURED.to_string(),
            capture: Some(capture),
        })
    }

    fn judge(&self, session: &ScanSession, raw_answer: &str, answer: &str) -> bool {
        let heuristic = is_answer_correct(answer, &session.quiz_answer);
        let Some(provider) = self.provider.as_ref() else {
            return heuristic;
        };
        match provider.judge_answer(
            &session.quiz_question,
            &session.quiz_answer,
            raw_answer,
            session.child_age,
        ) {
            Ok(verdict) => {
                tracing::debug!(correct = verdict.correct, reason = %verdict.reason, "Answer judged by provider");
                verdict.correct
            },
            Err(err) => {
                tracing::warn!(error = %err, "Answer judge failed, using heuristic");
                heuristic
            },
        }
    }
}
