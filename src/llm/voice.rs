//! Speech synthesis with per-object voice selection.
//!
//! Object types map to voice pools through keyword profiles. Candidates are
//! shuffled so repeated scans of the same object do not always sound alike,
//! then tried in order until one is accepted. All attempts share a single
//! deadline.

use super::retry::is_invalid_voice_error;
use super::transport::{
    Deadline, HttpClientConfig, HttpTransport, JsonRequest, ReqwestTransport, ensure_success,
};
use crate::models::SpeechAudio;
use crate::{Capability, Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use rand::seq::SliceRandom;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Speech synthesis path on the multimodal generation API.
pub const SPEECH_GENERATION_PATH: &str = "/api/v1/services/aigc/multimodal-generation/generation";

/// Voice appended to every candidate list.
pub const LAST_RESORT_VOICE: &str = "Cherry";

const DEFAULT_AUDIO_MIME: &str = "audio/wav";

/// A keyword-matched voice pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceProfile {
    /// Profile name for logs.
    #[serde(default)]
    pub name: String,
    /// Object keywords.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Voices to pick from.
    #[serde(default)]
    pub voices: Vec<String>,
}

/// Voice pools by object keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceProfiles {
    /// Pool used when no profile matches.
    #[serde(default)]
    pub fallback_voices: Vec<String>,
    /// Keyword profiles, first match wins.
    #[serde(default)]
    pub profiles: Vec<VoiceProfile>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

fn clean(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

impl Default for VoiceProfiles {
    fn default() -> Self {
        let profile = |name: &str, keywords: &[&str], voices: &[&str]| VoiceProfile {
            name: name.to_string(),
            keywords: strings(keywords),
            voices: strings(voices),
        };
        Self {
            fallback_voices: strings(&["Cherry", "Serena", "Ethan"]),
            profiles: vec![
                profile(
                    "animal_lively",
                    &["猫", "狗", "兔", "熊", "鸟", "鱼", "鸭", "鸡", "动物", "宠物"],
                    &["Cherry", "Serena"],
                ),
                profile(
                    "vehicle_steady",
                    &["车", "火车", "地铁", "飞机", "船", "机器人", "机械"],
                    &["Ethan", "Serena"],
                ),
                profile(
                    "plant_gentle",
                    &[
                        "花", "树", "草", "叶", "水果", "蔬菜", "香蕉", "苹果", "西瓜", "植物",
                    ],
                    &["Serena", "Cherry"],
                ),
                profile(
                    "building_calm",
                    &["路灯", "红绿灯", "邮筒", "桥", "楼", "建筑", "公园"],
                    &["Ethan", "Cherry"],
                ),
            ],
        }
    }
}

impl VoiceProfiles {
    /// Loads profiles from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::operation("load_voice_profiles", e))?;
        let profiles: Self = serde_json::from_str(text.trim_start_matches('\u{feff}'))
            .map_err(|e| Error::operation("load_voice_profiles", e))?;
        Ok(profiles.normalized())
    }

    /// Drops blank entries and profiles without voices or keywords.
    ///
    /// Falls back to the built-in set when no profile survives.
    #[must_use]
    pub fn normalized(self) -> Self {
        let mut fallback_voices = clean(self.fallback_voices);
        if fallback_voices.is_empty() {
            fallback_voices = Self::default().fallback_voices;
        }
        let profiles = self
            .profiles
            .into_iter()
            .map(|p| VoiceProfile {
                name: p.name.trim().to_string(),
                keywords: clean(p.keywords),
                voices: clean(p.voices),
            })
            .filter(|p| !p.keywords.is_empty() && !p.voices.is_empty())
            .collect::<Vec<_>>();
        if profiles.is_empty() {
            return Self::default();
        }
        Self {
            fallback_voices,
            profiles,
        }
    }

    /// Finds the first profile whose keyword matches the object type.
    #[must_use]
    pub fn match_profile(&self, object_type: &str) -> Option<&VoiceProfile> {
        let object = object_type.trim().to_lowercase();
        if object.is_empty() {
            return None;
        }
        self.profiles.iter().find(|profile| {
            profile.keywords.iter().any(|keyword| {
                let keyword = keyword.to_lowercase();
                object.contains(&keyword) || keyword.contains(&object)
            })
        })
    }

    /// Ordered voices to try for an object type.
    ///
    /// The matched pool (or the fallback pool) is shuffled, then the
    /// preferred voice and [`LAST_RESORT_VOICE`] are appended. Duplicates are
    /// removed case-insensitively, keeping the first occurrence.
    #[must_use]
    pub fn candidates_with_rng<R: Rng + ?Sized>(
        &self,
        object_type: &str,
        preferred: &str,
        rng: &mut R,
    ) -> Vec<String> {
        let mut pool = match self.match_profile(object_type) {
            Some(profile) => profile.voices.clone(),
            None => self.fallback_voices.clone(),
        };
        pool.shuffle(rng);
        pool.push(preferred.to_string());
        pool.push(LAST_RESORT_VOICE.to_string());

        let mut seen = HashSet::new();
        pool.into_iter()
            .map(|voice| voice.trim().to_string())
            .filter(|voice| !voice.is_empty() && seen.insert(voice.to_lowercase()))
            .collect()
    }

    /// Ordered voices to try, shuffled with the thread RNG.
    #[must_use]
    pub fn candidates(&self, object_type: &str, preferred: &str) -> Vec<String> {
        self.candidates_with_rng(object_type, preferred, &mut rand::rng())
    }
}

/// Maps short language codes to the provider's language names.
///
/// Unknown values pass through unchanged.
#[must_use]
pub fn normalize_language(code: &str) -> String {
    let trimmed = code.trim();
    let name = match trimmed.to_lowercase().as_str() {
        "" | "auto" => "Auto",
        "zh" | "cn" | "zh-cn" | "chinese" => "Chinese",
        "en" | "en-us" | "english" => "English",
        "ja" => "Japanese",
        "ko" => "Korean",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        "it" => "Italian",
        "pt" => "Portuguese",
        "ru" => "Russian",
        _ => return trimmed.to_string(),
    };
    name.to_string()
}

/// Voice adapter settings.
#[derive(Clone)]
pub struct VoiceConfig {
    /// Base URL or full synthesis URL.
    pub base_url: String,
    /// Bearer key; `None` leaves speech unavailable.
    pub api_key: Option<SecretString>,
    /// Preferred voice, tried after the matched pool.
    pub voice_id: String,
    /// TTS model; empty leaves speech unavailable.
    pub model: String,
    /// Language code or name.
    pub language: String,
    /// Deadline shared by every candidate attempt.
    pub timeout: Duration,
}

impl VoiceConfig {
    /// Default base URL.
    pub const DEFAULT_BASE_URL: &'static str = "https://dashscope.aliyuncs.com";
    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "qwen3-tts-flash";
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            api_key: None,
            voice_id: LAST_RESORT_VOICE.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            language: "Chinese".to_string(),
            timeout: Duration::from_secs(20),
        }
    }
}

impl std::fmt::Debug for VoiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("voice_id", &self.voice_id)
            .field("model", &self.model)
            .field("language", &self.language)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Speech synthesis adapter.
pub struct VoiceAdapter {
    config: VoiceConfig,
    profiles: VoiceProfiles,
    transport: Arc<dyn HttpTransport>,
}

impl VoiceAdapter {
    /// Creates an adapter with built-in profiles and the production transport.
    #[must_use]
    pub fn new(config: VoiceConfig) -> Self {
        Self {
            config,
            profiles: VoiceProfiles::default(),
            transport: Arc::new(ReqwestTransport::new(HttpClientConfig::default())),
        }
    }

    /// Replaces the voice profiles.
    #[must_use]
    pub fn with_profiles(mut self, profiles: VoiceProfiles) -> Self {
        self.profiles = profiles.normalized();
        self
    }

    /// Replaces the HTTP transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Returns the active profiles.
    #[must_use]
    pub const fn profiles(&self) -> &VoiceProfiles {
        &self.profiles
    }

    /// Returns true when a key and model are configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.config
            .api_key
            .as_ref()
            .is_some_and(|key| !key.expose_secret().trim().is_empty())
            && !self.config.model.trim().is_empty()
    }

    fn synthesis_url(&self) -> String {
        let base = self.config.base_url.trim().trim_end_matches('/');
        if base.contains(SPEECH_GENERATION_PATH) {
            base.to_string()
        } else {
            format!("{base}{SPEECH_GENERATION_PATH}")
        }
    }

    /// Synthesizes `text` in a voice suited to `object_type`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for empty text,
    /// [`Error::CapabilityUnavailable`] when unconfigured, the first
    /// non-voice failure, or [`Error::UpstreamRequestFailed`] once every
    /// candidate voice is rejected or the shared deadline passes.
    #[instrument(skip(self, text), fields(text_chars = text.chars().count()))]
    pub fn synthesize_speech(&self, text: &str, object_type: &str) -> Result<SpeechAudio> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidInput("speech text is empty".to_string()));
        }
        if !self.is_configured() {
            return Err(Error::CapabilityUnavailable(Capability::Voice));
        }

        let deadline = Deadline::after(self.config.timeout);
        let url = self.synthesis_url();
        let language = normalize_language(&self.config.language);
        let candidates = self.profiles.candidates(object_type, &self.config.voice_id);

        for voice in &candidates {
            let remaining = deadline.remaining("synthesize_speech")?;
            match self.request(&url, text, voice, &language, remaining, &deadline) {
                Ok(audio) => {
                    tracing::info!(voice = %voice, bytes = audio.bytes.len(), "Synthesized speech");
                    return Ok(audio);
                },
                Err(err) if is_invalid_voice_error(&err) => {
                    tracing::warn!(voice = %voice, error = %err, "Voice rejected, trying next");
                    metrics::counter!("cityling_fallbacks_total", "kind" => "voice_rotation")
                        .increment(1);
                },
                Err(err) => return Err(err),
            }
        }

        Err(Error::upstream(
            "synthesize_speech",
            format!("no available voice for object_type={}", object_type.trim()),
        ))
    }

    fn request(
        &self,
        url: &str,
        text: &str,
        voice: &str,
        language: &str,
        timeout: Duration,
        deadline: &Deadline,
    ) -> Result<SpeechAudio> {
        let body = json!({
            "model": self.config.model.trim(),
            "input": {
                "text": text,
                "voice": voice,
                "language_type": language
            },
            "parameters": { "stream": false }
        });
        let response = self.transport.post_json(&JsonRequest {
            url,
            bearer: self.config.api_key.as_ref(),
            headers: &[],
            body: &body,
            timeout: Some(timeout),
        })?;
        let response = ensure_success("synthesize_speech", response)?;

        match parse_speech_response(&response.body)? {
            SpeechPayload::Inline(bytes) => Ok(SpeechAudio {
                bytes,
                mime_type: DEFAULT_AUDIO_MIME.to_string(),
            }),
            SpeechPayload::Remote(audio_url) => {
                self.download_audio(&audio_url, deadline.remaining("download_audio")?)
            },
        }
    }

    fn download_audio(&self, url: &str, timeout: Duration) -> Result<SpeechAudio> {
        let response = self.transport.get(url, Some(timeout))?;
        let response = ensure_success("download_audio", response)?;
        if response.body.is_empty() {
            return Err(Error::InvalidResponse("downloaded audio is empty".to_string()));
        }
        let mime_type = response
            .content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(str::trim)
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_AUDIO_MIME)
            .to_string();
        Ok(SpeechAudio {
            bytes: response.body,
            mime_type,
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SpeechPayload {
    Inline(Vec<u8>),
    Remote(String),
}

fn parse_speech_response(body: &[u8]) -> Result<SpeechPayload> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Error::InvalidResponse(format!("speech response is not JSON: {e}")))?;
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or("unknown error");

    if let Some(status) = value.get("status_code").and_then(Value::as_i64) {
        if status != 0 && status != 200 {
            return Err(Error::UpstreamRequestFailed {
                operation: "synthesize_speech".to_string(),
                status: u16::try_from(status).ok(),
                cause: message.to_string(),
            });
        }
    }
    if let Some(code) = value.get("code").and_then(Value::as_str).map(str::trim) {
        if !code.is_empty() && !matches!(code.to_lowercase().as_str(), "ok" | "200" | "success") {
            return Err(Error::upstream(
                "synthesize_speech",
                format!("{code}: {message}"),
            ));
        }
    }

    let audio = value.pointer("/output/audio");
    if let Some(data) = audio
        .and_then(|a| a.get("data"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|d| !d.is_empty())
    {
        let bytes = STANDARD
            .decode(data)
            .map_err(|e| Error::InvalidResponse(format!("speech audio is not valid base64: {e}")))?;
        return Ok(SpeechPayload::Inline(bytes));
    }
    if let Some(url) = audio
        .and_then(|a| a.get("url"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|u| !u.is_empty())
    {
        return Ok(SpeechPayload::Remote(url.to_string()));
    }

    Err(Error::InvalidResponse(
        "speech response contains no audio".to_string(),
    ))
}
