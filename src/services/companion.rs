//! Companion character orchestration.
//!
//! Scenes and replies bypass the content cache. A scene combines generated
//! dialogue, a portrait from the [`ImageAdapter`], and speech from the
//! [`VoiceAdapter`]; a chat turn combines a reply with speech.

use super::knowledge::KnowledgeBase;
use crate::llm::{GenerativeProvider, ImageAdapter, VoiceAdapter};
use crate::models::{
    AgeBucket, CompanionReplyRequest, CompanionScene, CompanionSceneRequest, SpeechAudio,
    validate_child_age,
};
use crate::{Capability, Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// Scene input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneRequest {
    /// Child identifier.
    #[serde(default)]
    pub child_id: String,
    /// Child age, 3 to 15.
    pub child_age: u32,
    /// Object the companion embodies.
    pub object_type: String,
    /// Weather description.
    #[serde(default)]
    pub weather: String,
    /// Environment description.
    #[serde(default)]
    pub environment: String,
    /// Object traits.
    #[serde(default)]
    pub object_traits: String,
    /// Reference photo as base64 or a data URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image_base64: Option<String>,
    /// Reference photo URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image_url: Option<String>,
}

impl SceneRequest {
    fn source_image(&self) -> Option<&str> {
        [self.source_image_url.as_deref(), self.source_image_base64.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|v| !v.is_empty())
    }
}

/// Scene output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneResponse {
    /// Character name.
    pub character_name: String,
    /// Character personality.
    pub character_personality: String,
    /// Opening line.
    pub dialog_text: String,
    /// Prompt the portrait was generated from.
    pub image_prompt: String,
    /// Portrait URL; empty when the portrait came back as a data URI.
    pub character_image_url: String,
    /// Inlined portrait, when it could be downloaded.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub character_image_base64: String,
    /// MIME type of the inlined portrait.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub character_image_mime_type: String,
    /// Spoken opening line.
    pub voice_audio_base64: String,
    /// MIME type of the audio.
    pub voice_mime_type: String,
}

/// Chat input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Child identifier.
    #[serde(default)]
    pub child_id: String,
    /// Child age, 3 to 15.
    pub child_age: u32,
    /// Object the companion embodies.
    pub object_type: String,
    /// Character name from the scene.
    #[serde(default)]
    pub character_name: String,
    /// Character personality from the scene.
    #[serde(default)]
    pub character_personality: String,
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

/// Chat output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Reply text.
    pub reply_text: String,
    /// Spoken reply.
    pub voice_audio_base64: String,
    /// MIME type of the audio.
    pub voice_mime_type: String,
}

/// Portrait prompt used when a reference photo is supplied.
#[must_use]
pub fn image_to_image_prompt(display_name: &str) -> String {
    format!(
        "基于参考图进行图生图，将图中主体“{}”绘本化，保留主体外形与配色特征；如果原图只有主体或背景单调，请自动补充自然的日常生活场景背景（如公园、小区、街角、校园一角），形成前中后景层次；主体在画面中的可视面积约占1/5，位置居中或微偏中景，不能过大也不能过小；场景必须符合该主体在现实生活中的常见出现环境；整体保持童话儿童绘本风，柔和光线，画面适合作为剧情对话背景；禁止文字、水印、logo。",
        display_name.trim()
    )
}

fn or_default<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() { fallback } else { trimmed }
}

/// Age-bucketed scene used when generation fails.
#[must_use]
pub fn default_scene(
    display_name: &str,
    child_age: u32,
    weather: &str,
    environment: &str,
    traits: &str,
) -> CompanionScene {
    let name = or_default(display_name, "这个小伙伴");
    let (character_name, personality) = match AgeBucket::from_age(child_age) {
        AgeBucket::Early => ("小圆", "温柔可爱"),
        AgeBucket::Middle => ("小冒险家", "活泼好奇"),
        AgeBucket::Senior => ("观察官", "爱思考有创意"),
    };
    CompanionScene {
        character_name: character_name.to_string(),
        personality: personality.to_string(),
        dialog_text: format!("你好呀，我是{character_name}！今天我们一起认识{name}吧。"),
        image_prompt: format!(
            "儿童向二次元卡通插画，拟人化{name}角色，性格{personality}，场景为{}的{}，物体特征{}，柔和光线，主角清晰，适合儿童",
            or_default(weather, "晴天"),
            or_default(environment, "户外"),
            or_default(traits, "圆润可爱"),
        ),
    }
}

fn media_error(err: Error) -> Error {
    match err {
        Error::CapabilityUnavailable(Capability::Image | Capability::Voice) => {
            Error::MediaUnavailable
        },
        other => other,
    }
}

/// Name used for voice profile matching.
///
/// Canonical types are English while profile keywords are usually Chinese, so
/// the display name is used when only it matches a profile.
fn voice_key<'a>(voice: &VoiceAdapter, object_type: &'a str, display_name: &'a str) -> &'a str {
    let profiles = voice.profiles();
    if profiles.match_profile(object_type).is_none()
        && profiles.match_profile(display_name).is_some()
    {
        display_name
    } else {
        object_type
    }
}

/// Companion scene and chat orchestrator.
pub struct CompanionService {
    provider: Option<Arc<dyn GenerativeProvider>>,
    image: Option<Arc<ImageAdapter>>,
    voice: Option<Arc<VoiceAdapter>>,
    knowledge: KnowledgeBase,
}

impl CompanionService {
    /// Creates a service with no providers attached.
    #[must_use]
    pub fn new() -> Self {
        Self {
            provider: None,
            image: None,
            voice: None,
            knowledge: KnowledgeBase::builtin(),
        }
    }

    /// Sets the generative provider.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn GenerativeProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Sets the image adapter.
    #[must_use]
    pub fn with_image_adapter(mut self, image: Arc<ImageAdapter>) -> Self {
        self.image = Some(image);
        self
    }

    /// Sets the voice adapter.
    #[must_use]
    pub fn with_voice_adapter(mut self, voice: Arc<VoiceAdapter>) -> Self {
        self.voice = Some(voice);
        self
    }

    /// Replaces the knowledge base used for display names.
    #[must_use]
    pub fn with_knowledge(mut self, knowledge: KnowledgeBase) -> Self {
        self.knowledge = knowledge;
        self
    }

    fn provider(&self) -> Result<&Arc<dyn GenerativeProvider>> {
        self.provider
            .as_ref()
            .ok_or(Error::CapabilityUnavailable(Capability::Text))
    }

    fn speak(&self, text: &str, object_type: &str) -> Result<SpeechAudio> {
        let voice = self.voice.as_ref().ok_or(Error::MediaUnavailable)?;
        let display_name = self.knowledge.display_name(object_type);
        voice
            .synthesize_speech(text, voice_key(voice, object_type, &display_name))
            .map_err(media_error)
    }

    /// Generates a companion's opening scene with portrait and speech.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidChildAge`], [`Error::ObjectTypeMissing`],
    /// [`Error::CapabilityUnavailable`] without a provider,
    /// [`Error::MediaUnavailable`] without image or voice capability, or an
    /// upstream media error.
    #[instrument(skip(self, request), fields(object_type = %request.object_type, child_age = request.child_age))]
    pub fn generate_scene(&self, request: &SceneRequest) -> Result<SceneResponse> {
        let child_age = validate_child_age(request.child_age)?;
        let object_type = request.object_type.trim();
        if object_type.is_empty() {
            return Err(Error::ObjectTypeMissing);
        }
        let provider = self.provider()?;
        let display_name = self.knowledge.display_name(object_type);

        let source_image = request.source_image();
        let (weather, environment, object_traits) = if source_image.is_some() {
            (String::new(), String::new(), String::new())
        } else {
            (
                request.weather.trim().to_string(),
                request.environment.trim().to_string(),
                request.object_traits.trim().to_string(),
            )
        };

        let scene = provider
            .generate_companion_scene(&CompanionSceneRequest {
                object_type: object_type.to_string(),
                child_age,
                weather: weather.clone(),
                environment: environment.clone(),
                object_traits: object_traits.clone(),
                history: Vec::new(),
            })
            .unwrap_or_else(|err| {
                tracing::warn!(provider = provider.name(), error = %err, "Scene generation failed, using default scene");
                metrics::counter!("cityling_companion_fallbacks_total", "stage" => "scene")
                    .increment(1);
                default_scene(&display_name, child_age, &weather, &environment, &object_traits)
            });

        let image_prompt = if source_image.is_some() {
            image_to_image_prompt(&display_name)
        } else {
            scene.image_prompt.clone()
        };

        let image = self.image.as_ref().ok_or(Error::MediaUnavailable)?;
        let mut image_url = image
            .generate_character_image(&image_prompt, source_image)
            .map_err(media_error)?;

        let audio = self.speak(&scene.dialog_text, object_type)?;

        let (image_base64, image_mime) = match image.download_image(&image_url) {
            Ok(downloaded) if !downloaded.bytes.is_empty() => {
                (STANDARD.encode(&downloaded.bytes), downloaded.mime_type)
            },
            Ok(_) => (String::new(), String::new()),
            Err(err) => {
                tracing::warn!(error = %err, "Portrait download failed, returning URL only");
                (String::new(), String::new())
            },
        };
        if image_url.trim().to_lowercase().starts_with("data:image/") {
            image_url.clear();
        }

        tracing::info!(character = %scene.character_name, "Generated companion scene");
        Ok(SceneResponse {
            character_name: scene.character_name,
            character_personality: scene.personality,
            dialog_text: scene.dialog_text,
            image_prompt,
            character_image_url: image_url,
            character_image_base64: image_base64,
            character_image_mime_type: image_mime,
            voice_audio_base64: STANDARD.encode(&audio.bytes),
            voice_mime_type: audio.mime_type,
        })
    }

    /// Generates the companion's reply with speech.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidChildAge`], [`Error::ObjectTypeMissing`],
    /// [`Error::ChildMessageMissing`], [`Error::CapabilityUnavailable`]
    /// without a provider, the provider's error, or
    /// [`Error::MediaUnavailable`] without voice capability.
    #[instrument(skip(self, request), fields(object_type = %request.object_type, turns = request.history.len()))]
    pub fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let child_age = validate_child_age(request.child_age)?;
        let object_type = request.object_type.trim();
        if object_type.is_empty() {
            return Err(Error::ObjectTypeMissing);
        }
        let child_message = request.child_message.trim();
        if child_message.is_empty() {
            return Err(Error::ChildMessageMissing);
        }
        let provider = self.provider()?;

        let reply = provider.generate_companion_reply(&CompanionReplyRequest {
            object_type: object_type.to_string(),
            child_age,
            character_name: request.character_name.trim().to_string(),
            personality: request.character_personality.trim().to_string(),
            weather: request.weather.trim().to_string(),
            environment: request.environment.trim().to_string(),
            object_traits: request.object_traits.trim().to_string(),
            history: request.history.clone(),
            child_message: child_message.to_string(),
        })?;

        let audio = self.speak(&reply.reply_text, object_type)?;
        Ok(ChatResponse {
            reply_text: reply.reply_text,
            voice_audio_base64: STANDARD.encode(&audio.bytes),
            voice_mime_type: audio.mime_type,
        })
    }
}

impl Default for CompanionService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(5, "小圆", "温柔可爱")]
    #[test_case(8, "小冒险家", "活泼好奇")]
    #[test_case(13, "观察官", "爱思考有创意")]
    fn test_default_scene_by_bucket(age: u32, name: &str, personality: &str) {
        let scene = default_scene("井盖", age, "", "", "");
        assert_eq!(scene.character_name, name);
        assert_eq!(scene.personality, personality);
        assert!(scene.dialog_text.contains("井盖"));
        assert!(scene.image_prompt.contains("晴天的户外"));
        assert!(scene.image_prompt.contains("圆润可爱"));
    }

    #[test]
    fn test_default_scene_blank_name() {
        let scene = default_scene(" ", 8, "雨天", "公园", "高高的");
        assert!(scene.dialog_text.contains("这个小伙伴"));
        assert!(scene.image_prompt.contains("雨天的公园"));
    }

    #[test]
    fn test_image_to_image_prompt_names_subject() {
        assert!(image_to_image_prompt(" 红绿灯 ").contains("“红绿灯”"));
    }

    #[test]
    fn test_media_error_mapping() {
        assert!(matches!(
            media_error(Error::CapabilityUnavailable(Capability::Voice)),
            Error::MediaUnavailable
        ));
        assert!(matches!(
            media_error(Error::CapabilityUnavailable(Capability::Text)),
            Error::CapabilityUnavailable(Capability::Text)
        ));
    }

    #[test_case("tree", "树", "树" ; "canonical type falls back to display name")]
    #[test_case("树", "树", "树" ; "chinese type matches directly")]
    #[test_case("spaceship", "spaceship", "spaceship" ; "no profile keeps object type")]
    fn test_voice_key(object_type: &str, display_name: &str, expected: &str) {
        let voice = VoiceAdapter::new(crate::llm::VoiceConfig::default());
        assert_eq!(voice_key(&voice, object_type, display_name), expected);
    }

    #[test]
    fn test_validation_order() {
        let service = CompanionService::new();
        let scene = SceneRequest {
            child_age: 2,
            object_type: "tree".to_string(),
            ..SceneRequest::default()
        };
        assert!(matches!(service.generate_scene(&scene), Err(Error::InvalidChildAge(2))));

        let scene = SceneRequest {
            child_age: 8,
            ..SceneRequest::default()
        };
        assert!(matches!(service.generate_scene(&scene), Err(Error::ObjectTypeMissing)));

        let scene = SceneRequest {
            child_age: 8,
            object_type: "tree".to_string(),
            ..SceneRequest::default()
        };
        assert!(matches!(
            service.generate_scene(&scene),
            Err(Error::CapabilityUnavailable(Capability::Text))
        ));

        let chat = ChatRequest {
            child_age: 8,
            object_type: "tree".to_string(),
            child_message: "  ".to_string(),
            ..ChatRequest::default()
        };
        assert!(matches!(service.chat(&chat), Err(Error::ChildMessageMissing)));
    }
}
