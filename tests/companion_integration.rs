//! Companion service integration tests.
//!
//! Runs a full scene and chat turn through scripted transports for the
//! gateway, image and voice adapters.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use cityling::CompanionService;
use cityling::llm::{
    GatewayConfig, GenerativeGateway, HttpResponse, ImageAdapter, ImageConfig, VoiceAdapter,
    VoiceConfig, VoiceProfile, VoiceProfiles,
};
use cityling::services::{ChatRequest, SceneRequest};
use common::{ScriptedTransport, bytes_reply, chat_reply, error_reply};
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;

struct Transports {
    llm: Arc<ScriptedTransport>,
    image: Arc<ScriptedTransport>,
    voice: Arc<ScriptedTransport>,
}

fn service() -> (CompanionService, Transports) {
    let transports = Transports {
        llm: ScriptedTransport::new(),
        image: ScriptedTransport::new(),
        voice: ScriptedTransport::new(),
    };
    let gateway = GenerativeGateway::new(GatewayConfig::default())
        .with_api_key("sk-test")
        .with_endpoint("https://llm.example.com/")
        .with_transport(transports.llm.clone());
    let image = ImageAdapter::new(ImageConfig {
        api_key: Some(SecretString::from("img-key".to_string())),
        ..ImageConfig::default()
    })
    .with_transport(transports.image.clone());
    let voice = VoiceAdapter::new(VoiceConfig {
        api_key: Some(SecretString::from("tts-key".to_string())),
        voice_id: "Ethan".to_string(),
        ..VoiceConfig::default()
    })
    .with_profiles(VoiceProfiles {
        fallback_voices: vec!["Serena".to_string()],
        profiles: vec![VoiceProfile {
            name: "plant".to_string(),
            keywords: vec!["树".to_string(), "花".to_string()],
            voices: vec!["Chelsie".to_string()],
        }],
    })
    .with_transport(transports.voice.clone());

    let service = CompanionService::new()
        .with_provider(Arc::new(gateway))
        .with_image_adapter(Arc::new(image))
        .with_voice_adapter(Arc::new(voice));
    (service, transports)
}

fn inline_audio() -> HttpResponse {
    HttpResponse::json(200, &json!({ "output": { "audio": { "data": "UklGRg==" } } }))
}

fn requested_voices(transport: &ScriptedTransport) -> Vec<String> {
    transport
        .requests()
        .iter()
        .map(|r| r.body["input"]["voice"].as_str().unwrap().to_string())
        .collect()
}

// ============================================================================
// Scene
// ============================================================================

#[test]
fn test_scene_for_canonical_type_uses_matching_voice_profile() {
    let (service, transports) = service();
    transports.llm.push_post(chat_reply(
        r#"{"character_name":"叶叶","personality":"温柔","dialog_text":"你好呀，我是大树叶叶。","image_prompt":"绘本风大树"}"#,
    ));
    transports.image.push_post(HttpResponse::json(
        200,
        &json!({ "output": { "results": [{ "image": "https://cdn.example.com/tree.png" }] } }),
    ));
    transports.image.push_get(bytes_reply(b"PNG", "image/png"));
    transports.voice.push_post(inline_audio());

    let scene = service
        .generate_scene(&SceneRequest {
            child_age: 6,
            object_type: "tree".to_string(),
            ..SceneRequest::default()
        })
        .unwrap();

    assert_eq!(scene.character_name, "叶叶");
    assert_eq!(scene.character_image_url, "https://cdn.example.com/tree.png");
    assert_eq!(scene.character_image_base64, "UE5H");
    assert_eq!(scene.voice_audio_base64, "UklGRg==");
    assert_eq!(requested_voices(&transports.voice), vec!["Chelsie"]);
}

#[test]
fn test_scene_voice_rotation_follows_profile_pool() {
    let (service, transports) = service();
    transports.llm.push_post(chat_reply(
        r#"{"character_name":"叶叶","personality":"温柔","dialog_text":"你好呀","image_prompt":"绘本风大树"}"#,
    ));
    transports.image.push_post(HttpResponse::json(
        200,
        &json!({ "output": { "image": "https://cdn.example.com/tree.png" } }),
    ));
    transports.image.push_get(bytes_reply(b"PNG", "image/png"));
    transports.voice.push_post(error_reply(400, "Voice 'Chelsie' is invalid"));
    transports.voice.push_post(inline_audio());

    service
        .generate_scene(&SceneRequest {
            child_age: 6,
            object_type: "tree".to_string(),
            ..SceneRequest::default()
        })
        .unwrap();

    assert_eq!(requested_voices(&transports.voice), vec!["Chelsie", "Ethan"]);
}

// ============================================================================
// Chat
// ============================================================================

#[test]
fn test_chat_unmatched_type_uses_fallback_pool() {
    let (service, transports) = service();
    transports
        .llm
        .push_post(chat_reply(r#"{"reply_text":"我会飞到月亮上去哦！"}"#));
    transports.voice.push_post(inline_audio());

    let reply = service
        .chat(&ChatRequest {
            child_age: 8,
            object_type: "spaceship".to_string(),
            child_message: "你会飞吗？".to_string(),
            ..ChatRequest::default()
        })
        .unwrap();

    assert_eq!(reply.reply_text, "我会飞到月亮上去哦！");
    assert_eq!(reply.voice_mime_type, "audio/wav");
    assert_eq!(requested_voices(&transports.voice), vec!["Serena"]);
}
