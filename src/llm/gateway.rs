//! Chat-completion gateway for vision and text generation.
//!
//! Each operation is one bounded HTTP call followed by normalization. The
//! gateway never substitutes content: callers decide how to degrade.

use super::normalizer::{
    extract_assistant_content, extract_field, extract_json_object, parse_bool_like,
    parse_first_object, parse_recognize_result, sanitize_lines, value_as_bool,
};
use super::prompts;
use super::transport::{
    HttpClientConfig, HttpTransport, JsonRequest, ReqwestTransport, ensure_success, truncate_text,
};
use crate::models::{
    AnswerJudgeResult, CompanionReply, CompanionReplyRequest, CompanionScene,
    CompanionSceneRequest, ImageRef, LearningContent, RecognizeResult,
};
use crate::rendering::PromptRenderer;
use crate::{Capability, Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Vision and text generation operations.
///
/// Implementations must not substitute default content; errors are returned
/// so the orchestrators can pick their own fallbacks.
pub trait GenerativeProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &'static str;

    /// Identifies the main object in an image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapabilityUnavailable`] when unconfigured,
    /// [`Error::UpstreamRequestFailed`] on transport failure, or
    /// [`Error::InvalidResponse`] when no object type can be recovered.
    fn recognize_object(&self, image: &ImageRef) -> Result<RecognizeResult>;

    /// Generates a fact, quiz, and spirit dialogue for an object.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or any of fact, question, or
    /// answer is empty.
    fn generate_learning_content(
        &self,
        object_type: &str,
        child_age: u32,
        spirit_name: &str,
        personality: &str,
    ) -> Result<LearningContent>;

    /// Judges a free-text answer semantically.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or no verdict is found.
    fn judge_answer(
        &self,
        question: &str,
        expected: &str,
        given: &str,
        child_age: u32,
    ) -> Result<AnswerJudgeResult>;

    /// Generates an opening companion scene.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or any scene field is empty.
    fn generate_companion_scene(&self, request: &CompanionSceneRequest) -> Result<CompanionScene>;

    /// Generates the companion's next reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the reply is empty.
    fn generate_companion_reply(&self, request: &CompanionReplyRequest) -> Result<CompanionReply>;
}

/// Selects the upstream model.
///
/// Newer endpoints take a model name; some legacy deployments only accept a
/// numeric `gpt_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSelector {
    /// `{"model": "<name>"}`.
    Model(String),
    /// `{"gpt_type": <id>}`.
    GptType(u32),
}

impl ModelSelector {
    /// Label for logs and metrics.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Model(name) => name.clone(),
            Self::GptType(id) => format!("gpt_type:{id}"),
        }
    }
}

/// Gateway settings.
#[derive(Clone)]
pub struct GatewayConfig {
    /// API base URL.
    pub base_url: String,
    /// Chat-completion path appended to the base URL.
    pub chat_path: String,
    /// Bearer key; `None` leaves the gateway unavailable.
    pub api_key: Option<SecretString>,
    /// Model for text operations.
    pub text_model: ModelSelector,
    /// Model for recognition.
    pub vision_model: ModelSelector,
    /// Optional `x-app-id` header.
    pub app_id: Option<String>,
    /// Optional `x-platform-id` header.
    pub platform_id: Option<String>,
    /// Timeout for every operation except companion replies.
    pub timeout: Duration,
    /// Timeout for companion replies.
    pub companion_chat_timeout: Duration,
}

impl GatewayConfig {
    /// Default API base URL.
    pub const DEFAULT_BASE_URL: &'static str = "https://dashscope.aliyuncs.com";
    /// Default chat-completion path.
    pub const DEFAULT_CHAT_PATH: &'static str = "/compatible-mode/v1/chat/completions";
    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "qwen3.5-flash";
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            chat_path: Self::DEFAULT_CHAT_PATH.to_string(),
            api_key: None,
            text_model: ModelSelector::Model(Self::DEFAULT_MODEL.to_string()),
            vision_model: ModelSelector::Model(Self::DEFAULT_MODEL.to_string()),
            app_id: None,
            platform_id: None,
            timeout: Duration::from_secs(20),
            companion_chat_timeout: Duration::from_secs(45),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("chat_path", &self.chat_path)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("text_model", &self.text_model)
            .field("vision_model", &self.vision_model)
            .field("app_id", &self.app_id)
            .field("platform_id", &self.platform_id)
            .field("timeout", &self.timeout)
            .field("companion_chat_timeout", &self.companion_chat_timeout)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    #[serde(flatten)]
    model: &'a ModelSelector,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

impl ChatMessage {
    fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: MessageContent::Text(text.into()),
        }
    }

    fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: MessageContent::Text(text.into()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlPart },
}

#[derive(Debug, Serialize)]
struct ImageUrlPart {
    url: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

const JSON_OBJECT: Option<ResponseFormat> = Some(ResponseFormat {
    kind: "json_object",
});

/// Chat-completion gateway.
pub struct GenerativeGateway {
    config: GatewayConfig,
    renderer: PromptRenderer,
    transport: Arc<dyn HttpTransport>,
}

impl GenerativeGateway {
    /// Creates a gateway with the production transport.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            renderer: PromptRenderer::new(),
            transport: Arc::new(ReqwestTransport::new(HttpClientConfig::default())),
        }
    }

    /// Replaces the HTTP transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Sets the rule template renderer.
    #[must_use]
    pub fn with_prompt_renderer(mut self, renderer: PromptRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(SecretString::from(key.into()));
        self
    }

    /// Sets the API base URL.
    #[must_use]
    pub fn with_endpoint(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    /// Returns true when an API key is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.config
            .api_key
            .as_ref()
            .is_some_and(|key| !key.expose_secret().trim().is_empty())
    }

    /// Returns the gateway settings.
    #[must_use]
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn api_key(&self, capability: Capability) -> Result<&SecretString> {
        self.config
            .api_key
            .as_ref()
            .filter(|key| !key.expose_secret().trim().is_empty())
            .ok_or(Error::CapabilityUnavailable(capability))
    }

    fn chat_url(&self) -> String {
        let base = self.config.base_url.trim().trim_end_matches('/');
        let path = self.config.chat_path.trim();
        if path.is_empty() {
            return base.to_string();
        }
        format!("{base}/{}", path.trim_start_matches('/'))
    }

    /// Posts one chat completion and returns the assistant text.
    fn chat(
        &self,
        operation: &'static str,
        capability: Capability,
        request: &ChatRequest<'_>,
        timeout: Duration,
    ) -> Result<String> {
        let key = self.api_key(capability)?;
        let body = serde_json::to_value(request).map_err(|e| Error::operation(operation, e))?;
        let url = self.chat_url();

        let mut headers: Vec<(&str, &str)> = Vec::new();
        if let Some(app_id) = self.config.app_id.as_deref().filter(|v| !v.trim().is_empty()) {
            headers.push(("x-app-id", app_id.trim()));
        }
        if let Some(platform_id) = self
            .config
            .platform_id
            .as_deref()
            .filter(|v| !v.trim().is_empty())
        {
            headers.push(("x-platform-id", platform_id.trim()));
        }

        let model = request.model.label();
        tracing::info!(
            provider = "chat_completion",
            operation,
            model = %model,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "Sending provider request"
        );

        let start = Instant::now();
        let result = self
            .transport
            .post_json(&JsonRequest {
                url: &url,
                bearer: Some(key),
                headers: &headers,
                body: &body,
                timeout: Some(timeout),
            })
            .and_then(|response| ensure_success(operation, response))
            .and_then(|response| extract_assistant_content(&response.body));
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::counter!(
            "cityling_provider_requests_total",
            "operation" => operation,
            "status" => status
        )
        .increment(1);
        metrics::histogram!("cityling_provider_request_duration_ms", "operation" => operation)
            .record(elapsed_ms);

        match &result {
            Ok(content) => tracing::debug!(
                operation,
                elapsed_ms,
                content_chars = content.chars().count(),
                "Provider request completed"
            ),
            Err(err) => tracing::error!(operation, elapsed_ms, error = %err, "Provider request failed"),
        }
        result
    }
}

impl GenerativeProvider for GenerativeGateway {
    fn name(&self) -> &'static str {
        "chat_completion"
    }

    #[instrument(skip(self, image))]
    fn recognize_object(&self, image: &ImageRef) -> Result<RecognizeResult> {
        let image_url = image.to_message_url();
        let mut last_error = None;

        for strict in [false, true] {
            let request = ChatRequest {
                model: &self.config.vision_model,
                messages: vec![ChatMessage {
                    role: "user",
                    content: MessageContent::Parts(vec![
                        ContentPart::Text {
                            text: prompts::vision_prompt(strict),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrlPart {
                                url: image_url.clone(),
                            },
                        },
                    ]),
                }],
                temperature: 0.1,
                max_tokens: 320,
                response_format: None,
            };

            let content = match self.chat(
                "recognize_object",
                Capability::Vision,
                &request,
                self.config.timeout,
            ) {
                Ok(content) => content,
                Err(err @ Error::InvalidResponse(_)) => {
                    tracing::warn!(strict, error = %err, "Vision response unreadable");
                    last_error = Some(err);
                    continue;
                },
                Err(err) => return Err(err),
            };

            match parse_recognize_result(&content) {
                Ok(result) => {
                    tracing::info!(
                        object_type = %result.object_type,
                        raw_label = %result.raw_label,
                        strict,
                        "Recognized object"
                    );
                    return Ok(result);
                },
                Err(err) => {
                    tracing::warn!(
                        strict,
                        raw = %truncate_text(&content, 240),
                        "Vision output failed to parse"
                    );
                    last_error = Some(Error::InvalidResponse(format!(
                        "{err}; raw={}",
                        truncate_text(&content, 240)
                    )));
                },
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::InvalidResponse("vision output is empty".to_string())))
    }

    #[instrument(skip(self, spirit_name, personality))]
    fn generate_learning_content(
        &self,
        object_type: &str,
        child_age: u32,
        spirit_name: &str,
        personality: &str,
    ) -> Result<LearningContent> {
        let rules = self.renderer.render(child_age, object_type);
        let request = ChatRequest {
            model: &self.config.text_model,
            messages: vec![
                ChatMessage::system(prompts::LEARNING_SYSTEM_PROMPT),
                ChatMessage::user(prompts::learning_user_prompt(
                    object_type,
                    child_age,
                    spirit_name,
                    personality,
                    &rules,
                )),
            ],
            temperature: 0.7,
            max_tokens: 600,
            response_format: JSON_OBJECT,
        };
        let content = self.chat(
            "generate_learning_content",
            Capability::Text,
            &request,
            self.config.timeout,
        )?;
        parse_learning_content(&content)
    }

    #[instrument(skip(self, question, expected, given))]
    fn judge_answer(
        &self,
        question: &str,
        expected: &str,
        given: &str,
        child_age: u32,
    ) -> Result<AnswerJudgeResult> {
        let request = ChatRequest {
            model: &self.config.text_model,
            messages: vec![
                ChatMessage::system(prompts::JUDGE_SYSTEM_PROMPT),
                ChatMessage::user(prompts::judge_user_prompt(question, expected, given, child_age)),
            ],
            temperature: 0.2,
            max_tokens: 180,
            response_format: JSON_OBJECT,
        };
        let content = self.chat("judge_answer", Capability::Text, &request, self.config.timeout)?;
        parse_judge_result(&content)
    }

    #[instrument(skip(self, request), fields(object_type = %request.object_type, child_age = request.child_age))]
    fn generate_companion_scene(&self, request: &CompanionSceneRequest) -> Result<CompanionScene> {
        let rules = self.renderer.render(request.child_age, &request.object_type);
        let chat = ChatRequest {
            model: &self.config.text_model,
            messages: vec![
                ChatMessage::system(prompts::companion_scene_system_prompt(&rules)),
                ChatMessage::user(prompts::companion_scene_user_prompt(request, &rules)),
            ],
            temperature: 0.8,
            max_tokens: 600,
            response_format: JSON_OBJECT,
        };
        let content = self.chat(
            "generate_companion_scene",
            Capability::Text,
            &chat,
            self.config.timeout,
        )?;
        parse_companion_scene(&content)
    }

    #[instrument(skip(self, request), fields(object_type = %request.object_type, child_age = request.child_age))]
    fn generate_companion_reply(&self, request: &CompanionReplyRequest) -> Result<CompanionReply> {
        let rules = self.renderer.render(request.child_age, &request.object_type);
        let chat = ChatRequest {
            model: &self.config.text_model,
            messages: vec![
                ChatMessage::system(prompts::companion_reply_system_prompt(&rules)),
                ChatMessage::user(prompts::companion_reply_user_prompt(request, &rules)),
            ],
            temperature: 0.7,
            max_tokens: 180,
            response_format: JSON_OBJECT,
        };
        let content = self.chat(
            "generate_companion_reply",
            Capability::Text,
            &chat,
            self.config.companion_chat_timeout,
        )?;
        parse_companion_reply(&content)
    }
}

/// Fills empty string fields from regex recovery over the payload and raw text.
fn recover(content: &str, key: &str, parsed: String) -> String {
    let parsed = parsed.trim();
    if !parsed.is_empty() {
        return parsed.to_string();
    }
    let payload = extract_json_object(content);
    extract_field(&payload, key)
        .or_else(|| extract_field(content, key))
        .unwrap_or_default()
}

fn missing(kind: &str, content: &str) -> Error {
    Error::InvalidResponse(format!(
        "{kind} is missing required fields; raw={}",
        truncate_text(content, 240)
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LearningPayload {
    fact: String,
    quiz_question: String,
    quiz_answer: String,
    dialogues: Option<Vec<String>>,
}

fn parse_learning_content(content: &str) -> Result<LearningContent> {
    let parsed: LearningPayload = parse_first_object(content).unwrap_or_default();
    let fact = recover(content, "fact", parsed.fact);
    let quiz_question = recover(content, "quiz_question", parsed.quiz_question);
    let quiz_answer = recover(content, "quiz_answer", parsed.quiz_answer);
    if fact.is_empty() || quiz_question.is_empty() || quiz_answer.is_empty() {
        return Err(missing("learning content", content));
    }
    Ok(LearningContent {
        fact,
        quiz_question,
        quiz_answer,
        dialogues: sanitize_lines(parsed.dialogues.unwrap_or_default()),
    })
}

fn parse_judge_result(content: &str) -> Result<AnswerJudgeResult> {
    if let Ok(serde_json::Value::Object(map)) = parse_first_object::<serde_json::Value>(content) {
        if let Some(correct) = map.get("correct").and_then(value_as_bool) {
            let reason = match map.get("reason") {
                Some(serde_json::Value::String(text)) => text.trim().to_string(),
                Some(serde_json::Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            return Ok(AnswerJudgeResult { correct, reason });
        }
    }

    let correct = recover(content, "correct", String::new());
    match parse_bool_like(&correct) {
        Some(correct) => Ok(AnswerJudgeResult {
            correct,
            reason: recover(content, "reason", String::new()),
        }),
        None => Err(missing("answer judgement", content)),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScenePayload {
    character_name: String,
    personality: String,
    dialog_text: String,
    image_prompt: String,
}

fn parse_companion_scene(content: &str) -> Result<CompanionScene> {
    let parsed: ScenePayload = parse_first_object(content).unwrap_or_default();
    let scene = CompanionScene {
        character_name: recover(content, "character_name", parsed.character_name),
        personality: recover(content, "personality", parsed.personality),
        dialog_text: recover(content, "dialog_text", parsed.dialog_text),
        image_prompt: recover(content, "image_prompt", parsed.image_prompt),
    };
    if scene.character_name.is_empty()
        || scene.personality.is_empty()
        || scene.dialog_text.is_empty()
        || scene.image_prompt.is_empty()
    {
        return Err(missing("companion scene", content));
    }
    Ok(scene)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReplyPayload {
    reply_text: String,
}

fn parse_companion_reply(content: &str) -> Result<CompanionReply> {
    let parsed: ReplyPayload = parse_first_object(content).unwrap_or_default();
    let reply_text = recover(content, "reply_text", parsed.reply_text);
    if reply_text.is_empty() {
        return Err(missing("companion reply", content));
    }
    Ok(CompanionReply { reply_text })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::transport::HttpResponse;
    use std::sync::Mutex;

    struct CannedTransport {
        responses: Mutex<Vec<HttpResponse>>,
        bodies: Mutex<Vec<serde_json::Value>>,
    }

    impl CannedTransport {
        fn new(mut responses: Vec<HttpResponse>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
                bodies: Mutex::new(Vec::new()),
            })
        }
    }

    impl HttpTransport for CannedTransport {
        fn post_json(&self, request: &JsonRequest<'_>) -> Result<HttpResponse> {
            self.bodies.lock().unwrap().push(request.body.clone());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| Error::upstream("http_post", "no scripted response"))
        }

        fn get(&self, _url: &str, _timeout: Option<Duration>) -> Result<HttpResponse> {
            Err(Error::upstream("http_get", "unexpected GET"))
        }
    }

    fn chat_reply(content: &str) -> HttpResponse {
        HttpResponse::json(
            200,
            &serde_json::json!({"choices": [{"message": {"content": content}}]}),
        )
    }

    fn gateway(transport: Arc<CannedTransport>) -> GenerativeGateway {
        GenerativeGateway::new(GatewayConfig::default())
            .with_api_key("sk-test")
            .with_transport(transport)
    }

    #[test]
    fn test_unconfigured_gateway_reports_capability() {
        let gateway = GenerativeGateway::new(GatewayConfig::default());
        assert!(!gateway.is_configured());
        let result = gateway.judge_answer("q", "a", "a", 8);
        assert!(matches!(
            result,
            Err(Error::CapabilityUnavailable(Capability::Text))
        ));
        let result = gateway.recognize_object(&ImageRef::Url("https://x/y.png".to_string()));
        assert!(matches!(
            result,
            Err(Error::CapabilityUnavailable(Capability::Vision))
        ));
    }

    #[test]
    fn test_chat_url_joins_slashes() {
        let gateway = GenerativeGateway::new(GatewayConfig::default())
            .with_endpoint("https://api.example.com/");
        assert_eq!(
            gateway.chat_url(),
            "https://api.example.com/compatible-mode/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let transport = CannedTransport::new(vec![chat_reply(r#"{"correct":true,"reason":"对"}"#)]);
        let mut config = GatewayConfig::default();
        config.text_model = ModelSelector::GptType(8102);
        let gateway = GenerativeGateway::new(config)
            .with_api_key("sk-test")
            .with_transport(transport.clone());

        gateway.judge_answer("题目", "信件", "信", 8).unwrap();

        let bodies = transport.bodies.lock().unwrap();
        let body = &bodies[0];
        assert_eq!(body["gpt_type"], 8102);
        assert!(body.get("model").is_none());
        assert_eq!(body["max_tokens"], 180);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[test]
    fn test_recognize_retries_with_strict_prompt_on_parse_failure() {
        let transport = CannedTransport::new(vec![
            chat_reply("I cannot tell what this is."),
            chat_reply(r#"{"object_type":"post box","raw_label":"邮筒","reason":"绿色"}"#),
        ]);
        let gateway = gateway(transport.clone());

        let result = gateway
            .recognize_object(&ImageRef::Base64("QUJD".to_string()))
            .unwrap();
        assert_eq!(result.object_type, "mailbox");
        assert_eq!(result.raw_label, "邮筒");

        let bodies = transport.bodies.lock().unwrap();
        assert_eq!(bodies.len(), 2);
        let first = bodies[0]["messages"][0]["content"][0]["text"].as_str().unwrap();
        let second = bodies[1]["messages"][0]["content"][0]["text"].as_str().unwrap();
        assert!(!first.contains("unknown"));
        assert!(second.contains("unknown"));
        assert_eq!(
            bodies[0]["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,QUJD"
        );
    }

    #[test]
    fn test_recognize_does_not_retry_upstream_failure() {
        let transport = CannedTransport::new(vec![HttpResponse::json(
            503,
            &serde_json::json!({"error": "busy"}),
        )]);
        let gateway = gateway(transport.clone());
        let result = gateway.recognize_object(&ImageRef::Url("https://x/y.png".to_string()));
        assert!(matches!(
            result,
            Err(Error::UpstreamRequestFailed {
                status: Some(503),
                ..
            })
        ));
        assert_eq!(transport.bodies.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_recognize_surfaces_last_parse_error() {
        let transport = CannedTransport::new(vec![chat_reply("???"), chat_reply("still ???")]);
        let result = gateway(transport).recognize_object(&ImageRef::Url("u".to_string()));
        match result {
            Err(Error::InvalidResponse(message)) => assert!(message.contains("still ???")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_learning_content_recovers_truncated_fields() {
        let content = r#"```json
{"fact":"邮筒用来收集信件","quiz_question":"邮筒里装的是什么？","quiz_answer":"信件","dialogues":["嗨","""#;
        let parsed = parse_learning_content(content).unwrap();
        assert_eq!(parsed.fact, "邮筒用来收集信件");
        assert_eq!(parsed.quiz_answer, "信件");
        assert!(parsed.dialogues.is_empty());
    }

    #[test]
    fn test_parse_learning_content_requires_scalars() {
        let result = parse_learning_content(r#"{"fact":"a","quiz_question":"","quiz_answer":"c"}"#);
        assert!(matches!(result, Err(Error::InvalidResponse(_))));
    }

    #[test]
    fn test_parse_learning_content_sanitizes_dialogues() {
        let parsed = parse_learning_content(
            r#"{"fact":"f","quiz_question":"q","quiz_answer":"a","dialogues":[" 你好 ","",null]}"#,
        );
        // null inside the array fails typed parsing; scalars are recovered by regex.
        let parsed = parsed.unwrap();
        assert_eq!(parsed.fact, "f");
        assert!(parsed.dialogues.is_empty());

        let parsed = parse_learning_content(
            r#"{"fact":"f","quiz_question":"q","quiz_answer":"a","dialogues":[" 你好 ","  "]}"#,
        )
        .unwrap();
        assert_eq!(parsed.dialogues, vec!["你好".to_string()]);
    }

    #[test]
    fn test_parse_judge_variants() {
        let parsed = parse_judge_result(r#"{"correct":"是","reason":"意思相同"}"#).unwrap();
        assert!(parsed.correct);
        assert_eq!(parsed.reason, "意思相同");

        let parsed = parse_judge_result(r#"{"correct": false, "reason": "不对"#).unwrap();
        assert!(!parsed.correct);
        assert_eq!(parsed.reason, "");

        assert!(parse_judge_result("我觉得可以").is_err());
    }

    #[test]
    fn test_parse_scene_requires_all_fields() {
        let ok = parse_companion_scene(
            r#"{"character_name":"邮邮","personality":"热情","dialog_text":"我是邮筒","image_prompt":"绘本风"}"#,
        );
        assert!(ok.is_ok());
        let missing = parse_companion_scene(
            r#"{"character_name":"邮邮","personality":"热情","dialog_text":"我是邮筒"}"#,
        );
        assert!(matches!(missing, Err(Error::InvalidResponse(_))));
    }

    #[test]
    fn test_companion_reply_uses_chat_timeout() {
        struct TimeoutProbe(Mutex<Option<Duration>>);
        impl HttpTransport for TimeoutProbe {
            fn post_json(&self, request: &JsonRequest<'_>) -> Result<HttpResponse> {
                *self.0.lock().unwrap() = request.timeout;
                Ok(chat_reply(r#"{"reply_text":"我在这儿"}"#))
            }
            fn get(&self, _url: &str, _timeout: Option<Duration>) -> Result<HttpResponse> {
                unreachable!()
            }
        }

        let probe = Arc::new(TimeoutProbe(Mutex::new(None)));
        let gateway = GenerativeGateway::new(GatewayConfig::default())
            .with_api_key("sk-test")
            .with_transport(probe.clone());
        let reply = gateway
            .generate_companion_reply(&CompanionReplyRequest {
                object_type: "tree".to_string(),
                child_age: 6,
                child_message: "你好".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(reply.reply_text, "我在这儿");
        assert_eq!(*probe.0.lock().unwrap(), Some(Duration::from_secs(45)));
    }

    #[test]
    fn test_debug_redacts_key() {
        let mut config = GatewayConfig::default();
        config.api_key = Some(SecretString::from("sk-very-secret".to_string()));
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-very-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
