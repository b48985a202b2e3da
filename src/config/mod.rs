//! Configuration management.
//!
//! Layers, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. A TOML file (`--config`, `CITYLING_CONFIG_PATH`, or the user config dir)
//! 3. `CITYLING_*` environment variables
//!
//! Image and voice keys fall back to the LLM key when unset.

use crate::llm::{
    GatewayConfig, HttpClientConfig, ImageConfig, LAST_RESORT_VOICE, ModelSelector, VoiceConfig,
};
use crate::observability::LogFormat;
use crate::services::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "CITYLING_CONFIG_PATH";

/// Chat/vision gateway settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// API base URL.
    pub base_url: String,
    /// Chat-completion path.
    pub chat_path: String,
    /// Bearer key.
    pub api_key: Option<SecretString>,
    /// Text model name.
    pub model: String,
    /// Vision model name; defaults to `model`.
    pub vision_model: Option<String>,
    /// Legacy numeric model selector; overrides model names when set.
    pub gpt_type: Option<u32>,
    /// `x-app-id` header.
    pub app_id: Option<String>,
    /// `x-platform-id` header.
    pub platform_id: Option<String>,
    /// General request timeout.
    pub timeout_secs: u64,
    /// Companion reply timeout.
    pub companion_chat_timeout_secs: u64,
    /// Connect timeout shared by every provider client.
    pub connect_timeout_ms: u64,
    /// Optional rule template for generation prompts.
    pub prompt_spec_path: Option<PathBuf>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: GatewayConfig::DEFAULT_BASE_URL.to_string(),
            chat_path: GatewayConfig::DEFAULT_CHAT_PATH.to_string(),
            api_key: None,
            model: GatewayConfig::DEFAULT_MODEL.to_string(),
            vision_model: None,
            gpt_type: None,
            app_id: None,
            platform_id: None,
            timeout_secs: 20,
            companion_chat_timeout_secs: 45,
            connect_timeout_ms: HttpClientConfig::default().connect_timeout_ms,
            prompt_spec_path: None,
        }
    }
}

/// Portrait generation settings.
#[derive(Debug, Clone)]
pub struct ImageSettings {
    /// Base URL or full generation URL.
    pub base_url: String,
    /// Bearer key; falls back to the LLM key.
    pub api_key: Option<SecretString>,
    /// Model name.
    pub model: String,
    /// `url` or `b64_json`.
    pub response_format: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            base_url: ImageConfig::DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: ImageConfig::DEFAULT_MODEL.to_string(),
            response_format: "url".to_string(),
        }
    }
}

/// Speech synthesis settings.
#[derive(Debug, Clone)]
pub struct VoiceSettings {
    /// Base URL or full synthesis URL.
    pub base_url: String,
    /// Bearer key; falls back to the LLM key.
    pub api_key: Option<SecretString>,
    /// Preferred voice.
    pub voice_id: String,
    /// TTS model.
    pub model: String,
    /// Language code or name.
    pub language: String,
    /// Voice profile JSON file.
    pub profile_path: Option<PathBuf>,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            base_url: VoiceConfig::DEFAULT_BASE_URL.to_string(),
            api_key: None,
            voice_id: LAST_RESORT_VOICE.to_string(),
            model: VoiceConfig::DEFAULT_MODEL.to_string(),
            language: "Chinese".to_string(),
            profile_path: None,
        }
    }
}

/// Content cache settings.
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    /// Entry lifetime in seconds.
    pub ttl_secs: u64,
    /// Maximum number of entries.
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageEngine {
    /// In-process maps; nothing persists.
    Memory,
    /// `SQLite` database file.
    #[default]
    Sqlite,
}

impl StorageEngine {
    /// Parses an engine name, defaulting to `SQLite`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" | "inmemory" | "in_memory" => Self::Memory,
            _ => Self::Sqlite,
        }
    }
}

/// Store settings.
#[derive(Debug, Clone, Default)]
pub struct StorageSettings {
    /// Backend.
    pub engine: StorageEngine,
    /// Database path; defaults to the user data dir.
    pub path: Option<PathBuf>,
}

/// Logging settings.
#[derive(Debug, Clone, Default)]
pub struct LoggingSettings {
    /// Output format.
    pub format: LogFormat,
    /// `EnvFilter` directive; `CITYLING_LOG` / `RUST_LOG` still win.
    pub filter: Option<String>,
    /// Optional log file.
    pub file: Option<PathBuf>,
}

/// Badge settings.
#[derive(Debug, Clone, Default)]
pub struct BadgeSettings {
    /// Artwork manifest mapping badge IDs to URLs.
    pub asset_manifest_path: Option<PathBuf>,
}

/// Main configuration for cityling.
#[derive(Debug, Clone, Default)]
pub struct CitylingConfig {
    /// Gateway settings.
    pub llm: LlmSettings,
    /// Portrait settings.
    pub image: ImageSettings,
    /// Speech settings.
    pub voice: VoiceSettings,
    /// Content cache settings.
    pub cache: CacheSettings,
    /// Store settings.
    pub storage: StorageSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
    /// Badge settings.
    pub badges: BadgeSettings,
    /// File the configuration was loaded from.
    pub source: Option<PathBuf>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// LLM section.
    pub llm: Option<ConfigFileLlm>,
    /// Image section.
    pub image: Option<ConfigFileImage>,
    /// Voice section.
    pub voice: Option<ConfigFileVoice>,
    /// Cache section.
    pub cache: Option<ConfigFileCache>,
    /// Storage section.
    pub storage: Option<ConfigFileStorage>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
    /// Badges section.
    pub badges: Option<ConfigFileBadges>,
}

/// LLM section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLlm {
    /// Base URL.
    pub base_url: Option<String>,
    /// Chat path.
    pub chat_path: Option<String>,
    /// API key.
    pub api_key: Option<String>,
    /// Text model.
    pub model: Option<String>,
    /// Vision model.
    pub vision_model: Option<String>,
    /// Legacy model selector.
    pub gpt_type: Option<u32>,
    /// App ID header.
    pub app_id: Option<String>,
    /// Platform ID header.
    pub platform_id: Option<String>,
    /// General timeout.
    pub timeout_secs: Option<u64>,
    /// Companion reply timeout.
    pub companion_chat_timeout_secs: Option<u64>,
    /// Connect timeout.
    pub connect_timeout_ms: Option<u64>,
    /// Rule template path.
    pub prompt_spec_path: Option<String>,
}

/// Image section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileImage {
    /// Base URL.
    pub base_url: Option<String>,
    /// API key.
    pub api_key: Option<String>,
    /// Model.
    pub model: Option<String>,
    /// Response format.
    pub response_format: Option<String>,
}

/// Voice section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileVoice {
    /// Base URL.
    pub base_url: Option<String>,
    /// API key.
    pub api_key: Option<String>,
    /// Preferred voice.
    pub voice_id: Option<String>,
    /// Model.
    pub model: Option<String>,
    /// Language.
    pub language: Option<String>,
    /// Profile file.
    pub profile_path: Option<String>,
}

/// Cache section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileCache {
    /// TTL in seconds.
    pub ttl_secs: Option<u64>,
    /// Capacity.
    pub capacity: Option<usize>,
}

/// Storage section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileStorage {
    /// `memory` or `sqlite`.
    pub engine: Option<String>,
    /// Database path.
    pub path: Option<String>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLogging {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Filter directive.
    pub filter: Option<String>,
    /// Log file.
    pub file: Option<String>,
}

/// Badges section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileBadges {
    /// Asset manifest path.
    pub asset_manifest_path: Option<String>,
}

fn secret(value: Option<String>) -> Option<SecretString> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(SecretString::from)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Describes a key without revealing it.
#[must_use]
pub fn key_meta(key: Option<&SecretString>) -> String {
    let Some(key) = key else {
        return "empty=true".to_string();
    };
    let raw = key.expose_secret().trim();
    if raw.is_empty() {
        return "empty=true".to_string();
    }
    let quoted = (raw.starts_with('"') && raw.ends_with('"'))
        || (raw.starts_with('\'') && raw.ends_with('\''));
    format!(
        "empty=false,len={},starts_with_sk={},has_bearer_prefix={},has_quotes={quoted},has_whitespace={}",
        raw.len(),
        raw.starts_with("sk-"),
        raw.to_lowercase().starts_with("bearer "),
        raw.contains(char::is_whitespace),
    )
}

impl CitylingConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::operation("read_config_file", format!("{}: {e}", path.display())))?;
        let mut config = Self::from_toml(&contents)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for [`ConfigFile`].
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| Error::operation("parse_config_file", e))?;
        Ok(Self::from_config_file(file))
    }

    /// Default config file location (`~/.config/cityling/config.toml`).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new().map(|dirs| {
            dirs.home_dir()
                .join(".config")
                .join("cityling")
                .join("config.toml")
        })
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the platform config dir, then `~/.config/cityling/`. Returns
    /// defaults if no readable file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };
        let candidates = [
            Some(base_dirs.config_dir().join("cityling").join("config.toml")),
            Self::default_path(),
        ];
        for path in candidates.into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            match Self::load_from_file(&path) {
                Ok(config) => return config,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "Ignoring unreadable config file");
                },
            }
        }
        Self::default()
    }

    /// Loads the full layered configuration.
    ///
    /// An explicit path (argument or `CITYLING_CONFIG_PATH`) must be
    /// readable; otherwise the default location is optional.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit config file cannot be loaded.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let mut config = match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::load_default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Converts a `ConfigFile` to `CitylingConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(llm) = file.llm {
            let target = &mut config.llm;
            if let Some(v) = non_empty(llm.base_url) {
                target.base_url = v;
            }
            if let Some(v) = non_empty(llm.chat_path) {
                target.chat_path = v;
            }
            target.api_key = secret(llm.api_key);
            if let Some(v) = non_empty(llm.model) {
                target.model = v;
            }
            target.vision_model = non_empty(llm.vision_model);
            target.gpt_type = llm.gpt_type.filter(|v| *v > 0);
            target.app_id = non_empty(llm.app_id);
            target.platform_id = non_empty(llm.platform_id);
            if let Some(v) = llm.timeout_secs {
                target.timeout_secs = v;
            }
            if let Some(v) = llm.companion_chat_timeout_secs {
                target.companion_chat_timeout_secs = v;
            }
            if let Some(v) = llm.connect_timeout_ms {
                target.connect_timeout_ms = v;
            }
            target.prompt_spec_path = non_empty(llm.prompt_spec_path).map(PathBuf::from);
        }
        if let Some(image) = file.image {
            let target = &mut config.image;
            if let Some(v) = non_empty(image.base_url) {
                target.base_url = v;
            }
            target.api_key = secret(image.api_key);
            if let Some(v) = non_empty(image.model) {
                target.model = v;
            }
            if let Some(v) = non_empty(image.response_format) {
                target.response_format = v;
            }
        }
        if let Some(voice) = file.voice {
            let target = &mut config.voice;
            if let Some(v) = non_empty(voice.base_url) {
                target.base_url = v;
            }
            target.api_key = secret(voice.api_key);
            if let Some(v) = non_empty(voice.voice_id) {
                target.voice_id = v;
            }
            if let Some(v) = voice.model {
                target.model = v.trim().to_string();
            }
            if let Some(v) = non_empty(voice.language) {
                target.language = v;
            }
            target.profile_path = non_empty(voice.profile_path).map(PathBuf::from);
        }
        if let Some(cache) = file.cache {
            if let Some(v) = cache.ttl_secs {
                config.cache.ttl_secs = v;
            }
            if let Some(v) = cache.capacity {
                config.cache.capacity = v;
            }
        }
        if let Some(storage) = file.storage {
            if let Some(v) = storage.engine {
                config.storage.engine = StorageEngine::parse(&v);
            }
            config.storage.path = non_empty(storage.path).map(PathBuf::from);
        }
        if let Some(logging) = file.logging {
            if let Some(v) = logging.format {
                config.logging.format = LogFormat::parse(&v);
            }
            config.logging.filter = non_empty(logging.filter);
            config.logging.file = non_empty(logging.file).map(PathBuf::from);
        }
        if let Some(badges) = file.badges {
            config.badges.asset_manifest_path =
                non_empty(badges.asset_manifest_path).map(PathBuf::from);
        }

        config
    }

    /// Applies `CITYLING_*` overrides from a variable lookup.
    ///
    /// Blank values are ignored. Unparseable numbers are logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));
        let get_num = |key: &str| {
            get(key).and_then(|raw| match raw.parse::<u64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "Ignoring non-numeric override");
                    None
                },
            })
        };

        if let Some(v) = get("CITYLING_DASHSCOPE_API_KEY").or_else(|| get("CITYLING_LLM_API_KEY")) {
            self.llm.api_key = Some(SecretString::from(v));
        }
        if let Some(v) = get("CITYLING_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("CITYLING_LLM_CHAT_PATH") {
            self.llm.chat_path = v;
        }
        if let Some(v) = get("CITYLING_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("CITYLING_LLM_VISION_MODEL") {
            self.llm.vision_model = Some(v);
        }
        if let Some(v) = get_num("CITYLING_LLM_GPT_TYPE") {
            self.llm.gpt_type = u32::try_from(v).ok().filter(|v| *v > 0);
        }
        if let Some(v) = get("CITYLING_LLM_APP_ID") {
            self.llm.app_id = Some(v);
        }
        if let Some(v) = get("CITYLING_LLM_PLATFORM_ID") {
            self.llm.platform_id = Some(v);
        }
        if let Some(v) = get_num("CITYLING_LLM_TIMEOUT_SECONDS") {
            self.llm.timeout_secs = v;
        }
        if let Some(v) = get_num("CITYLING_COMPANION_CHAT_TIMEOUT_SECONDS") {
            self.llm.companion_chat_timeout_secs = v;
        }
        if let Some(v) = get_num("CITYLING_LLM_CONNECT_TIMEOUT_MS") {
            self.llm.connect_timeout_ms = v;
        }
        if let Some(v) = get("CITYLING_PROMPT_SPEC_FILE") {
            self.llm.prompt_spec_path = Some(PathBuf::from(v));
        }

        if let Some(v) = get("CITYLING_IMAGE_API_BASE_URL") {
            self.image.base_url = v;
        }
        if let Some(v) = get("CITYLING_IMAGE_API_KEY") {
            self.image.api_key = Some(SecretString::from(v));
        }
        if let Some(v) = get("CITYLING_IMAGE_MODEL") {
            self.image.model = v;
        }
        if let Some(v) = get("CITYLING_IMAGE_RESPONSE_FORMAT") {
            self.image.response_format = v;
        }

        if let Some(v) = get("CITYLING_TTS_API_BASE_URL") {
            self.voice.base_url = v;
        }
        if let Some(v) = get("CITYLING_TTS_API_KEY") {
            self.voice.api_key = Some(SecretString::from(v));
        }
        if let Some(v) = get("CITYLING_TTS_VOICE_ID") {
            self.voice.voice_id = v;
        }
        if let Some(v) = get("CITYLING_TTS_MODEL_ID") {
            self.voice.model = v;
        }
        if let Some(v) = get("CITYLING_TTS_LANGUAGE_CODE") {
            self.voice.language = v;
        }
        if let Some(v) = get("CITYLING_TTS_PROFILE_FILE") {
            self.voice.profile_path = Some(PathBuf::from(v));
        }

        if let Some(v) = get_num("CITYLING_CACHE_TTL_SECONDS") {
            self.cache.ttl_secs = v;
        }
        if let Some(v) = get_num("CITYLING_CACHE_CAPACITY") {
            self.cache.capacity = usize::try_from(v).unwrap_or(usize::MAX);
        }

        if let Some(v) = get("CITYLING_STORE") {
            self.storage.engine = StorageEngine::parse(&v);
        }
        if let Some(v) = get("CITYLING_DATA_FILE") {
            self.storage.path = Some(PathBuf::from(v));
        }

        if let Some(v) = get("CITYLING_LOG_FORMAT") {
            self.logging.format = LogFormat::parse(&v);
        }
        if let Some(v) = get("CITYLING_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(v));
        }

        if let Some(v) = get("CITYLING_BADGE_ASSET_MANIFEST") {
            self.badges.asset_manifest_path = Some(PathBuf::from(v));
        }
    }

    fn model_selectors(&self) -> (ModelSelector, ModelSelector) {
        if let Some(id) = self.llm.gpt_type {
            return (ModelSelector::GptType(id), ModelSelector::GptType(id));
        }
        let text = ModelSelector::Model(self.llm.model.clone());
        let vision = self
            .llm
            .vision_model
            .clone()
            .map_or_else(|| text.clone(), ModelSelector::Model);
        (text, vision)
    }

    /// Gateway settings derived from this configuration.
    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        let (text_model, vision_model) = self.model_selectors();
        GatewayConfig {
            base_url: self.llm.base_url.clone(),
            chat_path: self.llm.chat_path.clone(),
            api_key: self.llm.api_key.clone(),
            text_model,
            vision_model,
            app_id: self.llm.app_id.clone(),
            platform_id: self.llm.platform_id.clone(),
            timeout: Duration::from_secs(self.llm.timeout_secs),
            companion_chat_timeout: Duration::from_secs(self.llm.companion_chat_timeout_secs),
        }
    }

    /// Image adapter settings; the key falls back to the LLM key.
    #[must_use]
    pub fn image_config(&self) -> ImageConfig {
        ImageConfig {
            base_url: self.image.base_url.clone(),
            api_key: self.image.api_key.clone().or_else(|| self.llm.api_key.clone()),
            model: self.image.model.clone(),
            response_format: self.image.response_format.clone(),
            app_id: self.llm.app_id.clone(),
            download_timeout: Duration::from_secs(self.llm.timeout_secs),
        }
    }

    /// Voice adapter settings; the key falls back to the LLM key.
    #[must_use]
    pub fn voice_config(&self) -> VoiceConfig {
        VoiceConfig {
            base_url: self.voice.base_url.clone(),
            api_key: self.voice.api_key.clone().or_else(|| self.llm.api_key.clone()),
            voice_id: self.voice.voice_id.clone(),
            model: self.voice.model.clone(),
            language: self.voice.language.clone(),
            timeout: Duration::from_secs(self.llm.timeout_secs),
        }
    }

    /// Transport settings shared by every provider client.
    #[must_use]
    pub const fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            connect_timeout_ms: self.llm.connect_timeout_ms,
        }
    }

    /// Content cache TTL.
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = CitylingConfig::default();
        assert_eq!(config.llm.timeout_secs, 20);
        assert_eq!(config.llm.companion_chat_timeout_secs, 45);
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.storage.engine, StorageEngine::Sqlite);
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn test_from_toml_sections() {
        let config = CitylingConfig::from_toml(
            r#"
            [llm]
            api_key = "sk-test"
            model = "qwen-max"
            vision_model = "qwen-vl"
            timeout_secs = 30

            [voice]
            voice_id = "Serena"

            [cache]
            ttl_secs = 60
            capacity = 10

            [storage]
            engine = "memory"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.model, "qwen-max");
        assert_eq!(config.llm.timeout_secs, 30);
        assert_eq!(config.voice.voice_id, "Serena");
        assert_eq!(config.cache.capacity, 10);
        assert_eq!(config.storage.engine, StorageEngine::Memory);
        assert_eq!(config.logging.format, LogFormat::Json);

        let gateway = config.gateway_config();
        assert_eq!(gateway.text_model, ModelSelector::Model("qwen-max".to_string()));
        assert_eq!(gateway.vision_model, ModelSelector::Model("qwen-vl".to_string()));
        assert_eq!(gateway.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_toml_fails() {
        let err = CitylingConfig::from_toml("[llm\nmodel=").unwrap_err();
        assert!(matches!(err, Error::OperationFailed { ref operation, .. } if operation == "parse_config_file"));
    }

    #[test]
    fn test_media_keys_fall_back_to_llm_key() {
        let mut config = CitylingConfig::default();
        config.llm.api_key = Some(SecretString::from("sk-main".to_string()));
        config.voice.api_key = Some(SecretString::from("sk-voice".to_string()));

        let image = config.image_config();
        let voice = config.voice_config();
        assert_eq!(image.api_key.as_ref().map(|k| k.expose_secret()), Some("sk-main"));
        assert_eq!(voice.api_key.as_ref().map(|k| k.expose_secret()), Some("sk-voice"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CITYLING_LLM_API_KEY", "sk-env"),
            ("CITYLING_LLM_GPT_TYPE", "8602"),
            ("CITYLING_CACHE_TTL_SECONDS", "not-a-number"),
            ("CITYLING_STORE", "memory"),
            ("CITYLING_TTS_VOICE_ID", "  "),
        ]
        .into_iter()
        .collect();
        let mut config = CitylingConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| (*v).to_string()));

        assert_eq!(
            config.llm.api_key.as_ref().map(|k| k.expose_secret()),
            Some("sk-env")
        );
        assert_eq!(config.gateway_config().text_model, ModelSelector::GptType(8602));
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.storage.engine, StorageEngine::Memory);
        assert_eq!(config.voice.voice_id, LAST_RESORT_VOICE);
    }

    #[test]
    fn test_debug_redacts_keys() {
        let mut config = CitylingConfig::default();
        config.llm.api_key = Some(SecretString::from("sk-very-secret".to_string()));
        assert!(!format!("{config:?}").contains("sk-very-secret"));
    }

    #[test]
    fn test_key_meta() {
        assert_eq!(key_meta(None), "empty=true");
        let key = SecretString::from("sk-abc".to_string());
        let meta = key_meta(Some(&key));
        assert!(meta.contains("len=6"));
        assert!(meta.contains("starts_with_sk=true"));
        assert!(!meta.contains("abc"));
    }
}
