//! Binary entry point for cityling.
//!
//! Runs scan, answer, collection, and companion operations from the command
//! line and prints the result as JSON.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{NaiveDate, Utc};
use cityling::config::{CitylingConfig, StorageEngine, key_meta};
use cityling::llm::{ReqwestTransport, VoiceProfiles};
use cityling::observability::{self, LoggingConfig};
use cityling::rendering::PromptRenderer;
use cityling::services::{
    AnswerRequest, BadgeMatcher, ChatRequest, KnowledgeBase, ScanImageRequest, ScanRequest,
    SceneRequest,
};
use cityling::{
    CollectionService, CompanionService, ContentCache, ErrorKind, GenerativeGateway,
    GenerativeProvider, ImageAdapter, MemoryStore, ScanService, SqliteStore, Store, VoiceAdapter,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Cityling - generative learning content for city explorers.
#[derive(Parser)]
#[command(name = "cityling")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Image input shared by commands that accept a photo.
#[derive(clap::Args)]
struct ImageArgs {
    /// Publicly reachable image URL.
    #[arg(long)]
    image_url: Option<String>,

    /// Local image file, sent inline as base64.
    #[arg(long)]
    image_file: Option<PathBuf>,
}

impl ImageArgs {
    fn base64(&self) -> anyhow::Result<Option<String>> {
        self.image_file
            .as_deref()
            .map(read_base64)
            .transpose()
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Scan an object and open a quiz session.
    Scan {
        /// Detected object label (ignored when an image is given).
        label: Option<String>,

        /// Child age (3-15).
        #[arg(short, long)]
        age: u32,

        /// Child identifier.
        #[arg(long, default_value = "")]
        child: String,

        #[command(flatten)]
        image: ImageArgs,
    },

    /// Recognize the object in an image.
    ScanImage {
        #[command(flatten)]
        image: ImageArgs,
    },

    /// Answer a session's quiz.
    Answer {
        /// Session ID from `scan`.
        session_id: String,

        /// The answer.
        answer: String,

        /// Child identifier.
        #[arg(long, default_value = "")]
        child: String,
    },

    /// List collected spirits.
    Pokedex {
        /// Child identifier.
        #[arg(long, default_value = "")]
        child: String,
    },

    /// Show badge progress.
    Badges {
        /// Child identifier.
        #[arg(long, default_value = "")]
        child: String,
    },

    /// Summarize a day's collecting.
    Report {
        /// Child identifier.
        #[arg(long, default_value = "")]
        child: String,

        /// Day as YYYY-MM-DD (defaults to today, UTC).
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Talk to a companion character.
    Companion {
        #[command(subcommand)]
        action: CompanionAction,
    },

    /// Show the effective configuration (keys redacted).
    Config,
}

/// Companion subcommands.
#[derive(Subcommand)]
enum CompanionAction {
    /// Generate the opening scene with portrait and voice.
    Scene {
        /// Object the companion embodies.
        object_type: String,

        /// Child age (3-15).
        #[arg(short, long)]
        age: u32,

        /// Weather description.
        #[arg(long, default_value = "")]
        weather: String,

        /// Environment description.
        #[arg(long, default_value = "")]
        environment: String,

        /// Object traits.
        #[arg(long, default_value = "")]
        traits: String,

        #[command(flatten)]
        image: ImageArgs,
    },

    /// Send a message to the companion.
    Chat {
        /// Object the companion embodies.
        object_type: String,

        /// The child's message.
        message: String,

        /// Child age (3-15).
        #[arg(short, long)]
        age: u32,

        /// Character name from the scene.
        #[arg(long, default_value = "")]
        name: String,

        /// Character personality from the scene.
        #[arg(long, default_value = "")]
        personality: String,

        /// Prior turns, oldest first (repeatable).
        #[arg(long)]
        history: Vec<String>,
    },
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match CitylingConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err}");
            return exit_code(err.kind());
        },
    };

    let logging = LoggingConfig::from_settings(&config.logging, cli.verbose);
    if let Err(err) = observability::init_logging(&logging) {
        eprintln!("Warning: logging disabled: {err}");
    }

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            let kind = err
                .downcast_ref::<cityling::Error>()
                .map_or(ErrorKind::Internal, cityling::Error::kind);
            exit_code(kind)
        },
    }
}

fn exit_code(kind: ErrorKind) -> ExitCode {
    ExitCode::from(match kind {
        ErrorKind::Internal => 1,
        ErrorKind::BadInput => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Conflict => 4,
        ErrorKind::Unavailable => 5,
        ErrorKind::Upstream => 6,
    })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_base64(path: &Path) -> anyhow::Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading image {}", path.display()))?;
    Ok(STANDARD.encode(bytes))
}

/// Services wired from configuration.
struct App {
    scan: ScanService,
    companion: CompanionService,
    collection: CollectionService,
}

fn open_store(config: &CitylingConfig) -> anyhow::Result<Arc<dyn Store>> {
    match config.storage.engine {
        StorageEngine::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageEngine::Sqlite => {
            let path = config
                .storage
                .path
                .clone()
                .or_else(SqliteStore::default_path)
                .context("no database path configured and no home directory found")?;
            let store = SqliteStore::open(&path)?;
            tracing::debug!(path = %store.db_path().display(), "Opened SQLite store");
            Ok(Arc::new(store))
        },
    }
}

fn build_app(config: &CitylingConfig) -> anyhow::Result<App> {
    let store = open_store(config)?;
    let transport = Arc::new(ReqwestTransport::new(config.http_client_config()));
    let knowledge = KnowledgeBase::builtin();

    let mut badges = BadgeMatcher::builtin(knowledge.clone());
    if let Some(path) = &config.badges.asset_manifest_path {
        badges = badges.with_asset_manifest(path);
    }
    let badges = Arc::new(badges);

    let renderer = config
        .llm
        .prompt_spec_path
        .as_deref()
        .map_or_else(PromptRenderer::new, PromptRenderer::from_file);
    let gateway = GenerativeGateway::new(config.gateway_config())
        .with_transport(transport.clone())
        .with_prompt_renderer(renderer);

    let profiles = match &config.voice.profile_path {
        Some(path) => VoiceProfiles::load(path).unwrap_or_else(|err| {
            tracing::warn!(path = %path.display(), error = %err, "Voice profiles unavailable, using built-in profiles");
            VoiceProfiles::default()
        }),
        None => VoiceProfiles::default(),
    };
    let image = Arc::new(ImageAdapter::new(config.image_config()).with_transport(transport.clone()));
    let voice = Arc::new(
        VoiceAdapter::new(config.voice_config())
            .with_profiles(profiles)
            .with_transport(transport),
    );

    tracing::info!(
        base_url = %config.llm.base_url,
        key_meta = %key_meta(config.llm.api_key.as_ref()),
        image_ready = image.is_configured(),
        voice_ready = voice.is_configured(),
        "Provider configuration"
    );

    let cache = Arc::new(ContentCache::new(config.cache.capacity, config.cache_ttl()));
    let mut scan = ScanService::new(Arc::clone(&store))
        .with_cache(cache)
        .with_knowledge(knowledge.clone())
        .with_badges(Arc::clone(&badges));
    let mut companion = CompanionService::new()
        .with_knowledge(knowledge)
        .with_image_adapter(image)
        .with_voice_adapter(voice);

    if gateway.is_configured() {
        let provider: Arc<dyn GenerativeProvider> = Arc::new(gateway);
        scan = scan.with_provider(Arc::clone(&provider));
        companion = companion.with_provider(provider);
    } else {
        tracing::info!("LLM integration disabled, using local knowledge fallback only");
    }

    Ok(App {
        scan,
        companion,
        collection: CollectionService::new(store).with_badges(badges),
    })
}

#[derive(Serialize)]
struct ConfigSummary<'a> {
    source: Option<String>,
    llm_base_url: &'a str,
    llm_model: &'a str,
    llm_key: String,
    image_base_url: &'a str,
    image_model: &'a str,
    voice_base_url: &'a str,
    voice_model: &'a str,
    voice_id: &'a str,
    cache_ttl_secs: u64,
    cache_capacity: usize,
    storage_engine: String,
    storage_path: Option<String>,
}

fn show_config(config: &CitylingConfig) -> anyhow::Result<()> {
    print_json(&ConfigSummary {
        source: config.source.as_ref().map(|p| p.display().to_string()),
        llm_base_url: &config.llm.base_url,
        llm_model: &config.llm.model,
        llm_key: key_meta(config.llm.api_key.as_ref()),
        image_base_url: &config.image.base_url,
        image_model: &config.image.model,
        voice_base_url: &config.voice.base_url,
        voice_model: &config.voice.model,
        voice_id: &config.voice.voice_id,
        cache_ttl_secs: config.cache.ttl_secs,
        cache_capacity: config.cache.capacity,
        storage_engine: format!("{:?}", config.storage.engine).to_lowercase(),
        storage_path: config.storage.path.as_ref().map(|p| p.display().to_string()),
    })
}

fn run(command: Commands, config: &CitylingConfig) -> anyhow::Result<()> {
    if matches!(command, Commands::Config) {
        return show_config(config);
    }
    let app = build_app(config)?;

    match command {
        Commands::Scan {
            label,
            age,
            child,
            image,
        } => {
            let request = ScanRequest {
                child_id: child,
                child_age: age,
                detected_label: label.unwrap_or_default(),
                image_base64: image.base64()?,
                image_url: image.image_url,
            };
            print_json(&app.scan.scan(&request)?)
        },
        Commands::ScanImage { image } => {
            let request = ScanImageRequest {
                image_base64: image.base64()?,
                image_url: image.image_url,
                ..ScanImageRequest::default()
            };
            print_json(&app.scan.scan_image(&request)?)
        },
        Commands::Answer {
            session_id,
            answer,
            child,
        } => {
            let request = AnswerRequest {
                session_id,
                child_id: child,
                answer,
            };
            print_json(&app.scan.submit_answer(&request)?)
        },
        Commands::Pokedex { child } => print_json(&app.collection.pokedex(&child)?),
        Commands::Badges { child } => print_json(&app.collection.pokedex_badges(&child)?),
        Commands::Report { child, date } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            print_json(&app.collection.daily_report(&child, date)?)
        },
        Commands::Companion { action } => run_companion(&app, action),
        Commands::Config => show_config(config),
    }
}

fn run_companion(app: &App, action: CompanionAction) -> anyhow::Result<()> {
    match action {
        CompanionAction::Scene {
            object_type,
            age,
            weather,
            environment,
            traits,
            image,
        } => {
            let request = SceneRequest {
                child_id: String::new(),
                child_age: age,
                object_type,
                weather,
                environment,
                object_traits: traits,
                source_image_base64: image.base64()?,
                source_image_url: image.image_url,
            };
            print_json(&app.companion.generate_scene(&request)?)
        },
        CompanionAction::Chat {
            object_type,
            message,
            age,
            name,
            personality,
            history,
        } => {
            let request = ChatRequest {
                child_age: age,
                object_type,
                character_name: name,
                character_personality: personality,
                history,
                child_message: message,
                ..ChatRequest::default()
            };
            print_json(&app.companion.chat(&request)?)
        },
    }
}
