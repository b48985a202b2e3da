//! Generative provider clients.
//!
//! - [`GenerativeGateway`]: chat-completion endpoint for recognition, learning
//!   content, answer judging, and companion dialogue
//! - [`ImageAdapter`]: character portraits
//! - [`VoiceAdapter`]: speech synthesis
//!
//! Every client sends its requests through an [`HttpTransport`] and runs
//! model output through the [`normalizer`] before handing it back.

mod gateway;
mod image;
pub mod normalizer;
pub mod prompts;
pub mod retry;
pub mod transport;
mod voice;

pub use gateway::{GatewayConfig, GenerativeGateway, GenerativeProvider, ModelSelector};
pub use image::{
    DownloadedImage, FLAT_GENERATION_PATH, ImageAdapter, ImageConfig, ImageProvider,
    MULTIMODAL_GENERATION_PATH, decode_data_uri, resolve_generation_url, source_image_candidates,
};
pub use transport::{HttpClientConfig, HttpResponse, HttpTransport, JsonRequest, ReqwestTransport};
pub use voice::{
    LAST_RESORT_VOICE, SPEECH_GENERATION_PATH, VoiceAdapter, VoiceConfig, VoiceProfile,
    VoiceProfiles, normalize_language,
};
