//! Prompt rule rendering.
//!
//! Substitutes age and object placeholders into an operator-supplied rule
//! template. Age-layer phrasing lives in [`crate::models::AgeLayer`].

mod prompt_renderer;

pub use prompt_renderer::{MISSING_OBJECT_TEXT, PromptRenderer};
