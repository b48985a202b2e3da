//! External rule-template rendering.
//!
//! Operators can ship a rule document that companion and learning prompts
//! must follow word for word. The document may reference the child's age
//! and the scanned object through a few placeholder spellings:
//!
//! | Placeholder | Replaced with |
//! |-------------|---------------|
//! | `{{age}}`, `{{kids_age}}`, `{{#<node>.kids_age#}}` | Age clamped to 3..=15 |
//! | `{{object}}`, `{{image_input}}`, `{{#<node>.image_input#}}` | Object description |

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use crate::models::clamp_age;

/// Object description used when none is supplied.
pub const MISSING_OBJECT_TEXT: &str = "未提供图片，仅提供文本物体描述";

static AGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(?:age|kids_age)\s*\}\}|\{\{#[^{}#]*?\.kids_age#\}\}")
        .unwrap_or_else(|_| unreachable!())
});

static OBJECT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(?:object|image_input)\s*\}\}|\{\{#[^{}#]*?\.image_input#\}\}")
        .unwrap_or_else(|_| unreachable!())
});

/// Renders the optional rule template.
#[derive(Debug, Clone, Default)]
pub struct PromptRenderer {
    template: Option<String>,
}

impl PromptRenderer {
    /// Creates a renderer without a template.
    #[must_use]
    pub const fn new() -> Self {
        Self { template: None }
    }

    /// Creates a renderer from template text; blank text means no template.
    #[must_use]
    pub fn from_template(text: &str) -> Self {
        let cleaned = text.trim_start_matches('\u{feff}').trim();
        Self {
            template: (!cleaned.is_empty()).then(|| cleaned.to_string()),
        }
    }

    /// Loads a template file.
    ///
    /// An unreadable or blank file yields a renderer without a template.
    #[must_use]
    pub fn from_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let renderer = Self::from_template(&text);
                if renderer.is_configured() {
                    tracing::info!(path = %path.display(), "Loaded prompt rule template");
                } else {
                    tracing::warn!(path = %path.display(), "Prompt rule template is empty");
                }
                renderer
            },
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Failed to read prompt rule template");
                Self::new()
            },
        }
    }

    /// Returns true when a template is loaded.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.template.is_some()
    }

    /// Renders the template, or returns an empty string when none is loaded.
    #[must_use]
    pub fn render(&self, child_age: u32, object: &str) -> String {
        let Some(template) = &self.template else {
            return String::new();
        };
        let age = clamp_age(child_age).to_string();
        let object = match object.trim() {
            "" => MISSING_OBJECT_TEXT,
            trimmed => trimmed,
        };
        let rendered = AGE_PATTERN.replace_all(template, regex::NoExpand(&age));
        OBJECT_PATTERN
            .replace_all(&rendered, regex::NoExpand(object))
            .trim()
            .to_string()
    }
}
