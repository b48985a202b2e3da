//! Collection badges.
//!
//! A badge rule matches an object type when any of these hold:
//!
//! 1. The object type's built-in category code equals the rule code
//! 2. An object token and the rule code contain one another
//! 3. An object token and any keyword or example contain one another
//!
//! Object tokens are the object type and its display name, lowercased with
//! whitespace and punctuation removed.

use super::knowledge::KnowledgeBase;
use crate::models::{BadgeRule, Capture, PokedexBadge};
use crate::{Error, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

/// Unlock rule text shown on every badge.
pub const FULL_COLLECTION_RULE: &str = "需完成该类全部示例收集后点亮。";

const EMBEDDED_RULES: &str = include_str!("badge_rules.json");

static TOKEN_CLEANER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\s_\-·（）()【】\[\],，。:：;；、/\\]+").unwrap_or_else(|_| unreachable!())
});

/// Lowercases and strips whitespace and punctuation.
#[must_use]
pub fn normalize_badge_token(value: &str) -> String {
    let lower = value.trim().to_lowercase();
    TOKEN_CLEANER.replace_all(&lower, "").into_owned()
}

/// Built-in category code for well-known object types.
#[must_use]
pub fn default_badge_code(object_type: &str) -> Option<&'static str> {
    match object_type.trim().to_lowercase().as_str() {
        "mailbox" => Some("HOME_ENVIRONMENT"),
        "manhole" => Some("MACRO_STRUCTURE"),
        "road_sign" | "traffic_light" => Some("TRANSPORTATION"),
        "tree" => Some("PLANTAE"),
        _ => None,
    }
}

fn mutually_contains(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a)
}

#[derive(Debug, Deserialize)]
struct RuleCatalog {
    #[serde(default)]
    badges: Vec<BadgeRule>,
}

#[derive(Debug, Deserialize)]
struct AssetManifest {
    #[serde(default)]
    items: Vec<AssetItem>,
}

#[derive(Debug, Deserialize)]
struct AssetItem {
    #[serde(default)]
    badge_id: String,
    #[serde(default)]
    source_file: String,
    #[serde(default)]
    image_url: String,
}

/// Matches captures against badge rules.
#[derive(Debug, Clone)]
pub struct BadgeMatcher {
    rules: Vec<BadgeRule>,
    knowledge: KnowledgeBase,
    image_urls: HashMap<String, String>,
}

impl BadgeMatcher {
    /// Loads the embedded rule catalog.
    #[must_use]
    pub fn builtin(knowledge: KnowledgeBase) -> Self {
        let rules = Self::parse_rules(EMBEDDED_RULES).unwrap_or_else(|err| {
            tracing::error!(error = %err, "Embedded badge rules are invalid");
            Vec::new()
        });
        Self::new(rules, knowledge)
    }

    /// Creates a matcher from rules.
    ///
    /// Rules without an ID are dropped. Each target becomes the number of
    /// examples, else keywords, else the configured target (at least 1).
    /// Rules are ordered by category.
    #[must_use]
    pub fn new(rules: Vec<BadgeRule>, knowledge: KnowledgeBase) -> Self {
        let mut rules: Vec<BadgeRule> = rules
            .into_iter()
            .filter_map(|mut rule| {
                rule.id = rule.id.trim().to_string();
                if rule.id.is_empty() {
                    return None;
                }
                rule.target = if !rule.examples.is_empty() {
                    rule.examples.len()
                } else if !rule.keywords.is_empty() {
                    rule.keywords.len()
                } else {
                    rule.target.max(1)
                };
                rule.rule = FULL_COLLECTION_RULE.to_string();
                Some(rule)
            })
            .collect();
        rules.sort_by(|a, b| a.category_id.cmp(&b.category_id));
        Self {
            rules,
            knowledge,
            image_urls: HashMap::new(),
        }
    }

    /// Parses a `{"badges": [...]}` catalog.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the JSON is malformed.
    pub fn parse_rules(json: &str) -> Result<Vec<BadgeRule>> {
        serde_json::from_str::<RuleCatalog>(json)
            .map(|catalog| catalog.badges)
            .map_err(|e| Error::InvalidInput(format!("badge rules: {e}")))
    }

    /// Attaches artwork URLs from an asset manifest.
    ///
    /// Entries are keyed by badge ID and by source file name. A missing or
    /// malformed manifest leaves the matcher unchanged.
    #[must_use]
    pub fn with_asset_manifest(mut self, path: &Path) -> Self {
        let manifest = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| {
                serde_json::from_str::<AssetManifest>(&text).map_err(|e| e.to_string())
            });
        match manifest {
            Ok(manifest) => {
                for item in manifest.items {
                    let url = item.image_url.trim();
                    if url.is_empty() {
                        continue;
                    }
                    for key in [item.badge_id.trim(), item.source_file.trim()] {
                        if !key.is_empty() {
                            self.image_urls.insert(key.to_string(), url.to_string());
                        }
                    }
                }
                tracing::debug!(entries = self.image_urls.len(), "Loaded badge asset manifest");
            },
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Badge asset manifest unavailable");
            },
        }
        self
    }

    /// Active rules, ordered by category.
    #[must_use]
    pub fn rules(&self) -> &[BadgeRule] {
        &self.rules
    }

    fn object_tokens(&self, object_type: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        [object_type.to_string(), self.knowledge.display_name(object_type)]
            .iter()
            .map(|value| normalize_badge_token(value))
            .filter(|token| !token.is_empty() && seen.insert(token.clone()))
            .collect()
    }

    /// Returns true when `rule` matches `object_type`.
    #[must_use]
    pub fn matches(&self, rule: &BadgeRule, object_type: &str) -> bool {
        let object_tokens = self.object_tokens(object_type);
        if object_tokens.is_empty() {
            return false;
        }

        let code_token = normalize_badge_token(&rule.code);
        if !code_token.is_empty() {
            let mapped = default_badge_code(object_type).map(normalize_badge_token);
            if mapped.as_deref() == Some(code_token.as_str()) {
                return true;
            }
            if object_tokens.iter().any(|t| mutually_contains(t, &code_token)) {
                return true;
            }
        }

        rule.keywords
            .iter()
            .chain(&rule.examples)
            .map(|keyword| normalize_badge_token(keyword))
            .filter(|token| !token.is_empty())
            .any(|token| object_tokens.iter().any(|t| mutually_contains(t, &token)))
    }

    /// Returns true when any rule matches `object_type`.
    #[must_use]
    pub fn is_tracked(&self, object_type: &str) -> bool {
        !object_type.trim().is_empty()
            && self.rules.iter().any(|rule| self.matches(rule, object_type))
    }

    /// Joins every rule with a child's capture progress.
    #[must_use]
    pub fn progress(&self, captures: &[Capture]) -> Vec<PokedexBadge> {
        self.rules
            .iter()
            .map(|rule| {
                let matched: HashSet<String> = captures
                    .iter()
                    .map(|capture| capture.object_type.trim())
                    .filter(|object_type| !object_type.is_empty())
                    .filter(|object_type| self.matches(rule, object_type))
                    .map(normalize_badge_token)
                    .collect();
                let progress = matched.len();
                let target = rule.target.max(1);
                let image_url = [
                    rule.image_url.trim(),
                    self.image_urls.get(&rule.id).map_or("", String::as_str),
                    self.image_urls.get(&rule.image_file).map_or("", String::as_str),
                ]
                .into_iter()
                .find(|url| !url.is_empty())
                .unwrap_or_default()
                .to_string();

                PokedexBadge {
                    id: rule.id.clone(),
                    category_id: rule.category_id.clone(),
                    name: rule.name.clone(),
                    code: rule.code.clone(),
                    description: rule.description.clone(),
                    record_scope: rule.record_scope.clone(),
                    rule: rule.rule.clone(),
                    image_url,
                    image_file: rule.image_file.clone(),
                    unlocked: progress >= target,
                    progress,
                    target,
                    examples: rule.examples.clone(),
                }
            })
            .collect()
    }
}

impl Default for BadgeMatcher {
    fn default() -> Self {
        Self::builtin(KnowledgeBase::builtin())
    }
}
