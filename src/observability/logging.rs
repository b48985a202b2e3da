//! Structured logging configuration.

use std::path::PathBuf;

/// Environment variable holding the log filter; `RUST_LOG` is the fallback.
pub const LOG_FILTER_ENV: &str = "CITYLING_LOG";

const DEFAULT_DIRECTIVE: &str = "cityling=info,warn";
const VERBOSE_DIRECTIVE: &str = "cityling=debug,info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name, defaulting to pretty.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Filter directive used when no environment filter is set.
    pub filter: Option<String>,
    /// Append to this file instead of stderr.
    pub file: Option<PathBuf>,
    /// Raises the default level to debug.
    pub verbose: bool,
}

impl LoggingConfig {
    /// Builds logging config from settings and the CLI verbose flag.
    #[must_use]
    pub fn from_settings(settings: &crate::config::LoggingSettings, verbose: bool) -> Self {
        Self {
            format: settings.format,
            filter: settings.filter.clone(),
            file: settings.file.clone(),
            verbose,
        }
    }

    /// Resolves the filter directive.
    ///
    /// `CITYLING_LOG`, then `RUST_LOG`, then the configured filter, then the
    /// default for the verbosity.
    #[must_use]
    pub fn directive_with<F>(&self, lookup: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        [LOG_FILTER_ENV, "RUST_LOG"]
            .into_iter()
            .filter_map(&lookup)
            .chain(self.filter.clone())
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
            .unwrap_or_else(|| {
                if self.verbose {
                    VERBOSE_DIRECTIVE.to_string()
                } else {
                    DEFAULT_DIRECTIVE.to_string()
                }
            })
    }

    /// Resolves the filter directive from the process environment.
    #[must_use]
    pub fn directive(&self) -> String {
        self.directive_with(|key| std::env::var(key).ok())
    }
}
