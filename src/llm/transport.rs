//! Blocking HTTP transport shared by the gateway and media adapters.
//!
//! Provider clients never touch `reqwest` directly; they go through
//! [`HttpTransport`] so tests can script upstream responses.

use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use std::time::{Duration, Instant};

/// Maximum number of body characters echoed into error messages.
const ERROR_BODY_LIMIT: usize = 512;

/// A JSON POST request.
#[derive(Debug, Clone, Copy)]
pub struct JsonRequest<'a> {
    /// Absolute request URL.
    pub url: &'a str,
    /// Bearer token, sent as `Authorization: Bearer <token>`.
    pub bearer: Option<&'a SecretString>,
    /// Extra headers.
    pub headers: &'a [(&'a str, &'a str)],
    /// JSON body.
    pub body: &'a serde_json::Value,
    /// Per-request timeout; `None` relies on the connect timeout only.
    pub timeout: Option<Duration>,
}

/// Raw HTTP response.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
    /// `Content-Type` header, if present.
    pub content_type: Option<String>,
}

impl HttpResponse {
    /// Builds a JSON response (test helper and mock convenience).
    #[must_use]
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string().into_bytes(),
            content_type: Some("application/json".to_string()),
        }
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Body as lossy UTF-8.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Blocking HTTP transport.
pub trait HttpTransport: Send + Sync {
    /// Sends a JSON POST.
    ///
    /// Returns the response for any status; only transport failures error.
    fn post_json(&self, request: &JsonRequest<'_>) -> Result<HttpResponse>;

    /// Sends a GET.
    fn get(&self, url: &str, timeout: Option<Duration>) -> Result<HttpResponse>;
}

/// Connection settings for [`ReqwestTransport`].
#[derive(Debug, Clone, Copy)]
pub struct HttpClientConfig {
    /// Connect timeout in milliseconds (0 to disable).
    pub connect_timeout_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
        }
    }
}

/// Production transport backed by `reqwest::blocking`.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    /// Creates a transport with the given connection settings.
    ///
    /// The client has no overall timeout; callers pass one per request.
    #[must_use]
    pub fn new(config: HttpClientConfig) -> Self {
        let mut builder = reqwest::blocking::Client::builder().timeout(None::<Duration>);
        if config.connect_timeout_ms > 0 {
            builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        }
        let client = builder.build().unwrap_or_else(|err| {
            tracing::warn!("Failed to build provider HTTP client: {err}");
            reqwest::blocking::Client::new()
        });
        Self { client }
    }

    fn read(operation: &str, response: reqwest::blocking::Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(ToString::to_string);
        let body = response
            .bytes()
            .map_err(|e| Error::upstream(operation, e))?
            .to_vec();
        Ok(HttpResponse {
            status,
            body,
            content_type,
        })
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(HttpClientConfig::default())
    }
}

impl HttpTransport for ReqwestTransport {
    fn post_json(&self, request: &JsonRequest<'_>) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .post(request.url)
            .header("Content-Type", "application/json")
            .json(request.body);
        if let Some(token) = request.bearer {
            builder = builder.bearer_auth(token.expose_secret().trim());
        }
        for (name, value) in request.headers {
            builder = builder.header(*name, *value);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send().map_err(|e| transport_error("http_post", &e))?;
        Self::read("http_post", response)
    }

    fn get(&self, url: &str, timeout: Option<Duration>) -> Result<HttpResponse> {
        let mut builder = self.client.get(url);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send().map_err(|e| transport_error("http_get", &e))?;
        Self::read("http_get", response)
    }
}

fn transport_error(operation: &str, err: &reqwest::Error) -> Error {
    let cause = if err.is_timeout() {
        format!("request timed out: {err}")
    } else {
        err.to_string()
    };
    Error::UpstreamRequestFailed {
        operation: operation.to_string(),
        status: None,
        cause,
    }
}

/// Converts a non-2xx response into [`Error::UpstreamRequestFailed`].
pub fn ensure_success(operation: &str, response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() {
        return Ok(response);
    }
    Err(Error::UpstreamRequestFailed {
        operation: operation.to_string(),
        status: Some(response.status),
        cause: truncate_text(response.text().trim(), ERROR_BODY_LIMIT),
    })
}

/// Truncates to `limit` characters, appending `...` when cut.
#[must_use]
pub fn truncate_text(text: &str, limit: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Shared deadline across a sequence of requests.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    /// Starts a deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now() + budget,
        }
    }

    /// Time left, or an upstream timeout error once the budget is spent.
    pub fn remaining(&self, operation: &str) -> Result<Duration> {
        let left = self.expires_at.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(Error::upstream(operation, "request timed out: deadline exceeded"));
        }
        Ok(left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_success_passes_2xx() {
        let response = HttpResponse::json(200, &serde_json::json!({"ok": true}));
        assert!(ensure_success("op", response).is_ok());
    }

    #[test]
    fn test_ensure_success_reports_status_and_body() {
        let response = HttpResponse {
            status: 429,
            body: b"  rate limited  ".to_vec(),
            content_type: None,
        };
        match ensure_success("chat_completion", response) {
            Err(Error::UpstreamRequestFailed { status, cause, .. }) => {
                assert_eq!(status, Some(429));
                assert_eq!(cause, "rate limited");
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_truncate_text_is_char_safe() {
        assert_eq!(truncate_text("红绿灯很亮", 3), "红绿灯...");
        assert_eq!(truncate_text("short", 10), "short");
    }

    #[test]
    fn test_deadline_expired() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.remaining("tts").is_err());

        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(deadline.remaining("tts").is_ok());
    }

    #[test]
    fn test_reqwest_transport_connection_refused() {
        let transport = ReqwestTransport::new(HttpClientConfig {
            connect_timeout_ms: 500,
        });
        let body = serde_json::json!({});
        let result = transport.post_json(&JsonRequest {
            url: "http://127.0.0.1:59991/v1/chat/completions",
            bearer: None,
            headers: &[],
            body: &body,
            timeout: Some(Duration::from_secs(2)),
        });
        assert!(matches!(
            result,
            Err(Error::UpstreamRequestFailed { status: None, .. })
        ));
    }
}
