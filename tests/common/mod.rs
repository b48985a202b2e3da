//! Shared helpers for integration tests.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use cityling::llm::{HttpResponse, HttpTransport, JsonRequest};
use cityling::{Error, Result};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A request seen by [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub body: Value,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

/// Replays queued responses in order and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    posts: Mutex<VecDeque<Result<HttpResponse>>>,
    gets: Mutex<VecDeque<Result<HttpResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    fetched: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_post(&self, response: HttpResponse) {
        self.posts.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_post_error(&self, error: Error) {
        self.posts.lock().unwrap().push_back(Err(error));
    }

    pub fn push_get(&self, response: HttpResponse) {
        self.gets.lock().unwrap().push_back(Ok(response));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn pending_posts(&self) -> usize {
        self.posts.lock().unwrap().len()
    }
}

impl HttpTransport for ScriptedTransport {
    fn post_json(&self, request: &JsonRequest<'_>) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: request.url.to_string(),
            body: request.body.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            timeout: request.timeout,
        });
        self.posts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::upstream("http_post", "no scripted response")))
    }

    fn get(&self, url: &str, _timeout: Option<Duration>) -> Result<HttpResponse> {
        self.fetched.lock().unwrap().push(url.to_string());
        self.gets
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::upstream("http_get", "no scripted response")))
    }
}

/// A chat-completion reply carrying `content` as the assistant message.
pub fn chat_reply(content: &str) -> HttpResponse {
    HttpResponse::json(
        200,
        &json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] }),
    )
}

/// A provider error with the given status and message body.
pub fn error_reply(status: u16, message: &str) -> HttpResponse {
    HttpResponse::json(status, &json!({ "code": "InvalidParameter", "message": message }))
}

/// A binary download.
pub fn bytes_reply(bytes: &[u8], content_type: &str) -> HttpResponse {
    HttpResponse {
        status: 200,
        body: bytes.to_vec(),
        content_type: Some(content_type.to_string()),
    }
}
