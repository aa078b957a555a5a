//! Chat-completion client over interchangeable backends.
//!
//! Both backends speak the same OpenAI-style wire contract:
//! - request: `{model, messages, temperature, stream}`
//! - streaming response: SSE lines `data: {"choices":[{"delta":{"content":…}}]}`
//!   terminated by `data: [DONE]`
//! - non-streaming response: `{"choices":[{"message":{role,content},"finish_reason"}]}`
//!
//! [`Backend::Hosted`] points at a multi-model HTTP API (bearer key read
//! from the environment); [`Backend::Local`] points at a single-model
//! server emulating the same shape. Selection is session configuration.
//!
//! Streaming is exposed as a single-consumer [`CompletionStream`]; dropping
//! it cancels the underlying HTTP transfer and any deltas already yielded
//! remain usable.

use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CompletionConfig;
use crate::models::ChatMessage;

/// Which completion backend a session talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Hosted,
    Local,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Hosted => write!(f, "hosted"),
            Backend::Local => write!(f, "local"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hosted" => Ok(Backend::Hosted),
            "local" => Ok(Backend::Local),
            other => Err(format!(
                "unknown backend: '{}'. Use hosted or local.",
                other
            )),
        }
    }
}

#[derive(Debug, Error)]
pub enum CompletionError {
    /// The backend returned an error; carries the backend's own message.
    #[error("completion backend error: {0}")]
    Backend(String),
    #[error("completion backend unreachable: {0}")]
    Unreachable(String),
    #[error("invalid completion response: {0}")]
    InvalidResponse(String),
    #[error("API key not set: environment variable {0}")]
    MissingApiKey(String),
}

/// Incremental answer fragments. Single consumer; ends after the terminal
/// `[DONE]` marker or an error item.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

/// Client for one backend/model pair, rebuilt cheaply whenever the session
/// configuration changes.
#[derive(Debug)]
pub struct CompletionClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl CompletionClient {
    /// Resolve the configured backend into a ready client.
    ///
    /// Hosted backends require the API key environment variable named in
    /// the config; the local server needs none.
    pub fn from_config(config: &CompletionConfig) -> Result<Self, CompletionError> {
        let (base_url, api_key) = match config.backend {
            Backend::Hosted => {
                let key = std::env::var(&config.api_key_env)
                    .map_err(|_| CompletionError::MissingApiKey(config.api_key_env.clone()))?;
                (config.hosted_url.clone(), Some(key))
            }
            Backend::Local => (config.local_url.clone(), None),
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CompletionError::Unreachable(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        stream: bool,
    ) -> Result<reqwest::Response, CompletionError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "stream": stream,
        });

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CompletionError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(CompletionError::Backend(format!(
                "{}: {}",
                status, body_text
            )));
        }

        Ok(response)
    }

    /// Request a streamed completion and return the delta stream.
    pub async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<CompletionStream, CompletionError> {
        let response = self.post(messages, temperature, true).await?;
        let mut bytes = response.bytes_stream();
        let mut parser = SseParser::new();

        let stream = async_stream::stream! {
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(CompletionError::Backend(e.to_string()));
                        return;
                    }
                };
                for event in parser.feed(&chunk) {
                    match event {
                        StreamEvent::Delta(text) => yield Ok(text),
                        StreamEvent::Done => return,
                        StreamEvent::Failed(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    /// Request a full (non-streaming) completion.
    ///
    /// Law: for identical inputs, the concatenation of [`stream_chat`]
    /// deltas equals this call's content.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, CompletionError> {
        let response = self.post(messages, temperature, false).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CompletionError::InvalidResponse(e.to_string()))?;

        parse_completion_response(&json)
    }
}

fn parse_completion_response(json: &serde_json::Value) -> Result<String, CompletionError> {
    if let Some(error) = json.get("error") {
        return Err(CompletionError::Backend(error.to_string()));
    }

    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            CompletionError::InvalidResponse("missing choices[0].message.content".to_string())
        })
}

// ============ SSE parsing ============

/// One parsed server-sent event from the completion stream.
#[derive(Debug)]
enum StreamEvent {
    Delta(String),
    Done,
    /// Terminal failure: an error payload or unparseable data line. Deltas
    /// already parsed from earlier lines are preserved ahead of this event.
    Failed(CompletionError),
}

/// Incremental SSE parser.
///
/// HTTP chunk boundaries align with neither SSE lines nor UTF-8 character
/// boundaries, so raw bytes are buffered and decoded only once a full line
/// is available. Only `data:` lines matter for this contract; other SSE
/// fields and blank separators are skipped.
struct SseParser {
    buf: Vec<u8>,
    done: bool,
}

impl SseParser {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            done: false,
        }
    }

    fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }

        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buf.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buf.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim_end_matches(['\n', '\r']);

            let data = match line.strip_prefix("data:") {
                Some(data) => data.trim_start(),
                None => continue,
            };

            if data == "[DONE]" {
                self.done = true;
                events.push(StreamEvent::Done);
                break;
            }

            let json: serde_json::Value = match serde_json::from_str(data) {
                Ok(json) => json,
                Err(e) => {
                    self.done = true;
                    events.push(StreamEvent::Failed(CompletionError::InvalidResponse(
                        format!("bad SSE payload: {}", e),
                    )));
                    break;
                }
            };

            if let Some(error) = json.get("error") {
                self.done = true;
                events.push(StreamEvent::Failed(CompletionError::Backend(
                    error.to_string(),
                )));
                break;
            }

            if let Some(content) = json
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("delta"))
                .and_then(|d| d.get("content"))
                .and_then(|c| c.as_str())
            {
                if !content.is_empty() {
                    events.push(StreamEvent::Delta(content.to_string()));
                }
            }
        }

        events
    }
}
