//! Adapter for the upstream LLM gateway.
//!
//! The gateway exposes an assistant/thread/message model with exactly three
//! operations, and it is picky about encodings: assistant and thread creation
//! take JSON bodies (thread creation requires an *explicit* empty `{}` body),
//! while message posting takes form-encoded fields. [`UpstreamClient`] speaks
//! that dialect so nothing else in the crate has to.
//!
//! The rest of the crate depends on the [`Upstream`] trait rather than the
//! concrete client, so tests can substitute a scripted implementation.
//!
//! # Example
//!
//! ```rust,no_run
//! use civicsim::upstream::{Upstream, UpstreamClient};
//!
//! # async {
//! let client = UpstreamClient::new("https://gateway.example/api", "secret-key");
//! let assistant_id = client
//!     .create_assistant("CivicSim Interpreter", "Respond with valid JSON only.")
//!     .await?;
//! let thread_id = client.create_thread(&assistant_id).await?;
//! let reply = client
//!     .send_message(&thread_id, "Build a park downtown", "amazon/nova-micro-v1", "amazon")
//!     .await?;
//! # Ok::<(), civicsim::upstream::UpstreamError>(())
//! # };
//! ```

use async_trait::async_trait;
use lazy_static::lazy_static;
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Timeout for assistant and thread creation.
const CREATE_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for message round-trips, which include model inference.
const SEND_TIMEOUT: Duration = Duration::from_secs(60);

lazy_static! {
    /// Shared HTTP client with persistent connection pooling.
    ///
    /// A single client instance keeps TLS sessions and DNS lookups warm, which
    /// matters when a simulation issues one request per agent concurrently.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build shared HTTP client")
    };
}

/// Borrow the lazily initialised shared [`reqwest::Client`].
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

/// The single failure type surfaced by gateway calls.
///
/// `status` is the HTTP status returned by the gateway, or `0` when the
/// failure happened before or instead of an HTTP exchange (connection error,
/// empty input, missing reply field).
#[derive(Debug, Clone)]
pub struct UpstreamError {
    /// HTTP status code, or 0 for non-HTTP failures.
    pub status: u16,
    /// Response body or a short description of the local failure.
    pub body: String,
}

impl UpstreamError {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upstream error ({}): {}", self.status, self.body)
    }
}

impl Error for UpstreamError {}

/// Trait-driven abstraction over the gateway.
///
/// Implementations **must** be thread-safe (`Send + Sync`) so they can be
/// shared between the reactor's fan-out tasks. Retry policy deliberately
/// lives with callers; implementations perform exactly one attempt.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Create an assistant with the given name and system prompt, returning
    /// its opaque id.
    async fn create_assistant(
        &self,
        name: &str,
        system_prompt: &str,
    ) -> Result<String, UpstreamError>;

    /// Create a thread scoped to an assistant, returning its opaque id.
    async fn create_thread(&self, assistant_id: &str) -> Result<String, UpstreamError>;

    /// Send a message on a thread and return the assistant's reply text.
    async fn send_message(
        &self,
        thread_id: &str,
        content: &str,
        model: &str,
        provider: &str,
    ) -> Result<String, UpstreamError>;
}

/// HTTP implementation of [`Upstream`].
///
/// Encoding contract (non-negotiable, enforced here and nowhere else):
/// 1. `POST /assistants` with JSON `{name, system_prompt}`
/// 2. `POST /assistants/{id}/threads` with JSON `{}` (bodyless requests are
///    rejected by the gateway)
/// 3. `POST /threads/{id}/messages` with form fields
///    `content, stream="false", memory="Auto", model, provider`
pub struct UpstreamClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl UpstreamClient {
    /// Build a client against `base_url`, authenticating with `api_key`.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http: get_shared_http_client().clone(),
        }
    }

    /// Pull the first of `assistant_id`/`thread_id`/`id` out of a creation
    /// response body.
    fn extract_id(value: &serde_json::Value, primary: &str) -> Option<String> {
        value
            .get(primary)
            .or_else(|| value.get("id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    async fn read_body(resp: reqwest::Response) -> Result<(u16, String), UpstreamError> {
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| UpstreamError::new(0, format!("failed reading response body: {}", e)))?;
        Ok((status, text))
    }
}

#[async_trait]
impl Upstream for UpstreamClient {
    async fn create_assistant(
        &self,
        name: &str,
        system_prompt: &str,
    ) -> Result<String, UpstreamError> {
        let url = format!("{}/assistants", self.base_url);
        log::info!(
            "[UPSTREAM] create_assistant name={} prompt_len={}",
            name,
            system_prompt.len()
        );

        let resp = self
            .http
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .header("Accept", "application/json")
            .timeout(CREATE_TIMEOUT)
            .json(&serde_json::json!({
                "name": name,
                "system_prompt": system_prompt,
            }))
            .send()
            .await
            .map_err(|e| UpstreamError::new(0, format!("connection failed: {}", e)))?;

        let (status, text) = Self::read_body(resp).await?;
        if status != 200 && status != 201 {
            log::error!("[UPSTREAM] create_assistant failed status={}", status);
            return Err(UpstreamError::new(status, text));
        }

        let parsed: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| UpstreamError::new(0, format!("invalid JSON in response: {}", e)))?;
        Self::extract_id(&parsed, "assistant_id")
            .ok_or_else(|| UpstreamError::new(0, format!("no assistant id in response: {}", text)))
    }

    async fn create_thread(&self, assistant_id: &str) -> Result<String, UpstreamError> {
        let url = format!("{}/assistants/{}/threads", self.base_url, assistant_id);
        log::info!("[UPSTREAM] create_thread assistant={}", assistant_id);

        // The gateway rejects bodyless posts with a 422; send an explicit {}.
        let resp = self
            .http
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .header("Accept", "application/json")
            .timeout(CREATE_TIMEOUT)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| UpstreamError::new(0, format!("connection failed: {}", e)))?;

        let (status, text) = Self::read_body(resp).await?;
        if status != 200 && status != 201 {
            log::error!("[UPSTREAM] create_thread failed status={}", status);
            return Err(UpstreamError::new(status, text));
        }

        let parsed: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| UpstreamError::new(0, format!("invalid JSON in response: {}", e)))?;
        Self::extract_id(&parsed, "thread_id")
            .ok_or_else(|| UpstreamError::new(0, format!("no thread id in response: {}", text)))
    }

    async fn send_message(
        &self,
        thread_id: &str,
        content: &str,
        model: &str,
        provider: &str,
    ) -> Result<String, UpstreamError> {
        if content.trim().is_empty() {
            return Err(UpstreamError::new(400, "message content cannot be empty"));
        }

        let url = format!("{}/threads/{}/messages", self.base_url, thread_id);
        log::info!(
            "[UPSTREAM] send_message thread={} model={} provider={} content_len={}",
            thread_id,
            model,
            provider,
            content.len()
        );

        // Form data, not JSON. `stream` is the string "false" by contract.
        let form: [(&str, &str); 5] = [
            ("content", content),
            ("stream", "false"),
            ("memory", "Auto"),
            ("model", model),
            ("provider", provider),
        ];

        let resp = self
            .http
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .header("Accept", "application/json")
            .timeout(SEND_TIMEOUT)
            .form(&form)
            .send()
            .await
            .map_err(|e| UpstreamError::new(0, format!("connection failed: {}", e)))?;

        let (status, text) = Self::read_body(resp).await?;
        if status != 200 {
            log::error!(
                "[UPSTREAM] send_message failed thread={} status={}",
                thread_id,
                status
            );
            return Err(UpstreamError::new(status, text));
        }

        let parsed: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| UpstreamError::new(0, format!("invalid JSON in response: {}", e)))?;

        let reply = parsed
            .get("content")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .or_else(|| {
                parsed
                    .get("text")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
            });

        match reply {
            Some(message) => {
                log::info!(
                    "[UPSTREAM] send_message ok thread={} reply_len={}",
                    thread_id,
                    message.len()
                );
                Ok(message.to_string())
            }
            None => Err(UpstreamError::new(
                500,
                format!("no content in response: {}", text),
            )),
        }
    }
}
