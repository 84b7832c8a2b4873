//! The LLM client: the single choke-point for model calls.
//!
//! Every outbound model call in the engine goes through [`LlmClient`]. It
//! owns the retry/backoff/timeout policy, response validation, the global
//! in-flight concurrency cap, and multimodal payload assembly. Agents hold
//! an `Arc<LlmClient>` and never open their own connections.
//!
//! The wire transport is abstracted behind [`LlmTransport`] so tests can
//! script model behavior without a server.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Minimum number of characters for a model response to count as valid.
const MIN_RESPONSE_CHARS: usize = 20;

/// Prefixes that mark a degenerate model response.
const ERROR_MARKERS: &[&str] = &["error:", "<html", "<!doctype"];

/// Exponential backoff between retries is capped at this many seconds.
const BACKOFF_CAP_SECS: u64 = 30;

/// How a model call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// The call exceeded the per-call timeout.
    Timeout,
    /// The server could not be reached.
    Unreachable,
    /// The server answered, but the payload was rejected by validation.
    InvalidResponse,
}

/// A failed model call with its classification.
#[derive(Debug, Clone, Error)]
#[error("llm {kind:?}: {message}")]
pub struct LlmError {
    /// The failure classification.
    pub kind: LlmErrorKind,
    /// A description of the failure.
    pub message: String,
}

impl LlmError {
    fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// One completion request as sent to the transport.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// The full prompt text.
    pub prompt: String,
    /// Maximum completion tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Base64-encoded inline images, empty for text-only calls.
    pub images: Vec<String>,
}

/// The wire transport behind [`LlmClient`].
///
/// Implementations return the raw response text; validation, retries, and
/// the concurrency cap live in the client.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    /// Execute one completion request and return the raw response text.
    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, LlmError>;

    /// Whether the text model server is ready.
    async fn health(&self) -> bool;

    /// Whether a multimodal server is available for image-bearing requests.
    async fn multimodal_health(&self) -> bool {
        false
    }
}

/// HTTP transport speaking the llama.cpp-style `/completion` protocol.
///
/// `POST {base}/completion` with `{prompt, max_tokens, temperature}` and an
/// optional `images` array; the response is accepted in either wire shape
/// by reading the `content` (or `text`) field and trimming. Image-bearing
/// requests go to the multimodal base URL when one is configured.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    multimodal_base_url: Option<String>,
}

impl HttpTransport {
    /// Create a transport for the given server base URL.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self { client, base_url: base_url.into(), multimodal_base_url: None }
    }

    /// Set the base URL of a separate multimodal server.
    pub fn with_multimodal_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.multimodal_base_url = Some(base_url.into());
        self
    }

    fn classify(error: &reqwest::Error) -> LlmErrorKind {
        if error.is_timeout() {
            LlmErrorKind::Timeout
        } else {
            LlmErrorKind::Unreachable
        }
    }

    async fn probe(&self, base: &str) -> bool {
        match self.client.get(format!("{base}/health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl LlmTransport for HttpTransport {
    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, LlmError> {
        let (base, path) = if !request.images.is_empty() {
            match &self.multimodal_base_url {
                Some(base) => (base.as_str(), "/generate"),
                None => (self.base_url.as_str(), "/completion"),
            }
        } else {
            (self.base_url.as_str(), "/completion")
        };

        let mut body = serde_json::json!({
            "prompt": request.prompt,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if !request.images.is_empty() {
            body["images"] = serde_json::json!(request.images);
        }

        let response = self
            .client
            .post(format!("{base}{path}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::new(Self::classify(&e), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::new(
                LlmErrorKind::InvalidResponse,
                format!("HTTP {status} from model server"),
            ));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::new(LlmErrorKind::InvalidResponse, e.to_string()))?;

        // Either wire shape: llama.cpp returns `content`, the multimodal
        // server returns `text`.
        let text = value
            .get("content")
            .and_then(|v| v.as_str())
            .or_else(|| value.get("text").and_then(|v| v.as_str()))
            .unwrap_or_default();

        Ok(text.trim().to_string())
    }

    async fn health(&self) -> bool {
        self.probe(&self.base_url).await
    }

    async fn multimodal_health(&self) -> bool {
        match &self.multimodal_base_url {
            Some(base) => self.probe(base).await,
            None => false,
        }
    }
}

/// The model client used by every agent.
///
/// Wraps a transport with:
/// - a per-call timeout (default 30 s)
/// - up to 3 attempts with exponential backoff capped at 30 s
/// - response validation (empty, shorter than 20 characters, or starting
///   with an obvious error marker is rejected and retried)
/// - a semaphore capping concurrent in-flight calls (default 2)
/// - multimodal payload assembly with a per-image size cap
pub struct LlmClient {
    transport: Arc<dyn LlmTransport>,
    permits: Arc<Semaphore>,
    max_retries: usize,
    call_timeout: Duration,
    max_image_bytes: u64,
}

impl LlmClient {
    /// Create a client over the given transport.
    pub fn new(
        transport: Arc<dyn LlmTransport>,
        concurrency: usize,
        max_retries: usize,
        call_timeout: Duration,
        max_image_bytes: u64,
    ) -> Self {
        Self {
            transport,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            max_retries: max_retries.max(1),
            call_timeout,
            max_image_bytes,
        }
    }

    /// Generate a completion for a text-only prompt.
    pub async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> std::result::Result<String, LlmError> {
        let request = CompletionRequest {
            prompt: prompt.to_string(),
            max_tokens,
            temperature,
            images: Vec::new(),
        };
        self.call_with_retries(&request).await
    }

    /// Generate a completion with inline images attached.
    ///
    /// Images larger than the per-image cap are rejected before any network
    /// traffic happens.
    pub async fn generate_with_images(
        &self,
        prompt: &str,
        image_paths: &[String],
        max_tokens: u32,
        temperature: f32,
    ) -> std::result::Result<String, LlmError> {
        let mut images = Vec::with_capacity(image_paths.len());
        for path in image_paths {
            images.push(self.load_image(Path::new(path)).await?);
        }
        let request =
            CompletionRequest { prompt: prompt.to_string(), max_tokens, temperature, images };
        self.call_with_retries(&request).await
    }

    /// Whether the model server is ready.
    pub async fn health(&self) -> bool {
        self.transport.health().await
    }

    /// Whether a multimodal server is available.
    pub async fn multimodal_health(&self) -> bool {
        self.transport.multimodal_health().await
    }

    async fn load_image(&self, path: &Path) -> std::result::Result<String, LlmError> {
        let meta = tokio::fs::metadata(path).await.map_err(|e| {
            LlmError::new(LlmErrorKind::InvalidResponse, format!("image {}: {e}", path.display()))
        })?;
        if meta.len() > self.max_image_bytes {
            return Err(LlmError::new(
                LlmErrorKind::InvalidResponse,
                format!(
                    "image {} is {} bytes, above the {} byte cap",
                    path.display(),
                    meta.len(),
                    self.max_image_bytes
                ),
            ));
        }
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            LlmError::new(LlmErrorKind::InvalidResponse, format!("image {}: {e}", path.display()))
        })?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    async fn call_with_retries(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<String, LlmError> {
        // Permit held across retries: the cap bounds in-flight call
        // sessions, not individual attempts.
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| LlmError::new(LlmErrorKind::Unreachable, "client is shut down"))?;

        let mut last_error = LlmError::new(LlmErrorKind::Unreachable, "no attempt made");
        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let backoff = BACKOFF_CAP_SECS.min(1 << (attempt - 1));
                debug!(attempt, backoff_secs = backoff, "retrying model call");
                tokio::time::sleep(Duration::from_secs(backoff)).await;
            }

            let outcome =
                tokio::time::timeout(self.call_timeout, self.transport.complete(request)).await;

            match outcome {
                Err(_) => {
                    last_error = LlmError::new(
                        LlmErrorKind::Timeout,
                        format!("model call exceeded {:?}", self.call_timeout),
                    );
                    warn!(attempt, "model call timed out");
                }
                Ok(Err(e)) => {
                    warn!(attempt, kind = ?e.kind, error = %e.message, "model call failed");
                    last_error = e;
                }
                Ok(Ok(text)) => match validate(&text) {
                    Ok(valid) => return Ok(valid),
                    Err(e) => {
                        warn!(attempt, error = %e.message, "model response rejected");
                        last_error = e;
                    }
                },
            }
        }

        Err(last_error)
    }
}

/// Validate a raw model response, returning the trimmed text.
fn validate(text: &str) -> std::result::Result<String, LlmError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(LlmError::new(LlmErrorKind::InvalidResponse, "empty response"));
    }
    if trimmed.len() < MIN_RESPONSE_CHARS {
        return Err(LlmError::new(
            LlmErrorKind::InvalidResponse,
            format!("response too short ({} chars)", trimmed.len()),
        ));
    }
    let lower = trimmed.to_lowercase();
    if ERROR_MARKERS.iter().any(|m| lower.starts_with(m)) {
        return Err(LlmError::new(LlmErrorKind::InvalidResponse, "response starts with an error marker"));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyTransport {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl LlmTransport for FlakyTransport {
        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> std::result::Result<String, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(LlmError::new(LlmErrorKind::Unreachable, "connection refused"))
            } else {
                Ok("a perfectly reasonable answer".to_string())
            }
        }

        async fn health(&self) -> bool {
            true
        }
    }

    fn client(transport: Arc<dyn LlmTransport>) -> LlmClient {
        LlmClient::new(transport, 2, 3, Duration::from_secs(5), 5 * 1024 * 1024)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_transport_recovers() {
        let transport = Arc::new(FlakyTransport { calls: AtomicUsize::new(0), fail_first: 2 });
        let result = client(transport.clone()).generate("q", 100, 0.1).await;
        assert_eq!(result.unwrap(), "a perfectly reasonable answer");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_retry_budget() {
        let transport = Arc::new(FlakyTransport { calls: AtomicUsize::new(0), fail_first: 10 });
        let result = client(transport.clone()).generate("q", 100, 0.1).await;
        assert_eq!(result.unwrap_err().kind, LlmErrorKind::Unreachable);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn validation_rejects_short_and_marked_responses() {
        assert!(validate("").is_err());
        assert!(validate("too short").is_err());
        assert!(validate("Error: model exploded spectacularly").is_err());
        assert!(validate("<html><body>502 Bad Gateway</body></html>").is_err());
        assert!(validate("  a long enough answer to pass validation  ").is_ok());
    }
}
