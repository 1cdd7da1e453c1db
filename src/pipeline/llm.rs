//! Remote model calls: text extraction from an image, and summarisation.
//!
//! Both calls go through the [`CompletionBackend`] trait. In production the
//! backend is an [`LlmBackend`] wrapping an `edgequake_llm` provider; tests
//! plug in a scripted backend. All prompt text lives in [`crate::prompts`].
//!
//! ## Retry Strategy
//!
//! Every attempt is bounded by `api_timeout_secs`. A retryable failure
//! (network, 429/5xx, timeout) is retried up to `max_retries` times with
//! exponential backoff `retry_backoff_ms * 2^(attempt-1)`: with 500 ms base
//! and 3 retries the waits are 500 ms → 1 s → 2 s. Failures flagged
//! non-retryable (bad key, rejected request, unknown model, provider never
//! configured) stop after one attempt.
//!
//! ## Return Value
//!
//! Neither call propagates an error upward. The outcome is a
//! [`CallOutcome`] whose `result` distinguishes the trimmed model text from
//! the failure detail, so one bad page cannot abort the run.

use crate::config::WorkflowConfig;
use crate::error::StepError;
use crate::output::{ImageResult, SummaryResult};
use crate::pipeline::encode::EncodedImage;
use crate::prompts::{summary_user_prompt, EXTRACTION_SYSTEM_PROMPT, SUMMARY_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, LlmError};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// One request to a remote model.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system_prompt: String,
    /// User-turn text. Empty for extraction: the image carries the content.
    pub user_text: String,
    pub image: Option<EncodedImage>,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// A successful model response.
#[derive(Debug, Clone, Default)]
pub struct ModelReply {
    pub content: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

/// A failed attempt, with a hint whether trying again could help.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub message: String,
    pub retryable: bool,
}

impl BackendError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<LlmError> for BackendError {
    fn from(e: LlmError) -> Self {
        let message = e.to_string();
        match e {
            LlmError::AuthError(_)
            | LlmError::InvalidRequest(_)
            | LlmError::ModelNotFound(_)
            | LlmError::ConfigError(_)
            | LlmError::NotSupported(_)
            | LlmError::TokenLimitExceeded { .. } => Self::permanent(message),
            _ => Self::retryable(message),
        }
    }
}

/// The seam between the workflow and a remote model.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Short name for logs, e.g. `openai/gpt-4o`.
    fn name(&self) -> &str;

    /// Send one request and wait for the reply.
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, BackendError>;
}

/// [`CompletionBackend`] backed by an `edgequake_llm` provider.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    name: String,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, name: impl Into<String>) -> Self {
        Self {
            provider,
            name: name.into(),
        }
    }
}

#[async_trait]
impl CompletionBackend for LlmBackend {
    fn name(&self) -> &str {
        &self.name
    }

    /// ## Message Layout
    ///
    /// 1. **System message**: the fixed instruction
    /// 2. **User message**: the image as a base64 attachment with empty text
    ///    (extraction), or the text prompt (summary)
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, BackendError> {
        let mut messages = vec![ChatMessage::system(&request.system_prompt)];
        match &request.image {
            Some(image) => {
                let data =
                    ImageData::new(image.base64.clone(), image.mime_type).with_detail("high");
                messages.push(ChatMessage::user_with_images(&request.user_text, vec![data]));
            }
            None => messages.push(ChatMessage::user(&request.user_text)),
        }

        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(BackendError::from)?;

        Ok(ModelReply {
            content: response.content,
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
        })
    }
}

/// Stand-in backend used when the provider could not be constructed.
///
/// Every call fails with the construction error, so a missing credential
/// shows up inline on first use instead of aborting the run up front.
pub struct UnavailableBackend {
    name: String,
    reason: String,
}

impl UnavailableBackend {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CompletionBackend for UnavailableBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, _request: &ModelRequest) -> Result<ModelReply, BackendError> {
        Err(BackendError::permanent(self.reason.clone()))
    }
}

/// Result of a remote call after retries.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    /// Trimmed model text, or the last failure detail.
    pub result: Result<String, String>,
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// Attempts made in total (≥ 1).
    pub attempts: u32,
    pub duration_ms: u64,
}

impl CallOutcome {
    /// Retries after the first attempt.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Send `request`, retrying transient failures with exponential backoff.
pub async fn call_with_retry(
    backend: &dyn CompletionBackend,
    request: &ModelRequest,
    config: &WorkflowConfig,
) -> CallOutcome {
    let start = Instant::now();
    let per_attempt = Duration::from_secs(config.api_timeout_secs);
    let mut last_err = String::from("Unknown error");
    let mut attempts = 0u32;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "{}: retry {}/{} after {}ms",
                backend.name(),
                attempt,
                config.max_retries,
                backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }
        attempts += 1;

        let failure = match timeout(per_attempt, backend.complete(request)).await {
            Ok(Ok(reply)) => {
                let duration = start.elapsed();
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}",
                    backend.name(),
                    reply.prompt_tokens,
                    reply.completion_tokens,
                    duration
                );
                return CallOutcome {
                    result: Ok(reply.content.trim().to_string()),
                    input_tokens: reply.prompt_tokens,
                    output_tokens: reply.completion_tokens,
                    attempts,
                    duration_ms: duration.as_millis() as u64,
                };
            }
            Ok(Err(e)) => e,
            Err(_) => BackendError::retryable(format!(
                "request timed out after {}s",
                config.api_timeout_secs
            )),
        };

        warn!(
            "{}: attempt {} failed — {}",
            backend.name(),
            attempts,
            failure.message
        );
        last_err = failure.message;
        if !failure.retryable {
            break;
        }
    }

    CallOutcome {
        result: Err(last_err),
        input_tokens: 0,
        output_tokens: 0,
        attempts,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

/// Build the extraction request for one image.
pub fn extraction_request(image: EncodedImage, config: &WorkflowConfig) -> ModelRequest {
    ModelRequest {
        system_prompt: config
            .extraction_prompt
            .clone()
            .unwrap_or_else(|| EXTRACTION_SYSTEM_PROMPT.to_string()),
        user_text: String::new(),
        image: Some(image),
        max_tokens: config.extraction_max_tokens,
        temperature: config.temperature,
    }
}

/// Build the summary request for the full text.
pub fn summary_request(text: &str, config: &WorkflowConfig) -> ModelRequest {
    ModelRequest {
        system_prompt: config
            .summary_prompt
            .clone()
            .unwrap_or_else(|| SUMMARY_SYSTEM_PROMPT.to_string()),
        user_text: summary_user_prompt(text),
        image: None,
        max_tokens: config.summary_max_tokens,
        temperature: config.temperature,
    }
}

/// Transcribe one image. `result` is filled in place of the text/error slots.
pub async fn extract_text(
    backend: &dyn CompletionBackend,
    image: EncodedImage,
    mut result: ImageResult,
    config: &WorkflowConfig,
) -> ImageResult {
    let outcome = call_with_retry(backend, &extraction_request(image, config), config).await;

    result.input_tokens = outcome.input_tokens;
    result.output_tokens = outcome.output_tokens;
    result.retries = outcome.retries();
    result.duration_ms = outcome.duration_ms;
    match outcome.result {
        Ok(text) => result.text = text,
        Err(detail) => {
            result.error = Some(StepError::Extraction {
                detail,
                attempts: outcome.attempts,
            })
        }
    }
    result
}

/// Summarise the full text in a single call.
pub async fn summarize(
    backend: &dyn CompletionBackend,
    text: &str,
    config: &WorkflowConfig,
) -> SummaryResult {
    let outcome = call_with_retry(backend, &summary_request(text, config), config).await;
    let retries = outcome.retries();

    let (text, error) = match outcome.result {
        Ok(summary) => (summary, None),
        Err(detail) => (
            String::new(),
            Some(StepError::Summary {
                detail,
                attempts: outcome.attempts,
            }),
        ),
    };

    SummaryResult {
        text,
        error,
        input_tokens: outcome.input_tokens,
        output_tokens: outcome.output_tokens,
        retries,
        duration_ms: outcome.duration_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed list of replies and records every request.
    struct Scripted {
        replies: Mutex<VecDeque<Result<ModelReply, BackendError>>>,
        seen: Mutex<Vec<ModelRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<ModelReply, BackendError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionBackend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, BackendError> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::permanent("script exhausted")))
        }
    }

    /// Never answers.
    struct Hung;

    #[async_trait]
    impl CompletionBackend for Hung {
        fn name(&self) -> &str {
            "hung"
        }

        async fn complete(&self, _request: &ModelRequest) -> Result<ModelReply, BackendError> {
            std::future::pending().await
        }
    }

    fn reply(text: &str) -> Result<ModelReply, BackendError> {
        Ok(ModelReply {
            content: text.into(),
            prompt_tokens: 10,
            completion_tokens: 5,
        })
    }

    fn fast_config() -> WorkflowConfig {
        WorkflowConfig::builder()
            .retry_backoff_ms(1)
            .max_retries(2)
            .build()
            .unwrap()
    }

    fn image() -> EncodedImage {
        EncodedImage {
            base64: "aGVsbG8=".into(),
            mime_type: "image/png",
        }
    }

    #[tokio::test]
    async fn reply_is_trimmed() {
        let backend = Scripted::new(vec![reply("  Dear diary,\n\n")]);
        let r = extract_text(&backend, image(), ImageResult::new("a.png", 0, None), &fast_config())
            .await;
        assert_eq!(r.text, "Dear diary,");
        assert!(r.error.is_none());
        assert_eq!(r.retries, 0);
        assert_eq!(r.input_tokens, 10);
    }

    #[tokio::test]
    async fn extraction_request_shape() {
        let backend = Scripted::new(vec![reply("x")]);
        let config = fast_config();
        extract_text(&backend, image(), ImageResult::new("a.png", 0, None), &config).await;

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].system_prompt, EXTRACTION_SYSTEM_PROMPT);
        assert_eq!(seen[0].user_text, "");
        assert_eq!(seen[0].image, Some(image()));
        assert_eq!(seen[0].max_tokens, 2000);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let backend = Scripted::new(vec![
            Err(BackendError::retryable("503")),
            Err(BackendError::retryable("503")),
            reply("ok"),
        ]);
        let r = extract_text(&backend, image(), ImageResult::new("a.png", 0, None), &fast_config())
            .await;
        assert_eq!(r.text, "ok");
        assert_eq!(r.retries, 2);
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_become_step_error() {
        let backend = Scripted::new(vec![
            Err(BackendError::retryable("503 a")),
            Err(BackendError::retryable("503 b")),
            Err(BackendError::retryable("503 c")),
        ]);
        let r = extract_text(&backend, image(), ImageResult::new("a.png", 0, None), &fast_config())
            .await;
        assert_eq!(
            r.error,
            Some(StepError::Extraction {
                detail: "503 c".into(),
                attempts: 3
            })
        );
        assert_eq!(r.buffer_entry(), "Error extracting text: 503 c");
        assert!(r.text.is_empty());
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let backend = UnavailableBackend::new("openai/gpt-4o", "OPENAI_API_KEY not set");
        let s = summarize(&backend, "text", &fast_config()).await;
        assert_eq!(
            s.artifact_text(),
            "Error generating summary: OPENAI_API_KEY not set"
        );
        assert_eq!(s.error.as_ref().map(|e| e.attempts()), Some(1));
    }

    #[test]
    fn provider_errors_are_classified() {
        for e in [
            LlmError::AuthError("invalid_api_key".into()),
            LlmError::InvalidRequest("bad image".into()),
            LlmError::ModelNotFound("gpt-x".into()),
        ] {
            assert!(!BackendError::from(e).retryable);
        }
        for e in [
            LlmError::NetworkError("reset".into()),
            LlmError::RateLimited("429".into()),
            LlmError::Timeout,
            LlmError::ApiError("503".into()),
        ] {
            assert!(BackendError::from(e).retryable);
        }
        assert_eq!(
            BackendError::from(LlmError::AuthError("bad key".into())).message,
            "Authentication error: bad key"
        );
    }

    #[tokio::test]
    async fn rejected_key_is_tried_once() {
        let backend = Scripted::new(vec![
            Err(LlmError::AuthError("bad key".into()).into()),
            reply("never reached"),
        ]);
        let r = extract_text(&backend, image(), ImageResult::new("a.png", 0, None), &fast_config())
            .await;
        assert_eq!(backend.calls(), 1);
        assert_eq!(r.retries, 0);
        assert_eq!(
            r.buffer_entry(),
            "Error extracting text: Authentication error: bad key"
        );
    }

    #[tokio::test]
    async fn hung_backend_times_out() {
        let config = WorkflowConfig::builder()
            .api_timeout_secs(1)
            .max_retries(0)
            .build()
            .unwrap();
        let outcome = call_with_retry(&Hung, &summary_request("t", &config), &config).await;
        assert_eq!(outcome.result, Err("request timed out after 1s".to_string()));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn summary_request_embeds_text() {
        let backend = Scripted::new(vec![reply(" A short summary. ")]);
        let s = summarize(&backend, "full text\n\n", &fast_config()).await;
        assert_eq!(s.text, "A short summary.");

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].system_prompt, SUMMARY_SYSTEM_PROMPT);
        assert_eq!(seen[0].user_text, "Summarize this content:\n\nfull text\n\n");
        assert!(seen[0].image.is_none());
        assert_eq!(seen[0].max_tokens, 1024);
    }

    #[test]
    fn prompt_overrides_apply() {
        let config = WorkflowConfig::builder()
            .extraction_prompt("custom ocr")
            .summary_prompt("custom summary")
            .build()
            .unwrap();
        assert_eq!(extraction_request(image(), &config).system_prompt, "custom ocr");
        assert_eq!(summary_request("x", &config).system_prompt, "custom summary");
    }
}
