//! Configuration types for a transcription + summary run.
//!
//! All workflow behaviour is controlled through [`WorkflowConfig`], built via
//! its [`WorkflowConfigBuilder`]. One struct holds every knob so the web
//! server can clone it into each request and the CLI can map flags onto it
//! one-to-one.

use crate::error::HandscribeError;
use crate::pipeline::llm::CompletionBackend;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default model used to read page images.
pub const DEFAULT_EXTRACTION_MODEL: &str = "gpt-4o";

/// Default model used to summarise the extracted text.
pub const DEFAULT_SUMMARY_MODEL: &str = "gpt-4-turbo";

/// Default provider when neither the config nor `EDGEQUAKE_LLM_PROVIDER` name one.
pub const DEFAULT_PROVIDER: &str = "openai";

/// Configuration for one workflow run.
///
/// Built via [`WorkflowConfig::builder()`] or using
/// [`WorkflowConfig::default()`].
///
/// # Example
/// ```rust
/// use handscribe::WorkflowConfig;
///
/// let config = WorkflowConfig::builder()
///     .dpi(200)
///     .extraction_model("gpt-4.1-mini")
///     .output_root("/tmp/handscribe-runs")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct WorkflowConfig {
    /// Rendering DPI used when rasterising PDF pages. Range: 72–600. Default: 300.
    ///
    /// Handwriting needs more pixels than print; 300 DPI keeps pen strokes
    /// legible to the vision model.
    pub dpi: u32,

    /// Maximum rendered image edge in pixels. Default: 5000.
    ///
    /// Caps memory for oversized pages (A0 scans) independently of DPI.
    pub max_rendered_pixels: u32,

    /// Provider name passed to `ProviderFactory` (e.g. "openai", "anthropic").
    /// If None, `EDGEQUAKE_LLM_PROVIDER` is consulted, then [`DEFAULT_PROVIDER`].
    pub provider_name: Option<String>,

    /// Vision model that transcribes each image.
    pub extraction_model: String,

    /// Text model that writes the summary.
    pub summary_model: String,

    /// Pre-constructed backend for extraction. Takes precedence over `provider_name`.
    pub extraction_backend: Option<Arc<dyn CompletionBackend>>,

    /// Pre-constructed backend for summarisation. Takes precedence over `provider_name`.
    pub summary_backend: Option<Arc<dyn CompletionBackend>>,

    /// Sampling temperature for both calls. Default: 0.1.
    pub temperature: f32,

    /// Response cap for a single extraction. Default: 2000.
    pub extraction_max_tokens: usize,

    /// Response cap for the summary. Default: 1024.
    pub summary_max_tokens: usize,

    /// Retries after the first failed attempt of a remote call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds; doubles after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-attempt timeout of a remote call in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Directory under which every run creates `<run_id>/`. Default: `runs`.
    pub output_root: PathBuf,

    /// Keep rasterised pages and uploaded images under `<run_id>/pages/`.
    /// Default: false (scratch images are deleted once their file is done).
    pub keep_page_images: bool,

    /// Directory for staged uploads and scratch page images.
    /// If None, the system temp directory is used.
    pub scratch_root: Option<PathBuf>,

    /// Override for the extraction system prompt.
    pub extraction_prompt: Option<String>,

    /// Override for the summary system prompt.
    pub summary_prompt: Option<String>,

    /// Optional progress callback, invoked as each image completes.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_rendered_pixels: 5000,
            provider_name: None,
            extraction_model: DEFAULT_EXTRACTION_MODEL.to_string(),
            summary_model: DEFAULT_SUMMARY_MODEL.to_string(),
            extraction_backend: None,
            summary_backend: None,
            temperature: 0.1,
            extraction_max_tokens: 2000,
            summary_max_tokens: 1024,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            output_root: PathBuf::from("runs"),
            keep_page_images: false,
            scratch_root: None,
            extraction_prompt: None,
            summary_prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for WorkflowConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("provider_name", &self.provider_name)
            .field("extraction_model", &self.extraction_model)
            .field("summary_model", &self.summary_model)
            .field(
                "extraction_backend",
                &self.extraction_backend.as_ref().map(|b| b.name().to_string()),
            )
            .field(
                "summary_backend",
                &self.summary_backend.as_ref().map(|b| b.name().to_string()),
            )
            .field("temperature", &self.temperature)
            .field("extraction_max_tokens", &self.extraction_max_tokens)
            .field("summary_max_tokens", &self.summary_max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("output_root", &self.output_root)
            .field("keep_page_images", &self.keep_page_images)
            .field("scratch_root", &self.scratch_root)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

impl WorkflowConfig {
    /// Create a new builder for `WorkflowConfig`.
    pub fn builder() -> WorkflowConfigBuilder {
        WorkflowConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`WorkflowConfig`].
#[derive(Debug)]
pub struct WorkflowConfigBuilder {
    config: WorkflowConfig,
}

impl WorkflowConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn extraction_model(mut self, model: impl Into<String>) -> Self {
        self.config.extraction_model = model.into();
        self
    }

    pub fn summary_model(mut self, model: impl Into<String>) -> Self {
        self.config.summary_model = model.into();
        self
    }

    pub fn extraction_backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.config.extraction_backend = Some(backend);
        self
    }

    pub fn summary_backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.config.summary_backend = Some(backend);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn extraction_max_tokens(mut self, n: usize) -> Self {
        self.config.extraction_max_tokens = n;
        self
    }

    pub fn summary_max_tokens(mut self, n: usize) -> Self {
        self.config.summary_max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn output_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_root = dir.into();
        self
    }

    pub fn keep_page_images(mut self, v: bool) -> Self {
        self.config.keep_page_images = v;
        self
    }

    pub fn scratch_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = Some(dir.into());
        self
    }

    pub fn extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.extraction_prompt = Some(prompt.into());
        self
    }

    pub fn summary_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.summary_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<WorkflowConfig, HandscribeError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(HandscribeError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.extraction_max_tokens == 0 || c.summary_max_tokens == 0 {
            return Err(HandscribeError::InvalidConfig(
                "Token caps must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(HandscribeError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.extraction_model.trim().is_empty() || c.summary_model.trim().is_empty() {
            return Err(HandscribeError::InvalidConfig(
                "Model identifiers must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
