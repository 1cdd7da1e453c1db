//! # handscribe
//!
//! Turn scans and photos of handwritten notes into clean digital text, a
//! short summary, and a Word document.
//!
//! ## Why this crate?
//!
//! Classic OCR engines are trained on print and do poorly on cursive,
//! margin notes and crossed-out words. Instead every page is rasterised to a
//! PNG and handed to a vision model that reads it the way a person would;
//! a second call condenses the transcription.
//!
//! ## Pipeline Overview
//!
//! ```text
//! uploads (pdf / png / jpg / jpeg)
//!  │
//!  ├─ 1. Stage      write each upload to a temp file (extension kept)
//!  ├─ 2. Render     PDF pages → page_<n>.png at 300 DPI (pdfium, spawn_blocking)
//!  ├─ 3. Encode     image bytes → base64
//!  ├─ 4. Extract    one vision call per image, strictly in order
//!  ├─ 5. Summarise  one text call over the concatenated transcription
//!  └─ 6. Assemble   output.txt, summary.txt, output.docx in runs/<run_id>/
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use handscribe::{run_workflow, UploadedFile, WorkflowConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider key read from .handscribe/secrets.toml or OPENAI_API_KEY
//!     let config = WorkflowConfig::default();
//!     let files = vec![UploadedFile::from_path(Path::new("notes.pdf")).await?];
//!     let output = run_workflow(files, &config).await?;
//!     println!("{}", output.full_text);
//!     println!("{}", output.summary.artifact_text());
//!     eprintln!("artifacts in {}", output.artifacts.dir.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | The upload page and download routes (axum + tower-http) |
//! | `cli`    | on      | The `handscribe` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Library-only use:
//! ```toml
//! handscribe = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod credentials;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;
pub mod workflow;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{WorkflowConfig, WorkflowConfigBuilder};
pub use credentials::{load_api_credential, ApiCredential, CredentialSource};
pub use error::{HandscribeError, StepError};
pub use output::{
    FileFailure, ImageResult, RunArtifacts, SummaryResult, WorkflowOutput, WorkflowStats,
};
pub use pipeline::assemble::{read_sections, write_document, Section};
pub use pipeline::llm::{BackendError, CompletionBackend, ModelReply, ModelRequest};
pub use pipeline::stage::{FileKind, UploadedFile};
pub use progress::{NoopProgressCallback, ProgressCallback, WorkflowProgressCallback};
pub use workflow::run_workflow;
