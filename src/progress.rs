//! Progress-callback trait for per-image workflow events.
//!
//! Inject an [`Arc<dyn WorkflowProgressCallback>`] via
//! [`crate::config::WorkflowConfigBuilder::progress_callback`] to see each
//! extracted text the moment the model returns it, rather than after the
//! summary is written.
//!
//! # Example
//!
//! ```rust
//! use handscribe::{ImageResult, WorkflowConfig, WorkflowProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     images: AtomicUsize,
//! }
//!
//! impl WorkflowProgressCallback for CountingCallback {
//!     fn on_image_complete(&self, result: &ImageResult) {
//!         self.images.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}: {} chars", result.label(), result.text.len());
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { images: AtomicUsize::new(0) });
//! let config = WorkflowConfig::builder()
//!     .progress_callback(cb as Arc<dyn WorkflowProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{ImageResult, RunArtifacts, SummaryResult};
use std::sync::Arc;

/// Called by the workflow as it moves through a run.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Events arrive in processing order; the workflow
/// never overlaps two images.
pub trait WorkflowProgressCallback: Send + Sync {
    /// Called once before the first file is staged.
    fn on_workflow_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called when a file starts staging.
    ///
    /// # Arguments
    /// * `file_index`  — 0-indexed position in the upload list
    /// * `total_files` — number of uploaded files
    /// * `name`        — original file name
    fn on_file_start(&self, file_index: usize, total_files: usize, name: &str) {
        let _ = (file_index, total_files, name);
    }

    /// Called once the images of a file are known (1 for an image, N for a PDF).
    fn on_images_ready(&self, name: &str, image_count: usize) {
        let _ = (name, image_count);
    }

    /// Called as soon as one image has been transcribed (or has failed).
    fn on_image_complete(&self, result: &ImageResult) {
        let _ = result;
    }

    /// Called when a file is abandoned (unsupported type, corrupt PDF, …).
    fn on_file_error(&self, name: &str, error: &str) {
        let _ = (name, error);
    }

    /// Called just before the summary request is sent.
    fn on_summary_start(&self, text_len: usize) {
        let _ = text_len;
    }

    /// Called with the summary outcome.
    fn on_summary_complete(&self, summary: &SummaryResult) {
        let _ = summary;
    }

    /// Called once after all artifacts have been written.
    fn on_workflow_complete(&self, artifacts: &RunArtifacts) {
        let _ = artifacts;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl WorkflowProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::WorkflowConfig`].
pub type ProgressCallback = Arc<dyn WorkflowProgressCallback>;
