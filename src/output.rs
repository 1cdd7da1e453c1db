//! Result types produced by a workflow run.

use crate::error::StepError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Separator appended after every entry of the full-text buffer.
pub const ENTRY_SEPARATOR: &str = "\n\n";

/// Outcome of transcribing one image.
///
/// `text` holds the trimmed model output when `error` is `None`. When the
/// call failed, `text` is empty and `error` says why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResult {
    /// Original name of the uploaded file this image came from.
    pub file_name: String,
    /// 0-indexed position of that file in the upload list.
    pub file_index: usize,
    /// 1-indexed page number for PDF pages; `None` for uploaded images.
    pub page: Option<usize>,
    pub text: String,
    pub error: Option<StepError>,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub retries: u32,
    pub duration_ms: u64,
    /// Path of the image relative to the run directory, when it was kept.
    pub image_path: Option<PathBuf>,
}

impl ImageResult {
    /// An empty, successful result for the given source.
    pub fn new(file_name: impl Into<String>, file_index: usize, page: Option<usize>) -> Self {
        Self {
            file_name: file_name.into(),
            file_index,
            page,
            text: String::new(),
            error: None,
            input_tokens: 0,
            output_tokens: 0,
            retries: 0,
            duration_ms: 0,
            image_path: None,
        }
    }

    /// Human-readable source label, e.g. `scan.pdf — page 3`.
    pub fn label(&self) -> String {
        match self.page {
            Some(p) => format!("{} — page {}", self.file_name, p),
            None => self.file_name.clone(),
        }
    }

    /// Typed view of the outcome.
    pub fn outcome(&self) -> Result<&str, &StepError> {
        match &self.error {
            None => Ok(&self.text),
            Some(e) => Err(e),
        }
    }

    /// What this image contributes to the full-text buffer (without separator).
    pub fn buffer_entry(&self) -> String {
        match self.outcome() {
            Ok(text) => text.to_string(),
            Err(e) => e.to_string(),
        }
    }
}

/// Concatenate the buffer entries of `images`, each followed by a blank line.
pub fn compose_full_text(images: &[ImageResult]) -> String {
    let mut buffer = String::new();
    for image in images {
        buffer.push_str(&image.buffer_entry());
        buffer.push_str(ENTRY_SEPARATOR);
    }
    buffer
}

/// Outcome of the single summary call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResult {
    pub text: String,
    pub error: Option<StepError>,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub retries: u32,
    pub duration_ms: u64,
}

impl SummaryResult {
    /// Typed view of the outcome.
    pub fn outcome(&self) -> Result<&str, &StepError> {
        match &self.error {
            None => Ok(&self.text),
            Some(e) => Err(e),
        }
    }

    /// The text written to `summary.txt` and the document's Summary section.
    pub fn artifact_text(&self) -> String {
        match self.outcome() {
            Ok(text) => text.to_string(),
            Err(e) => e.to_string(),
        }
    }
}

/// A file that was abandoned before any of its images reached the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFailure {
    pub file_name: String,
    pub file_index: usize,
    pub reason: String,
}

/// The three downloadable artifacts of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArtifacts {
    pub run_id: Uuid,
    /// `<output_root>/<run_id>`
    pub dir: PathBuf,
    /// `output.txt`: the full-text buffer.
    pub text: PathBuf,
    /// `summary.txt`
    pub summary: PathBuf,
    /// `output.docx`: headed "Extracted Text" and "Summary" sections.
    pub document: PathBuf,
}

/// Aggregate counters for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowStats {
    pub files_total: usize,
    pub files_failed: usize,
    pub images_total: usize,
    pub images_failed: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub render_duration_ms: u64,
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOutput {
    pub run_id: Uuid,
    /// One entry per processed image, in processing order.
    pub images: Vec<ImageResult>,
    pub failed_files: Vec<FileFailure>,
    /// Exactly the contents of `output.txt`.
    pub full_text: String,
    pub summary: SummaryResult,
    pub artifacts: RunArtifacts,
    pub stats: WorkflowStats,
}
