//! Error types for the handscribe library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`HandscribeError`] — **Fatal** to a file or to a whole run: the upload
//!   has an unsupported type, the PDF is corrupt, pdfium cannot be bound, or
//!   an artifact cannot be written. Returned as `Err(HandscribeError)`.
//!
//! * [`StepError`] — **Non-fatal**: one remote call (extraction of a single
//!   image, or the summary) failed after its retries. Stored inside
//!   [`crate::output::ImageResult`] / [`crate::output::SummaryResult`] so the
//!   run carries on and the caller can tell a failure from real text by type,
//!   not by sniffing a prefix.
//!
//! The `Display` form of a [`StepError`] is what lands in the downloadable
//! text artifacts, so a reader of `output.txt` still sees why a page is
//! missing.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the handscribe library.
#[derive(Debug, Error)]
pub enum HandscribeError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The run was started without any uploaded files.
    #[error("No files were uploaded")]
    NoFiles,

    /// The upload's extension is not one of pdf, png, jpg, jpeg.
    #[error("Unsupported file type for '{name}': expected .pdf, .png, .jpg or .jpeg")]
    UnsupportedFileType { name: String },

    /// The upload claims to be a PDF but does not start with `%PDF`.
    #[error("File '{name}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { name: String, magic: Vec<u8> },

    /// The upload claims to be an image but no raster format was recognised.
    #[error("File '{name}' is not a readable PNG or JPEG image")]
    UnreadableImage { name: String },

    /// Writing the upload to its temporary staging file failed.
    #[error("Failed to stage upload '{name}': {source}")]
    StagingFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// An image file could not be read for encoding.
    #[error("Failed to read image '{path}': {source}")]
    ImageReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An image file holds neither PNG nor JPEG data.
    #[error("Image '{path}' is neither PNG nor JPEG")]
    UnsupportedImageFormat { path: PathBuf },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium (https://github.com/bblanchon/pdfium-binaries) and either\n\
  • place it in the working directory, or\n\
  • set PDFIUM_LIB_PATH=/path/to/libpdfium.\n"
    )]
    PdfiumBindingFailed(String),

    /// Every uploaded file failed before any image reached the model.
    #[error("All {total} uploaded files failed.\nFirst error: {first_error}")]
    AllFilesFailed { total: usize, first_error: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write a plain-text artifact or a page image.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The `.docx` package could not be assembled.
    #[error("Failed to build document '{path}': {detail}")]
    DocumentWriteFailed { path: PathBuf, detail: String },

    /// The `.docx` package could not be opened or parsed.
    #[error("Failed to read document '{path}': {detail}")]
    DocumentReadFailed { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The secret store exists but is not valid TOML.
    #[error("Failed to read secret store '{path}': {detail}")]
    SecretStore { path: PathBuf, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal failure of a single remote call.
///
/// The display strings are fixed: downstream readers of the text artifacts
/// rely on the `Error extracting text: ` / `Error generating summary: `
/// prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum StepError {
    /// Text extraction for one image failed after all attempts.
    #[error("Error extracting text: {detail}")]
    Extraction { detail: String, attempts: u32 },

    /// Summarisation of the full text failed after all attempts.
    #[error("Error generating summary: {detail}")]
    Summary { detail: String, attempts: u32 },
}

impl StepError {
    /// The underlying failure description, without the fixed prefix.
    pub fn detail(&self) -> &str {
        match self {
            StepError::Extraction { detail, .. } | StepError::Summary { detail, .. } => detail,
        }
    }

    /// How many attempts were made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            StepError::Extraction { attempts, .. } | StepError::Summary { attempts, .. } => {
                *attempts
            }
        }
    }
}
