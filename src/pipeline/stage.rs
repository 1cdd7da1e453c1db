//! File staging: persist an uploaded file to a temporary path.
//!
//! pdfium and the image decoders want a file-system path, not a byte buffer.
//! Each upload is written to a `NamedTempFile` that keeps the original
//! extension; the file is deleted when the [`StagedFile`] guard is dropped,
//! so a run never leaves staged uploads behind, even on early return.
//!
//! The content is checked against the declared type before anything is
//! written: a PDF must start with `%PDF`, a `.png` must be PNG data and a
//! `.jpg`/`.jpeg` must be JPEG data. Callers get a meaningful error instead of a pdfium crash.

use crate::error::HandscribeError;
use image::ImageFormat;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// One file as received from the browser form or the command line.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Original file name, including extension.
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a local file, using its file name as the upload name.
    pub async fn from_path(path: &Path) -> Result<Self, HandscribeError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| HandscribeError::StagingFailed {
                name: name.clone(),
                source,
            })?;
        Ok(Self { name, bytes })
    }

    /// Declared type, from the file-name extension.
    pub fn kind(&self) -> Result<FileKind, HandscribeError> {
        FileKind::from_name(&self.name).ok_or_else(|| HandscribeError::UnsupportedFileType {
            name: self.name.clone(),
        })
    }
}

/// The upload types accepted by the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Png,
    Jpeg,
}

impl FileKind {
    /// Extensions accepted by the upload control.
    pub const ACCEPTED_EXTENSIONS: [&'static str; 4] = ["pdf", "png", "jpg", "jpeg"];

    /// Classify a file name by its extension (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(FileKind::Pdf),
            "png" => Some(FileKind::Png),
            "jpg" | "jpeg" => Some(FileKind::Jpeg),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            FileKind::Pdf => "application/pdf",
            FileKind::Png => "image/png",
            FileKind::Jpeg => "image/jpeg",
        }
    }

    pub fn is_pdf(&self) -> bool {
        matches!(self, FileKind::Pdf)
    }
}

/// An upload written to disk. The file lives as long as this guard.
#[derive(Debug)]
pub struct StagedFile {
    file: NamedTempFile,
    kind: FileKind,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }
}

/// Write `upload` to a new temporary file that preserves its extension.
///
/// The file is created in `scratch_root`, or the system temp directory when
/// that is `None`.
pub fn stage(
    upload: &UploadedFile,
    scratch_root: Option<&Path>,
) -> Result<StagedFile, HandscribeError> {
    let kind = upload.kind()?;
    validate_content(upload, kind)?;

    let suffix = Path::new(&upload.name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let staging_err = |source| HandscribeError::StagingFailed {
        name: upload.name.clone(),
        source,
    };

    let mut builder = tempfile::Builder::new();
    builder.prefix("handscribe-").suffix(&suffix);
    let mut file = match scratch_root {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .map_err(staging_err)?;
    file.write_all(&upload.bytes).map_err(staging_err)?;
    file.flush().map_err(staging_err)?;

    debug!(
        "Staged '{}' ({} bytes) → {}",
        upload.name,
        upload.bytes.len(),
        file.path().display()
    );

    Ok(StagedFile { file, kind })
}

/// Check the bytes look like what the extension promises.
fn validate_content(upload: &UploadedFile, kind: FileKind) -> Result<(), HandscribeError> {
    match kind {
        FileKind::Pdf => {
            if !upload.bytes.starts_with(b"%PDF") {
                return Err(HandscribeError::NotAPdf {
                    name: upload.name.clone(),
                    magic: upload.bytes.iter().take(4).copied().collect(),
                });
            }
        }
        FileKind::Png | FileKind::Jpeg => {
            let expected = match kind {
                FileKind::Png => ImageFormat::Png,
                _ => ImageFormat::Jpeg,
            };
            if image::guess_format(&upload.bytes).ok() != Some(expected) {
                return Err(HandscribeError::UnreadableImage {
                    name: upload.name.clone(),
                });
            }
        }
    }
    Ok(())
}
