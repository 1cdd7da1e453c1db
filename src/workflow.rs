//! Top-level workflow: uploads in, transcription + summary + artifacts out.

use crate::config::{WorkflowConfig, DEFAULT_PROVIDER};
use crate::error::HandscribeError;
use crate::output::{
    compose_full_text, FileFailure, ImageResult, WorkflowOutput, WorkflowStats,
};
use crate::pipeline::llm::{CompletionBackend, LlmBackend, UnavailableBackend};
use crate::pipeline::stage::{stage, FileKind, UploadedFile};
use crate::pipeline::{assemble, encode, llm, render};
use edgequake_llm::ProviderFactory;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Sub-directory of a run that holds kept page images.
pub const PAGES_DIR: &str = "pages";

/// Transcribe every uploaded file, summarise the result and write the
/// artifacts into a fresh `<output_root>/<run_id>/` directory.
///
/// Files are processed in upload order and their images strictly one after
/// another; each [`ImageResult`] is reported through the progress callback
/// as soon as it exists. A file that cannot be staged or rasterised is
/// recorded in [`WorkflowOutput::failed_files`] and the run moves on.
///
/// # Errors
/// - [`HandscribeError::NoFiles`] for an empty upload list.
/// - [`HandscribeError::AllFilesFailed`] when no file could be processed;
///   nothing is written in that case.
/// - Output errors when an artifact cannot be written.
///
/// Dropping the returned future cancels the run; staged uploads and scratch
/// page images are removed by their guards.
pub async fn run_workflow(
    files: Vec<UploadedFile>,
    config: &WorkflowConfig,
) -> Result<WorkflowOutput, HandscribeError> {
    let total_start = Instant::now();

    if files.is_empty() {
        return Err(HandscribeError::NoFiles);
    }

    let run_id = Uuid::new_v4();
    let run_dir = config.output_root.join(run_id.to_string());
    info!("Run {}: {} file(s)", run_id, files.len());

    let extraction_backend = resolve_backend(
        config.extraction_backend.as_ref(),
        &provider_name(config),
        &config.extraction_model,
    );
    let summary_backend = resolve_backend(
        config.summary_backend.as_ref(),
        &provider_name(config),
        &config.summary_model,
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_workflow_start(files.len());
    }

    // ── Steps 1–3: Stage, rasterise, extract (file by file) ──────────────
    let mut images: Vec<ImageResult> = Vec::new();
    let mut failed_files: Vec<FileFailure> = Vec::new();
    let mut render_duration_ms = 0u64;

    for (file_index, upload) in files.iter().enumerate() {
        if let Some(ref cb) = config.progress_callback {
            cb.on_file_start(file_index, files.len(), &upload.name);
        }

        let mut ctx = FileContext {
            upload,
            file_index,
            run_dir: &run_dir,
            backend: extraction_backend.as_ref(),
            config,
            render_duration_ms: 0,
        };
        let outcome = ctx.process(&mut images).await;
        render_duration_ms += ctx.render_duration_ms;

        if let Err(e) = outcome {
            let reason = e.to_string();
            warn!("File '{}' failed: {}", upload.name, reason);
            if let Some(ref cb) = config.progress_callback {
                cb.on_file_error(&upload.name, &reason);
            }
            failed_files.push(FileFailure {
                file_name: upload.name.clone(),
                file_index,
                reason,
            });
        }
    }

    if failed_files.len() == files.len() && images.is_empty() {
        if config.keep_page_images {
            if let Err(e) = tokio::fs::remove_dir_all(&run_dir).await {
                warn!("Failed to remove run dir {}: {}", run_dir.display(), e);
            }
        }
        let first_error = failed_files
            .first()
            .map(|f| format!("{}: {}", f.file_name, f.reason))
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(HandscribeError::AllFilesFailed {
            total: files.len(),
            first_error,
        });
    }

    // ── Step 4: Summarise ────────────────────────────────────────────────
    let full_text = compose_full_text(&images);
    debug!("Full text: {} chars from {} image(s)", full_text.len(), images.len());

    if let Some(ref cb) = config.progress_callback {
        cb.on_summary_start(full_text.len());
    }
    let summary = llm::summarize(summary_backend.as_ref(), &full_text, config).await;
    if let Err(e) = summary.outcome() {
        warn!("Run {}: {}", run_id, e);
    }
    if let Some(ref cb) = config.progress_callback {
        cb.on_summary_complete(&summary);
    }

    // ── Step 5: Write artifacts ──────────────────────────────────────────
    let artifacts =
        assemble::write_artifacts(&run_dir, run_id, &full_text, &summary.artifact_text()).await?;

    let stats = WorkflowStats {
        files_total: files.len(),
        files_failed: failed_files.len(),
        images_total: images.len(),
        images_failed: images.iter().filter(|i| i.error.is_some()).count(),
        total_input_tokens: images.iter().map(|i| i.input_tokens as u64).sum::<u64>()
            + summary.input_tokens as u64,
        total_output_tokens: images.iter().map(|i| i.output_tokens as u64).sum::<u64>()
            + summary.output_tokens as u64,
        render_duration_ms,
        llm_duration_ms: images.iter().map(|i| i.duration_ms).sum::<u64>() + summary.duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Run {} complete: {}/{} images transcribed, {} file(s) failed, {}ms total",
        run_id,
        stats.images_total - stats.images_failed,
        stats.images_total,
        stats.files_failed,
        stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_workflow_complete(&artifacts);
    }

    Ok(WorkflowOutput {
        run_id,
        images,
        failed_files,
        full_text,
        summary,
        artifacts,
        stats,
    })
}

/// Per-file state for one pass through stage → render → extract.
struct FileContext<'a> {
    upload: &'a UploadedFile,
    file_index: usize,
    run_dir: &'a Path,
    backend: &'a dyn CompletionBackend,
    config: &'a WorkflowConfig,
    render_duration_ms: u64,
}

/// Where a file's images live while it is processed.
enum ImageDir {
    /// Deleted when dropped.
    Scratch(TempDir),
    /// `<run>/pages/<file_no>/`, kept with the artifacts.
    Kept(PathBuf),
}

impl ImageDir {
    fn path(&self) -> &Path {
        match self {
            ImageDir::Scratch(dir) => dir.path(),
            ImageDir::Kept(path) => path,
        }
    }
}

impl FileContext<'_> {
    /// Results are pushed into `images` as they complete, so a late failure
    /// keeps the pages already transcribed.
    async fn process(&mut self, images: &mut Vec<ImageResult>) -> Result<(), HandscribeError> {
        let staged = stage(self.upload, self.config.scratch_root.as_deref())?;
        let image_dir = self.image_dir().await?;

        let paths: Vec<(Option<usize>, PathBuf)> = match staged.kind() {
            FileKind::Pdf => {
                let render_start = Instant::now();
                let pages =
                    render::rasterize_pdf(staged.path(), image_dir.path(), self.config).await?;
                self.render_duration_ms = render_start.elapsed().as_millis() as u64;
                info!(
                    "'{}': rendered {} page(s) in {}ms",
                    self.upload.name,
                    pages.len(),
                    self.render_duration_ms
                );
                pages
                    .into_iter()
                    .enumerate()
                    .map(|(idx, path)| (Some(idx + 1), path))
                    .collect()
            }
            FileKind::Png | FileKind::Jpeg => {
                let path = match &image_dir {
                    ImageDir::Kept(dir) => {
                        let target = dir.join(kept_upload_name(&self.upload.name));
                        tokio::fs::copy(staged.path(), &target).await.map_err(|source| {
                            HandscribeError::OutputWriteFailed {
                                path: target.clone(),
                                source,
                            }
                        })?;
                        target
                    }
                    ImageDir::Scratch(_) => staged.path().to_path_buf(),
                };
                vec![(None, path)]
            }
        };

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_images_ready(&self.upload.name, paths.len());
        }

        for (page, path) in paths {
            let encoded = encode::encode_image_file(&path).await?;
            let mut result = ImageResult::new(&self.upload.name, self.file_index, page);
            if let ImageDir::Kept(_) = image_dir {
                result.image_path = path.strip_prefix(self.run_dir).ok().map(Path::to_path_buf);
            }

            let result = llm::extract_text(self.backend, encoded, result, self.config).await;
            match result.outcome() {
                Ok(text) => debug!("{}: {} chars", result.label(), text.len()),
                Err(e) => warn!("{}: {}", result.label(), e),
            }
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_image_complete(&result);
            }
            images.push(result);
        }

        Ok(())
    }

    async fn image_dir(&self) -> Result<ImageDir, HandscribeError> {
        if self.config.keep_page_images {
            let dir = self
                .run_dir
                .join(PAGES_DIR)
                .join((self.file_index + 1).to_string());
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| HandscribeError::OutputWriteFailed {
                    path: dir.clone(),
                    source,
                })?;
            Ok(ImageDir::Kept(dir))
        } else {
            let mut builder = tempfile::Builder::new();
            builder.prefix("handscribe-pages-");
            match self.config.scratch_root.as_deref() {
                Some(root) => builder.tempdir_in(root),
                None => builder.tempdir(),
            }
            .map(ImageDir::Scratch)
                .map_err(|source| HandscribeError::StagingFailed {
                    name: self.upload.name.clone(),
                    source,
                })
        }
    }
}

/// `upload.<ext>` with the original extension lower-cased.
fn kept_upload_name(original: &str) -> String {
    let ext = Path::new(original)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_else(|| "png".to_string());
    format!("upload.{}", ext)
}

// ── Backend resolution ───────────────────────────────────────────────────

/// Provider used for both calls: config, then `EDGEQUAKE_LLM_PROVIDER`,
/// then [`DEFAULT_PROVIDER`].
pub fn provider_name(config: &WorkflowConfig) -> String {
    if let Some(ref name) = config.provider_name {
        return name.clone();
    }
    match std::env::var("EDGEQUAKE_LLM_PROVIDER") {
        Ok(name) if !name.trim().is_empty() => name,
        _ => DEFAULT_PROVIDER.to_string(),
    }
}

/// Pick the pre-built backend if one was supplied, otherwise build one from
/// the provider factory.
///
/// A provider that cannot be built (typically: no API key) is not an error
/// here. It becomes an [`UnavailableBackend`] whose calls fail with the
/// factory's message, so the failure shows up in the affected results.
pub fn resolve_backend(
    preset: Option<&Arc<dyn CompletionBackend>>,
    provider: &str,
    model: &str,
) -> Arc<dyn CompletionBackend> {
    if let Some(backend) = preset {
        return Arc::clone(backend);
    }

    let name = format!("{}/{}", provider, model);
    match ProviderFactory::create_llm_provider(provider, model) {
        Ok(p) => {
            debug!("Using provider {}", name);
            Arc::new(LlmBackend::new(p, name))
        }
        Err(e) => {
            warn!("Provider {} is not configured: {}", name, e);
            Arc::new(UnavailableBackend::new(
                name,
                format!("provider '{}' is not configured: {}", provider, e),
            ))
        }
    }
}
