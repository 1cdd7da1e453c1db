//! Workflow integration tests with scripted model backends.
//!
//! No network access is needed. The PDF test additionally needs a pdfium
//! library (PDFIUM_LIB_PATH, ./ or the system path) and skips itself
//! otherwise.

mod common;

use common::{image_bytes, minimal_pdf, png_bytes, FakeBackend};
use handscribe::pipeline::render::pdfium_available;
use handscribe::{
    read_sections, run_workflow, BackendError, HandscribeError, ImageResult, RunArtifacts,
    StepError, SummaryResult, UploadedFile, WorkflowConfig, WorkflowProgressCallback,
};
use image::ImageFormat;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

// ── Helpers ──────────────────────────────────────────────────────────────

fn config_with(
    root: &Path,
    extraction: Arc<FakeBackend>,
    summary: Arc<FakeBackend>,
) -> handscribe::WorkflowConfigBuilder {
    WorkflowConfig::builder()
        .output_root(root)
        .retry_backoff_ms(1)
        .extraction_backend(extraction)
        .summary_backend(summary)
}

fn dir_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

// ── Extraction ───────────────────────────────────────────────────────────

#[tokio::test]
async fn single_png_is_extracted_once_and_buffered() {
    let root = tempfile::tempdir().unwrap();
    let extraction = FakeBackend::fixed("Dear diary,\nIt rained.");
    let summary = FakeBackend::fixed("It rained.");
    let config = config_with(root.path(), extraction.clone(), summary.clone())
        .build()
        .unwrap();

    let output = run_workflow(vec![UploadedFile::new("note.png", png_bytes())], &config)
        .await
        .unwrap();

    assert_eq!(extraction.calls(), 1);
    assert_eq!(output.full_text, "Dear diary,\nIt rained.\n\n");
    assert_eq!(
        std::fs::read_to_string(&output.artifacts.text).unwrap(),
        "Dear diary,\nIt rained.\n\n"
    );

    let req = &extraction.requests()[0];
    assert_eq!(
        req.system_prompt,
        "You extract clean digital text from handwritten images."
    );
    assert_eq!(req.max_tokens, 2000);
    assert_eq!(req.image.as_ref().map(|i| i.mime_type), Some("image/png"));

    let sreq = &summary.requests()[0];
    assert_eq!(
        sreq.system_prompt,
        "You summarize long text clearly and concisely."
    );
    assert_eq!(
        sreq.user_text,
        "Summarize this content:\n\nDear diary,\nIt rained.\n\n"
    );
    assert_eq!(sreq.max_tokens, 1024);

    assert_eq!(output.summary.text, "It rained.");
    assert_eq!(
        std::fs::read_to_string(&output.artifacts.summary).unwrap(),
        "It rained."
    );
}

#[tokio::test]
async fn jpeg_is_sent_with_its_own_mime_type() {
    let root = tempfile::tempdir().unwrap();
    let extraction = FakeBackend::fixed("x");
    let config = config_with(root.path(), extraction.clone(), FakeBackend::fixed("s"))
        .build()
        .unwrap();

    run_workflow(
        vec![UploadedFile::new("photo.JPEG", image_bytes(ImageFormat::Jpeg))],
        &config,
    )
    .await
    .unwrap();

    let req = &extraction.requests()[0];
    assert_eq!(req.image.as_ref().map(|i| i.mime_type), Some("image/jpeg"));
}

#[tokio::test]
async fn buffer_preserves_upload_order_across_files() {
    let root = tempfile::tempdir().unwrap();
    let config = config_with(root.path(), FakeBackend::numbered(), FakeBackend::fixed("s"))
        .build()
        .unwrap();

    let files = vec![
        UploadedFile::new("a.png", png_bytes()),
        UploadedFile::new("b.jpg", image_bytes(ImageFormat::Jpeg)),
        UploadedFile::new("c.png", png_bytes()),
    ];
    let output = run_workflow(files, &config).await.unwrap();

    assert_eq!(output.full_text, "reply-1\n\nreply-2\n\nreply-3\n\n");
    let names: Vec<_> = output.images.iter().map(|i| i.file_name.as_str()).collect();
    assert_eq!(names, ["a.png", "b.jpg", "c.png"]);
    let indices: Vec<_> = output.images.iter().map(|i| i.file_index).collect();
    assert_eq!(indices, [0, 1, 2]);
}

#[tokio::test]
async fn failed_extraction_is_inline_and_later_images_continue() {
    let root = tempfile::tempdir().unwrap();
    let extraction = FakeBackend::new("flaky", |n, _| {
        if n == 0 {
            Err(BackendError::permanent("invalid image"))
        } else {
            Ok("second page".into())
        }
    });
    let config = config_with(root.path(), extraction.clone(), FakeBackend::fixed("s"))
        .build()
        .unwrap();

    let files = vec![
        UploadedFile::new("1.png", png_bytes()),
        UploadedFile::new("2.png", png_bytes()),
    ];
    let output = run_workflow(files, &config).await.unwrap();

    assert_eq!(extraction.calls(), 2);
    assert_eq!(
        output.full_text,
        "Error extracting text: invalid image\n\nsecond page\n\n"
    );
    assert_eq!(
        output.images[0].error,
        Some(StepError::Extraction {
            detail: "invalid image".into(),
            attempts: 1
        })
    );
    assert!(output.images[1].outcome().is_ok());
    assert_eq!(output.stats.images_failed, 1);
}

#[tokio::test]
async fn transient_failures_are_retried_per_image() {
    let root = tempfile::tempdir().unwrap();
    let extraction = FakeBackend::new("503", |n, _| {
        if n < 2 {
            Err(BackendError::retryable("503 Service Unavailable"))
        } else {
            Ok("finally".into())
        }
    });
    let config = config_with(root.path(), extraction.clone(), FakeBackend::fixed("s"))
        .max_retries(3)
        .build()
        .unwrap();

    let output = run_workflow(vec![UploadedFile::new("a.png", png_bytes())], &config)
        .await
        .unwrap();

    assert_eq!(output.images[0].text, "finally");
    assert_eq!(output.images[0].retries, 2);
    assert_eq!(extraction.calls(), 3);
}

// ── Summary ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn summary_failure_reaches_summary_txt_and_document() {
    let root = tempfile::tempdir().unwrap();
    let summary = FakeBackend::new("down", |_, _| Err(BackendError::permanent("quota exceeded")));
    let config = config_with(root.path(), FakeBackend::fixed("text"), summary)
        .build()
        .unwrap();

    let output = run_workflow(vec![UploadedFile::new("a.png", png_bytes())], &config)
        .await
        .unwrap();

    let expected = "Error generating summary: quota exceeded";
    assert!(output.summary.outcome().is_err());
    assert_eq!(
        std::fs::read_to_string(&output.artifacts.summary).unwrap(),
        expected
    );

    let sections = read_sections(&output.artifacts.document).unwrap();
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0].heading, "Extracted Text");
    assert_eq!(sections[0].body, "text\n\n");
    assert_eq!(sections[1].heading, "Summary");
    assert_eq!(sections[1].body, expected);
}

// ── Run isolation & scratch files ────────────────────────────────────────

#[tokio::test]
async fn two_runs_get_distinct_directories() {
    let root = tempfile::tempdir().unwrap();
    let first = config_with(root.path(), FakeBackend::fixed("first"), FakeBackend::fixed("s1"))
        .build()
        .unwrap();
    let second = config_with(root.path(), FakeBackend::fixed("second"), FakeBackend::fixed("s2"))
        .build()
        .unwrap();

    let a = run_workflow(vec![UploadedFile::new("a.png", png_bytes())], &first)
        .await
        .unwrap();
    let b = run_workflow(vec![UploadedFile::new("b.png", png_bytes())], &second)
        .await
        .unwrap();

    assert_ne!(a.run_id, b.run_id);
    assert_ne!(a.artifacts.dir, b.artifacts.dir);
    assert_eq!(std::fs::read_to_string(&a.artifacts.text).unwrap(), "first\n\n");
    assert_eq!(std::fs::read_to_string(&b.artifacts.text).unwrap(), "second\n\n");
    assert_eq!(dir_names(root.path()).len(), 2);
}

#[tokio::test]
async fn run_dir_holds_only_artifacts_by_default() {
    let root = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let config = config_with(root.path(), FakeBackend::fixed("t"), FakeBackend::fixed("s"))
        .scratch_root(scratch.path())
        .build()
        .unwrap();

    let output = run_workflow(vec![UploadedFile::new("a.png", png_bytes())], &config)
        .await
        .unwrap();

    assert_eq!(
        dir_names(&output.artifacts.dir),
        ["output.docx", "output.txt", "summary.txt"]
    );
    assert!(output.images[0].image_path.is_none());
    assert!(dir_names(scratch.path()).is_empty(), "{:?}", dir_names(scratch.path()));
}

#[tokio::test]
async fn scratch_is_emptied_after_a_file_fails_mid_way() {
    let root = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let config = config_with(root.path(), FakeBackend::fixed("t"), FakeBackend::fixed("s"))
        .scratch_root(scratch.path())
        .build()
        .unwrap();

    // Passes the magic check, so it is staged before rendering fails.
    let broken_pdf = UploadedFile::new("broken.pdf", b"%PDF-1.4\nnot really a pdf".to_vec());
    let output = run_workflow(
        vec![broken_pdf, UploadedFile::new("b.png", png_bytes())],
        &config,
    )
    .await
    .unwrap();

    assert_eq!(output.failed_files.len(), 1);
    assert_eq!(output.failed_files[0].file_name, "broken.pdf");
    assert!(dir_names(scratch.path()).is_empty(), "{:?}", dir_names(scratch.path()));
}

#[tokio::test]
async fn kept_upload_is_copied_under_pages() {
    let root = tempfile::tempdir().unwrap();
    let config = config_with(root.path(), FakeBackend::fixed("t"), FakeBackend::fixed("s"))
        .keep_page_images(true)
        .build()
        .unwrap();

    let output = run_workflow(vec![UploadedFile::new("Photo.PNG", png_bytes())], &config)
        .await
        .unwrap();

    let rel = output.images[0].image_path.clone().unwrap();
    assert_eq!(rel, PathBuf::from("pages").join("1").join("upload.png"));
    assert!(output.artifacts.dir.join(rel).is_file());
}

// ── File-level failures ──────────────────────────────────────────────────

#[tokio::test]
async fn bad_file_is_skipped_and_reported() {
    let root = tempfile::tempdir().unwrap();
    let extraction = FakeBackend::fixed("ok");
    let config = config_with(root.path(), extraction.clone(), FakeBackend::fixed("s"))
        .build()
        .unwrap();

    let files = vec![
        UploadedFile::new("notes.docx", b"PK\x03\x04".to_vec()),
        UploadedFile::new("fake.pdf", b"hello".to_vec()),
        UploadedFile::new("good.png", png_bytes()),
    ];
    let output = run_workflow(files, &config).await.unwrap();

    assert_eq!(extraction.calls(), 1);
    assert_eq!(output.full_text, "ok\n\n");
    assert_eq!(output.failed_files.len(), 2);
    assert_eq!(output.failed_files[0].file_name, "notes.docx");
    assert_eq!(output.failed_files[1].file_name, "fake.pdf");
    assert!(output.failed_files[1].reason.contains("not a valid PDF"));
    assert_eq!(output.stats.files_failed, 2);
}

#[tokio::test]
async fn all_files_failing_writes_nothing() {
    let root = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let extraction = FakeBackend::fixed("never");
    let config = config_with(root.path(), extraction.clone(), FakeBackend::fixed("s"))
        .scratch_root(scratch.path())
        .build()
        .unwrap();

    let files = vec![
        UploadedFile::new("x.gif", png_bytes()),
        UploadedFile::new("broken.pdf", b"%PDF-1.4\nnot really a pdf".to_vec()),
    ];
    let err = run_workflow(files, &config).await.unwrap_err();

    match err {
        HandscribeError::AllFilesFailed { total, first_error } => {
            assert_eq!(total, 2);
            assert!(first_error.starts_with("x.gif: Unsupported file type"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(extraction.calls(), 0);
    assert!(dir_names(root.path()).is_empty());
    assert!(dir_names(scratch.path()).is_empty());
}

#[tokio::test]
async fn all_files_failing_with_kept_pages_removes_run_dir() {
    let root = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let config = config_with(root.path(), FakeBackend::fixed("never"), FakeBackend::fixed("s"))
        .keep_page_images(true)
        .scratch_root(scratch.path())
        .build()
        .unwrap();

    let err = run_workflow(
        vec![UploadedFile::new("broken.pdf", b"%PDF-1.4\nnot really a pdf".to_vec())],
        &config,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, HandscribeError::AllFilesFailed { total: 1, .. }));
    assert!(dir_names(root.path()).is_empty());
    assert!(dir_names(scratch.path()).is_empty());
}

#[tokio::test]
async fn other_raster_format_behind_png_name_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let extraction = FakeBackend::fixed("ok");
    let config = config_with(root.path(), extraction.clone(), FakeBackend::fixed("s"))
        .build()
        .unwrap();

    let files = vec![
        UploadedFile::new("scan.png", b"GIF89a\x01\x00\x01\x00\x00\x00\x00;".to_vec()),
        UploadedFile::new("photo.jpg", png_bytes()),
        UploadedFile::new("good.png", png_bytes()),
    ];
    let output = run_workflow(files, &config).await.unwrap();

    assert_eq!(extraction.calls(), 1);
    let failed: Vec<_> = output.failed_files.iter().map(|f| f.file_name.as_str()).collect();
    assert_eq!(failed, ["scan.png", "photo.jpg"]);
    assert!(output.failed_files[0].reason.contains("not a readable PNG or JPEG"));
}

// ── Progress events ──────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl WorkflowProgressCallback for Recorder {
    fn on_workflow_start(&self, total_files: usize) {
        self.events.lock().unwrap().push(format!("start {total_files}"));
    }
    fn on_file_start(&self, file_index: usize, _total: usize, name: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("file {file_index} {name}"));
    }
    fn on_image_complete(&self, result: &ImageResult) {
        self.events
            .lock()
            .unwrap()
            .push(format!("image {} {}", result.label(), result.buffer_entry()));
    }
    fn on_file_error(&self, name: &str, _error: &str) {
        self.events.lock().unwrap().push(format!("error {name}"));
    }
    fn on_summary_complete(&self, summary: &SummaryResult) {
        self.events
            .lock()
            .unwrap()
            .push(format!("summary {}", summary.artifact_text()));
    }
    fn on_workflow_complete(&self, _artifacts: &RunArtifacts) {
        self.events.lock().unwrap().push("done".into());
    }
}

#[tokio::test]
async fn progress_events_arrive_in_processing_order() {
    let root = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let config = config_with(root.path(), FakeBackend::numbered(), FakeBackend::fixed("sum"))
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    let files = vec![
        UploadedFile::new("a.png", png_bytes()),
        UploadedFile::new("b.txt", b"plain".to_vec()),
        UploadedFile::new("c.png", png_bytes()),
    ];
    run_workflow(files, &config).await.unwrap();

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(
        events,
        [
            "start 3",
            "file 0 a.png",
            "image a.png reply-1",
            "file 1 b.txt",
            "error b.txt",
            "file 2 c.png",
            "image c.png reply-2",
            "summary sum",
            "done",
        ]
    );
}

// ── PDF (needs pdfium) ───────────────────────────────────────────────────

#[tokio::test]
async fn pdf_pages_are_rendered_and_extracted_in_order() {
    if !pdfium_available() {
        println!("SKIP — pdfium not available (set PDFIUM_LIB_PATH)");
        return;
    }

    let root = tempfile::tempdir().unwrap();
    let extraction = FakeBackend::numbered();
    let config = config_with(root.path(), extraction.clone(), FakeBackend::fixed("s"))
        .keep_page_images(true)
        .build()
        .unwrap();

    let output = run_workflow(vec![UploadedFile::new("scan.pdf", minimal_pdf(3))], &config)
        .await
        .unwrap();

    assert_eq!(extraction.calls(), 3);
    let labels: Vec<_> = output.images.iter().map(|i| i.label()).collect();
    assert_eq!(
        labels,
        ["scan.pdf — page 1", "scan.pdf — page 2", "scan.pdf — page 3"]
    );
    assert_eq!(output.full_text, "reply-1\n\nreply-2\n\nreply-3\n\n");

    let pages_dir = output.artifacts.dir.join("pages").join("1");
    assert_eq!(
        dir_names(&pages_dir),
        ["page_1.png", "page_2.png", "page_3.png"]
    );

    // 1 inch at 300 DPI.
    let page = image::open(pages_dir.join("page_1.png")).unwrap();
    assert!((299..=300).contains(&page.width()), "width {}", page.width());
}

#[tokio::test]
async fn pdf_scratch_pages_are_not_kept() {
    if !pdfium_available() {
        println!("SKIP — pdfium not available (set PDFIUM_LIB_PATH)");
        return;
    }

    let root = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let config = config_with(root.path(), FakeBackend::numbered(), FakeBackend::fixed("s"))
        .scratch_root(scratch.path())
        .build()
        .unwrap();

    let output = run_workflow(vec![UploadedFile::new("scan.pdf", minimal_pdf(2))], &config)
        .await
        .unwrap();

    assert_eq!(output.images.len(), 2);
    assert_eq!(
        dir_names(&output.artifacts.dir),
        ["output.docx", "output.txt", "summary.txt"]
    );
    assert!(dir_names(scratch.path()).is_empty());
}
