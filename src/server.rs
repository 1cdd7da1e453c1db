//! Browser front end: upload form, results page and artifact downloads.
//!
//! Every POST to `/process` runs one workflow into its own
//! `<output_root>/<run_id>/` directory, so concurrent users never see each
//! other's files. Downloads are addressed by run ID. A background sweeper
//! deletes run directories older than `artifact_ttl_secs`.

use crate::config::WorkflowConfig;
use crate::error::HandscribeError;
use crate::output::{ImageResult, SummaryResult, WorkflowOutput};
use crate::pipeline::assemble::{ARTIFACT_NAMES, DOCUMENT_ARTIFACT};
use crate::pipeline::stage::{FileKind, UploadedFile};
use crate::workflow::{run_workflow, PAGES_DIR};
use axum::extract::{DefaultBodyLimit, Multipart, Path as AxumPath, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:8501";

/// Settings for the web front end.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Run directories older than this are deleted. Default: 3600.
    pub artifact_ttl_secs: u64,
    /// Request body cap, multipart overhead included. Default: 100 MiB.
    pub max_upload_bytes: usize,
    pub workflow: WorkflowConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8501)),
            artifact_ttl_secs: 3600,
            max_upload_bytes: 100 * 1024 * 1024,
            workflow: WorkflowConfig::default(),
        }
    }
}

struct AppState {
    workflow: WorkflowConfig,
}

/// Build the application router.
pub fn router(config: &ServerConfig) -> Router {
    let state = Arc::new(AppState {
        workflow: config.workflow.clone(),
    });

    Router::new()
        .route("/", get(upload_page))
        .route("/process", post(process))
        .route("/runs/:run_id/:artifact", get(download_artifact))
        .route("/runs/:run_id/pages/:file_no/:image", get(page_image))
        .route("/health", get(|| async { "ok" }))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    config: ServerConfig,
    shutdown: F,
) -> Result<(), HandscribeError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .map_err(|e| HandscribeError::Internal(format!("listener address: {}", e)))?;
    let app = router(&config);

    let sweeper = tokio::spawn(sweep_loop(
        config.workflow.output_root.clone(),
        Duration::from_secs(config.artifact_ttl_secs),
    ));

    info!(addr = %addr, root = %config.workflow.output_root.display(), "handscribe server started");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| HandscribeError::Internal(format!("server error: {}", e)));

    sweeper.abort();
    info!("handscribe server stopped");
    result
}

// ── Run-directory sweeper ────────────────────────────────────────────────

async fn sweep_loop(root: std::path::PathBuf, ttl: Duration) {
    let period = ttl.min(Duration::from_secs(60)).max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let removed = sweep_expired_runs(&root, ttl).await;
        if removed > 0 {
            info!("Removed {} expired run dir(s)", removed);
        }
    }
}

/// Delete run directories under `root` last modified more than `ttl` ago.
///
/// Only directories named by a UUID are considered. Returns how many were
/// removed.
pub async fn sweep_expired_runs(root: &Path, ttl: Duration) -> usize {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let now = SystemTime::now();
    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let is_run = name
            .to_str()
            .map(|n| Uuid::parse_str(n).is_ok())
            .unwrap_or(false);
        if !is_run {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_dir() {
            continue;
        }
        let age = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if age < ttl {
            continue;
        }
        match tokio::fs::remove_dir_all(entry.path()).await {
            Ok(()) => {
                debug!("Swept {}", entry.path().display());
                removed += 1;
            }
            Err(e) => warn!("Could not remove {}: {}", entry.path().display(), e),
        }
    }
    removed
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn upload_page() -> Html<String> {
    Html(page("Handwritten Notes → Text", UPLOAD_FORM))
}

/// Runs the workflow inside the request. If the client goes away the
/// connection task drops this future, which cancels the run.
async fn process(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    let mut files = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("Malformed upload: {e}");
                return error_page(StatusCode::BAD_REQUEST, &format!("Malformed upload: {e}"));
            }
        };
        if field.name() != Some("files") {
            continue;
        }
        let name = sanitize_filename(field.file_name().unwrap_or(""));
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read upload bytes: {e}");
                return error_page(StatusCode::BAD_REQUEST, "Failed to read file data.");
            }
        };
        // An empty file input still submits one nameless, empty part.
        if bytes.is_empty() {
            continue;
        }
        files.push(UploadedFile::new(name, bytes.to_vec()));
    }

    if files.is_empty() {
        return error_page(StatusCode::BAD_REQUEST, "Please choose at least one file.");
    }
    if files.iter().all(|f| FileKind::from_name(&f.name).is_none()) {
        return error_page(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Only PDF, PNG, JPG and JPEG files are supported.",
        );
    }

    match run_workflow(files, &state.workflow).await {
        Ok(output) => Html(render_results(&output)).into_response(),
        Err(e @ HandscribeError::NoFiles) => error_page(StatusCode::BAD_REQUEST, &e.to_string()),
        Err(e @ HandscribeError::AllFilesFailed { .. }) => {
            error_page(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string())
        }
        Err(e) => {
            warn!("Run failed: {e}");
            error_page(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

async fn download_artifact(
    State(state): State<Arc<AppState>>,
    AxumPath((run_id, artifact)): AxumPath<(String, String)>,
) -> Response {
    let Ok(run_id) = Uuid::parse_str(&run_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !ARTIFACT_NAMES.contains(&artifact.as_str()) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let path = state
        .workflow
        .output_root
        .join(run_id.to_string())
        .join(&artifact);
    let content_type = if artifact == DOCUMENT_ARTIFACT {
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
    } else {
        "text/plain; charset=utf-8"
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, content_type.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", artifact),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn page_image(
    State(state): State<Arc<AppState>>,
    AxumPath((run_id, file_no, image)): AxumPath<(String, usize, String)>,
) -> Response {
    let Ok(run_id) = Uuid::parse_str(&run_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !is_plain_file_name(&image) {
        return StatusCode::NOT_FOUND.into_response();
    }
    let Some(kind) = FileKind::from_name(&image).filter(|k| !k.is_pdf()) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let path = state
        .workflow
        .output_root
        .join(run_id.to_string())
        .join(PAGES_DIR)
        .join(file_no.to_string())
        .join(&image);

    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, kind.mime_type())], bytes).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

// ── HTML ─────────────────────────────────────────────────────────────────

const STYLE: &str = r#"
body { font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", sans-serif; max-width: 860px; margin: 2rem auto; padding: 0 1rem; color: #222; }
h1 { font-size: 1.6rem; }
.block { border: 1px solid #ddd; border-radius: 8px; padding: 1rem; margin: 1rem 0; }
.block img { max-width: 100%; border: 1px solid #eee; margin-bottom: .5rem; }
textarea { width: 100%; min-height: 12rem; font-family: inherit; }
.badge { display: inline-block; padding: .1rem .5rem; border-radius: 4px; font-size: .8rem; font-weight: 600; margin-left: .5rem; }
.ok { background: #d4edda; color: #155724; }
.failed { background: #f8d7da; color: #721c24; }
.downloads a { display: inline-block; margin-right: .75rem; padding: .5rem 1rem; background: #0366d6; color: #fff; border-radius: 6px; text-decoration: none; }
.error { color: #721c24; }
"#;

const UPLOAD_FORM: &str = r#"<h1>Handwritten Notes → Text</h1>
<p>Upload handwritten PDFs or images to extract the text and get a summary.</p>
<form action="/process" method="post" enctype="multipart/form-data">
  <input type="file" name="files" multiple accept=".pdf,.png,.jpg,.jpeg">
  <button type="submit">Transcribe</button>
</form>"#;

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
<title>{}</title><style>{}</style></head><body>{}</body></html>",
        escape_html(title),
        STYLE,
        body
    )
}

fn error_page(status: StatusCode, message: &str) -> Response {
    let body = format!(
        "<h1>Something went wrong</h1><p class=\"error\">{}</p><p><a href=\"/\">Back</a></p>",
        escape_html(message).replace('\n', "<br>")
    );
    (status, Html(page("Error", &body))).into_response()
}

fn badge(ok: bool) -> &'static str {
    if ok {
        r#"<span class="badge ok">ok</span>"#
    } else {
        r#"<span class="badge failed">failed</span>"#
    }
}

fn render_image_block(run_id: Uuid, result: &ImageResult) -> String {
    let mut html = format!(
        "<div class=\"block\"><h3>{}{}</h3>",
        escape_html(&result.label()),
        badge(result.outcome().is_ok())
    );
    if let Some(ref rel) = result.image_path {
        let url_path: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().to_string()),
                _ => None,
            })
            .collect();
        html.push_str(&format!(
            "<img src=\"/runs/{}/{}\" alt=\"{}\">",
            run_id,
            url_path.join("/"),
            escape_html(&result.label())
        ));
    }
    html.push_str(&format!(
        "<textarea readonly>{}</textarea></div>",
        escape_html(&result.buffer_entry())
    ));
    html
}

fn render_summary_block(summary: &SummaryResult) -> String {
    format!(
        "<div class=\"block\"><h2>Summary{}</h2><textarea readonly>{}</textarea></div>",
        badge(summary.outcome().is_ok()),
        escape_html(&summary.artifact_text())
    )
}

fn render_results(output: &WorkflowOutput) -> String {
    let mut body = String::from("<h1>Extracted Text</h1>");

    for result in &output.images {
        body.push_str(&render_image_block(output.run_id, result));
    }

    if !output.failed_files.is_empty() {
        body.push_str("<div class=\"block\"><h2>Files that could not be processed</h2><ul>");
        for failure in &output.failed_files {
            body.push_str(&format!(
                "<li><strong>{}</strong>{}: {}</li>",
                escape_html(&failure.file_name),
                badge(false),
                escape_html(&failure.reason)
            ));
        }
        body.push_str("</ul></div>");
    }

    body.push_str(&render_summary_block(&output.summary));

    body.push_str("<div class=\"downloads\">");
    for (artifact, label) in ARTIFACT_NAMES
        .iter()
        .zip(["Download Text", "Download Summary", "Download Word"])
    {
        body.push_str(&format!(
            "<a href=\"/runs/{}/{}\" download>{}</a>",
            output.run_id, artifact, label
        ));
    }
    body.push_str("</div><p><a href=\"/\">Process more files</a></p>");

    page("Results", &body)
}

/// Escape text for HTML element and attribute content.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Reduce a client-supplied name to a safe base name.
///
/// Directory parts are dropped, characters outside `[A-Za-z0-9._-]` become
/// `_`, and the extension is kept so the file type can still be detected.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let sanitized: String = base
        .chars()
        .filter(|&c| c != '\0')
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = sanitized.replace("..", "");
    // Keep the tail so a long name keeps its extension.
    let len = sanitized.chars().count();
    let sanitized: String = sanitized.chars().skip(len.saturating_sub(100)).collect();

    if sanitized.is_empty() || sanitized.starts_with('.') {
        format!("upload{}", sanitized)
    } else {
        sanitized
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && sanitize_filename(name) == name
}
