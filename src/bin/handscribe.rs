//! CLI binary for handscribe.
//!
//! A thin shim over the library crate: maps flags onto `WorkflowConfig`,
//! then either serves the upload form, runs one workflow in the terminal,
//! or dumps the sections of a generated document.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use handscribe::credentials::{default_secrets_path, load_api_credential};
use handscribe::server::{self, ServerConfig, DEFAULT_BIND};
use handscribe::{
    read_sections, run_workflow, ImageResult, ProgressCallback, RunArtifacts, SummaryResult,
    UploadedFile, WorkflowConfig, WorkflowOutput, WorkflowProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── Terminal progress ────────────────────────────────────────────────────

/// Prints each transcription above a progress bar the moment it arrives.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:36.green/238}] {pos:>3}/{len} images  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Reading");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl WorkflowProgressCallback for CliProgressCallback {
    fn on_file_start(&self, file_index: usize, total_files: usize, name: &str) {
        self.bar
            .set_message(format!("file {}/{}: {}", file_index + 1, total_files, name));
    }

    fn on_images_ready(&self, _name: &str, image_count: usize) {
        self.bar.inc_length(image_count as u64);
    }

    fn on_image_complete(&self, result: &ImageResult) {
        let (mark, text) = match result.outcome() {
            Ok(text) => (green("✓"), text.to_string()),
            Err(e) => (red("✗"), red(&e.to_string())),
        };
        self.bar.println(format!(
            "{} {}  {}\n{}\n",
            mark,
            bold(&result.label()),
            dim(&format!("{:.1}s", result.duration_ms as f64 / 1000.0)),
            text
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, name: &str, error: &str) {
        self.bar
            .println(format!("{} {}  {}", red("✗"), bold(name), red(error)));
    }

    fn on_summary_start(&self, _text_len: usize) {
        self.bar.set_prefix("Summarising");
        self.bar.set_message("");
    }

    fn on_summary_complete(&self, summary: &SummaryResult) {
        if let Err(e) = summary.outcome() {
            self.bar.println(red(&e.to_string()));
        }
    }

    fn on_workflow_complete(&self, _artifacts: &RunArtifacts) {
        self.bar.finish_and_clear();
    }
}

// ── Arguments ────────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Start the upload form on http://127.0.0.1:8501
  handscribe serve

  # Transcribe and summarise files in the terminal
  handscribe run notes.pdf whiteboard.jpg

  # Machine-readable result
  handscribe run --json scan.png > run.json

  # Print the sections of a generated document
  handscribe inspect-docx runs/<run-id>/output.docx

CREDENTIALS:
  The API key is read from .handscribe/secrets.toml (override with --secrets
  or HANDSCRIBE_SECRETS):

      OPENAI_API_KEY = "sk-..."

  and otherwise from the OPENAI_API_KEY environment variable.

ENVIRONMENT VARIABLES:
  EDGEQUAKE_LLM_PROVIDER  Provider for both calls (default: openai)
  PDFIUM_LIB_PATH         Path to libpdfium; otherwise ./ then the system path
  RUST_LOG                Overrides --verbose / --quiet log filtering
"#;

/// Transcribe handwritten PDFs and images, summarise them, export TXT/DOCX.
#[derive(Parser, Debug)]
#[command(
    name = "handscribe",
    version,
    about = "Transcribe handwritten PDFs and images with a vision LLM, then summarise",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the upload form and downloads.
    Serve {
        /// Listen address.
        #[arg(long, env = "HANDSCRIBE_BIND", default_value = DEFAULT_BIND)]
        bind: SocketAddr,

        /// Delete run directories older than this many seconds.
        #[arg(long, env = "HANDSCRIBE_ARTIFACT_TTL", default_value_t = 3600)]
        artifact_ttl: u64,

        /// Maximum request body in MiB.
        #[arg(long, env = "HANDSCRIBE_MAX_UPLOAD_MB", default_value_t = 100)]
        max_upload_mb: usize,
    },

    /// Run the workflow once over local files.
    Run {
        /// PDF, PNG, JPG or JPEG files, processed in the given order.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print the full result as JSON on stdout.
        #[arg(long)]
        json: bool,

        /// Disable the progress bar.
        #[arg(long, env = "HANDSCRIBE_NO_PROGRESS")]
        no_progress: bool,
    },

    /// Print the heading/body sections of a .docx document.
    InspectDocx {
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// LLM provider for both calls: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// Vision model that reads each image.
    #[arg(long, global = true, env = "HANDSCRIBE_EXTRACTION_MODEL", default_value = handscribe::config::DEFAULT_EXTRACTION_MODEL)]
    extraction_model: String,

    /// Text model that writes the summary.
    #[arg(long, global = true, env = "HANDSCRIBE_SUMMARY_MODEL", default_value = handscribe::config::DEFAULT_SUMMARY_MODEL)]
    summary_model: String,

    /// PDF rendering DPI (72–600).
    #[arg(long, global = true, env = "HANDSCRIBE_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Retries per remote call on transient failure.
    #[arg(long, global = true, env = "HANDSCRIBE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-attempt timeout of a remote call in seconds.
    #[arg(long, global = true, env = "HANDSCRIBE_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Root directory for per-run output directories.
    #[arg(long, global = true, env = "HANDSCRIBE_OUTPUT_DIR", default_value = "runs")]
    output_dir: PathBuf,

    /// Keep rendered pages and uploaded images next to the artifacts.
    #[arg(long, global = true, env = "HANDSCRIBE_KEEP_PAGES")]
    keep_pages: bool,

    /// Secret store holding OPENAI_API_KEY.
    #[arg(long, global = true, env = "HANDSCRIBE_SECRETS")]
    secrets: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "HANDSCRIBE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the final result.
    #[arg(short, long, global = true, env = "HANDSCRIBE_QUIET")]
    quiet: bool,
}

// ── Entry point ──────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Library INFO logs would tear the progress bar; the bar says enough.
    let show_progress = match cli.command {
        Command::Run {
            json, no_progress, ..
        } => !cli.common.quiet && !json && !no_progress,
        _ => false,
    };
    let filter = if cli.common.verbose {
        "debug"
    } else if cli.common.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // The key must be in the environment before worker threads exist.
    if !matches!(cli.command, Command::InspectDocx { .. }) {
        let secrets = cli
            .common
            .secrets
            .clone()
            .unwrap_or_else(default_secrets_path);
        load_api_credential(&secrets).context("Failed to load API credential")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(dispatch(cli, show_progress))
}

async fn dispatch(cli: Cli, show_progress: bool) -> Result<()> {
    match cli.command {
        Command::Serve {
            bind,
            artifact_ttl,
            max_upload_mb,
        } => {
            let config = ServerConfig {
                bind,
                artifact_ttl_secs: artifact_ttl,
                max_upload_bytes: max_upload_mb.saturating_mul(1024 * 1024),
                workflow: build_config(&cli.common, None)?,
            };
            cmd_serve(config).await
        }
        Command::Run { ref files, json, .. } => {
            let cli_progress = show_progress.then(CliProgressCallback::new);
            let bar = cli_progress.as_ref().map(|cb| cb.bar.clone());
            let progress: Option<ProgressCallback> =
                cli_progress.map(|cb| cb as Arc<dyn WorkflowProgressCallback>);
            let config = build_config(&cli.common, progress)?;
            cmd_run(files, json, cli.common.quiet, bar, &config).await
        }
        Command::InspectDocx { ref file } => cmd_inspect_docx(file),
    }
}

/// Map shared flags onto `WorkflowConfig`.
fn build_config(args: &CommonArgs, progress: Option<ProgressCallback>) -> Result<WorkflowConfig> {
    let mut builder = WorkflowConfig::builder()
        .extraction_model(&args.extraction_model)
        .summary_model(&args.summary_model)
        .dpi(args.dpi)
        .max_retries(args.max_retries)
        .api_timeout_secs(args.api_timeout)
        .output_root(&args.output_dir)
        .keep_page_images(args.keep_pages);

    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

// ── Commands ─────────────────────────────────────────────────────────────

async fn cmd_serve(config: ServerConfig) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    eprintln!("{} http://{}", green("Listening on"), config.bind);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    server::serve(listener, config, shutdown)
        .await
        .context("Server failed")
}

async fn read_and_run(paths: &[PathBuf], config: &WorkflowConfig) -> Result<WorkflowOutput> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(
            UploadedFile::from_path(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
        );
    }

    // Ctrl-C drops the workflow future; scratch files go with it.
    tokio::select! {
        result = run_workflow(files, config) => result.context("Run failed"),
        _ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("Cancelled")),
    }
}

async fn cmd_run(
    paths: &[PathBuf],
    json: bool,
    quiet: bool,
    bar: Option<ProgressBar>,
    config: &WorkflowConfig,
) -> Result<()> {
    let show_progress = bar.is_some();
    let output = match read_and_run(paths, config).await {
        Ok(output) => output,
        Err(e) => {
            // The completion callback never fires on this path.
            if let Some(bar) = bar {
                bar.finish_and_clear();
            }
            return Err(e);
        }
    };

    if json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    if !show_progress && !quiet {
        print!("{}", output.full_text);
    }
    for failure in &output.failed_files {
        eprintln!("{} {}: {}", red("✗"), failure.file_name, failure.reason);
    }

    println!("{}\n", bold("Summary"));
    println!("{}\n", output.summary.artifact_text());

    let a = &output.artifacts;
    eprintln!(
        "{}  {} images ({} failed)  {}ms  {} tokens in / {} out",
        if output.stats.images_failed == 0 && output.summary.error.is_none() {
            green("✔")
        } else {
            red("⚠")
        },
        output.stats.images_total,
        output.stats.images_failed,
        output.stats.total_duration_ms,
        output.stats.total_input_tokens,
        output.stats.total_output_tokens,
    );
    for path in [&a.text, &a.summary, &a.document] {
        eprintln!("   {}", path.display());
    }
    Ok(())
}

fn cmd_inspect_docx(file: &Path) -> Result<()> {
    let sections = read_sections(file)
        .with_context(|| format!("Failed to inspect {}", file.display()))?;
    for section in sections {
        println!("## {}\n", section.heading);
        println!("{}\n", section.body);
    }
    Ok(())
}
