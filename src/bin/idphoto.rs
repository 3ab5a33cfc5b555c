//! CLI binary for idphoto-pipeline.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ServiceConfig` / `ProcessingParams` and writes or prints results.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use idphoto_pipeline::{
    measure_dimensions, process_batch, resolve_image, write_atomic, BatchJob, ImageUpload,
    PhotoError, PhotoPipeline, PipelineProgressCallback, ProcessingOutput, ProcessingParams,
    ProgressCallback, ServiceConfig, Stage, ONLY_CHANGE_BACKGROUND,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Spinner plus one log line per finished stage. Stages of concurrent batch
/// jobs interleave freely; every line is self-contained.
struct CliProgressCallback {
    bar: ProgressBar,
    retries: AtomicUsize,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Processing");
        bar.set_message("Preparing upload…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            retries: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_message(format!("/{stage}"));
    }

    fn on_retry(&self, stage: Stage, attempt: u32, delay_ms: u64) {
        self.retries.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} /{:<15} retry #{} in {}",
            cyan("↻"),
            stage,
            attempt,
            dim(&format!("{delay_ms}ms")),
        ));
    }

    fn on_stage_complete(&self, stage: Stage, attempts: u32, duration_ms: u64) {
        self.bar.println(format!(
            "  {} /{:<15} {}  {}",
            green("✓"),
            stage,
            dim(&format!("{attempts} attempt(s)")),
            dim(&format!("{:.1}s", duration_ms as f64 / 1000.0)),
        ));
    }

    fn on_stage_error(&self, stage: Stage, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Keep output tidy on long service bodies.
        let msg = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} /{:<15} {}", red("✗"), stage, red(&msg)));
    }
}

const AFTER_HELP: &str = r##"EXAMPLES:
  # Full crop to the default 295x413 size, white background
  idphoto portrait.jpg --background-color '#FFFFFF' -o id.png

  # Keep the framing, only replace the background
  idphoto portrait.jpg --size-type 'only change background' --background-color '#438EDB' -o id.png

  # Raw options as sent by a web client
  idphoto portrait.jpg --params '{"renderMode":1,"backgroundColor":"#FF0000","width":358,"height":441}'

  # Several photos at once into a directory
  idphoto a.jpg b.jpg c.jpg -o out/ --concurrency 3

  # Print the pixel size only (no service call)
  idphoto --measure-only portrait.jpg

OPTIONS PRECEDENCE:
  --params / --params-file are applied first; the dedicated flags
  (--size-type, --background-color, --render-mode, --width, --height, --dpi)
  override matching keys.

ENVIRONMENT VARIABLES:
  AI_SERVICE_URL          Host of the AI service (default 127.0.0.1)
  AI_SERVICE_PORT         Port of the AI service (default 8080)
  IDPHOTO_TIMEOUT_SECS    Per-request timeout in seconds (default 60)
  IDPHOTO_MAX_RETRIES     Retries on network errors and timeouts (default 2)
  RUST_LOG                Overrides the log filter
"##;

/// Turn portraits into ID photos using a remote AI service.
#[derive(Parser, Debug)]
#[command(
    name = "idphoto",
    version,
    about = "Turn portraits into ID photos using a remote AI service",
    long_about = "Send a portrait (local file or URL) through the AI service: either a full \
face-detect/crop/matting pass or a background-only matting pass, followed by background \
composition. Network errors and timeouts are retried with exponential back-off.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local image paths or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Output file (one input) or directory (several inputs).
    #[arg(short, long, env = "IDPHOTO_OUTPUT")]
    output: Option<PathBuf>,

    /// Raw option object as JSON, using the web client's key names.
    #[arg(long, conflicts_with = "params_file")]
    params: Option<String>,

    /// Read the raw option object from a JSON file.
    #[arg(long)]
    params_file: Option<PathBuf>,

    /// Size preset; "only change background" keeps the original framing.
    #[arg(long)]
    size_type: Option<String>,

    /// Background colour, e.g. '#FFFFFF'.
    #[arg(long)]
    background_color: Option<String>,

    /// Background render mode: 0 solid, 1 top-down gradient, 2 centre gradient.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=2))]
    render_mode: Option<u8>,

    /// Target width in pixels.
    #[arg(long)]
    width: Option<u32>,

    /// Target height in pixels.
    #[arg(long)]
    height: Option<u32>,

    /// Output DPI.
    #[arg(long)]
    dpi: Option<u32>,

    /// AI service host.
    #[arg(long, env = "AI_SERVICE_URL", default_value = "127.0.0.1")]
    host: String,

    /// AI service port.
    #[arg(long, env = "AI_SERVICE_PORT", default_value_t = 8080)]
    port: u16,

    /// Per-request timeout in seconds.
    #[arg(long, env = "IDPHOTO_TIMEOUT_SECS", default_value_t = 60)]
    timeout: u64,

    /// Retries per request on network errors and timeouts.
    #[arg(long, env = "IDPHOTO_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Photos processed at once when several inputs are given.
    #[arg(short, long, env = "IDPHOTO_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Print the full result (JSON) instead of writing an image.
    #[arg(long)]
    json: bool,

    /// Print image dimensions only, no service call.
    #[arg(long)]
    measure_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "IDPHOTO_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "IDPHOTO_QUIET")]
    quiet: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "IDPHOTO_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO-level library logs; verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.measure_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    // ── Load inputs ──────────────────────────────────────────────────────
    let mut uploads = Vec::with_capacity(cli.inputs.len());
    for input in &cli.inputs {
        let upload = resolve_image(input, cli.timeout)
            .await
            .with_context(|| format!("Failed to load '{input}'"))?;
        uploads.push(upload);
    }

    // ── Measure-only mode ────────────────────────────────────────────────
    if cli.measure_only {
        for (input, upload) in cli.inputs.iter().zip(&uploads) {
            let dims = measure_dimensions(&upload.bytes)
                .with_context(|| format!("Failed to measure '{input}'"))?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "input": input,
                        "mime_type": upload.mime_type,
                        "width": dims.width,
                        "height": dims.height,
                    })
                );
            } else {
                println!("{input}: {}x{} ({})", dims.width, dims.height, upload.mime_type);
            }
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(&cli, progress.clone().map(|cb| cb as ProgressCallback))?;
    let params = build_params(&cli).await?;
    let pipeline = PhotoPipeline::new(config);

    // ── Run ──────────────────────────────────────────────────────────────
    let outcome = if uploads.len() == 1 {
        run_single(&cli, &pipeline, &uploads[0], &params).await
    } else {
        run_batch(&cli, &pipeline, uploads, &params).await
    };

    if let Some(cb) = &progress {
        cb.finish();
    }
    outcome
}

async fn run_single(
    cli: &Cli,
    pipeline: &PhotoPipeline,
    upload: &ImageUpload,
    params: &ProcessingParams,
) -> Result<()> {
    let output = if let Some(path) = cli.output.as_deref().filter(|_| !cli.json) {
        let out = pipeline
            .process_to_file(upload, params, path)
            .await
            .context("Processing failed")?;
        if !cli.quiet {
            print_summary(&out, Some(path));
        }
        out
    } else {
        let out = pipeline
            .process(upload, params)
            .await
            .context("Processing failed")?;
        if !cli.json && !cli.quiet {
            print_summary(&out, None);
        }
        out
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if cli.output.is_none() {
        // No destination: hand the caller the composed image as-is.
        if let Some(image) = output
            .result
            .image_base64
            .as_deref()
            .or(output.result.image_base64_hd.as_deref())
        {
            println!("{image}");
        }
    }
    Ok(())
}

async fn run_batch(
    cli: &Cli,
    pipeline: &PhotoPipeline,
    uploads: Vec<ImageUpload>,
    params: &ProcessingParams,
) -> Result<()> {
    let out_dir = cli.output.clone().unwrap_or_else(|| PathBuf::from("."));
    if !cli.json {
        tokio::fs::create_dir_all(&out_dir)
            .await
            .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;
    }

    let jobs: Vec<BatchJob> = uploads
        .into_iter()
        .map(|image| BatchJob {
            image,
            params: params.clone(),
        })
        .collect();
    let total = jobs.len();
    let mut results = process_batch(pipeline, jobs, cli.concurrency);
    let mut failed = 0usize;

    while let Some(item) = results.next().await {
        match item.outcome {
            Ok(out) => {
                if cli.json {
                    let line = serde_json::json!({
                        "index": item.index,
                        "filename": item.filename,
                        "output": out,
                    });
                    println!("{line}");
                    continue;
                }
                match save_result(&out_dir, item.index, &item.filename, &out).await {
                    Ok(target) => {
                        if !cli.quiet {
                            print_summary(&out, Some(&target));
                        }
                    }
                    Err(e) => {
                        failed += 1;
                        eprintln!("{} {}: {}", red("✘"), item.filename, e);
                    }
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("{} {}: {}", red("✘"), item.filename, e);
            }
        }
    }

    if !cli.quiet {
        eprintln!(
            "{} {}/{} photos processed",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&(total - failed).to_string()),
            total
        );
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {total} photos failed");
    }
    Ok(())
}

fn print_summary(output: &ProcessingOutput, path: Option<&Path>) {
    let target = path
        .map(|p| format!("  →  {}", bold(&p.display().to_string())))
        .unwrap_or_default();
    eprintln!(
        "{}  {}  {} attempt(s)  {}ms{}",
        green("✔"),
        output.workflow,
        output.stats.total_attempts(),
        output.stats.total_duration_ms,
        target,
    );
}

/// Job 3 of `portrait.jpg` → `portrait_3_idphoto.png`. The job index keeps
/// `a.jpg` / `a.png` or same-named URLs from overwriting each other.
fn output_name(index: usize, filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "photo".to_string());
    format!("{stem}_{index}_idphoto.png")
}

/// Decode one batch result and write it atomically under `out_dir`.
async fn save_result(
    out_dir: &Path,
    index: usize,
    filename: &str,
    output: &ProcessingOutput,
) -> std::result::Result<PathBuf, PhotoError> {
    let target = out_dir.join(output_name(index, filename));
    let bytes = output.result.decode_image()?;
    write_atomic(&target, &bytes).await?;
    Ok(target)
}

/// Map CLI args to `ServiceConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ServiceConfig> {
    let mut builder = ServiceConfig::builder()
        .host(cli.host.clone())
        .port(cli.port)
        .timeout(Duration::from_secs(cli.timeout))
        .max_retries(cli.max_retries);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Raw options first, then the dedicated flags on top.
async fn build_params(cli: &Cli) -> Result<ProcessingParams> {
    let mut params = if let Some(ref raw) = cli.params {
        ProcessingParams::from_json(raw).context("Invalid --params")?
    } else if let Some(ref path) = cli.params_file {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read params from {:?}", path))?;
        ProcessingParams::from_json(&raw).context("Invalid --params-file")?
    } else {
        ProcessingParams::new()
    };

    if let Some(ref size_type) = cli.size_type {
        let value = if size_type.eq_ignore_ascii_case(ONLY_CHANGE_BACKGROUND) {
            ONLY_CHANGE_BACKGROUND.to_string()
        } else {
            size_type.clone()
        };
        params.insert("sizeType", value);
    }
    if let Some(ref color) = cli.background_color {
        params.insert("backgroundColor", color.clone());
    }
    if let Some(mode) = cli.render_mode {
        params.insert("renderMode", mode);
    }
    if let Some(width) = cli.width {
        params.insert("width", width);
    }
    if let Some(height) = cli.height {
        params.insert("height", height);
    }
    if let Some(dpi) = cli.dpi {
        params.insert("dpi", dpi);
    }

    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use idphoto_pipeline::{ProcessingResult, ProcessingStats, Workflow};
    use serde_json::Map;

    fn output_with(image_base64: &str) -> ProcessingOutput {
        ProcessingOutput {
            result: ProcessingResult {
                status: Some(true),
                image_base64: Some(image_base64.to_string()),
                image_base64_hd: None,
                extra: Map::new(),
            },
            workflow: Workflow::FullCrop,
            stats: ProcessingStats::default(),
        }
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
        assert!(AFTER_HELP.contains(r##""backgroundColor":"#FF0000""##));
        assert!(AFTER_HELP.trim_end().ends_with("Overrides the log filter"));
    }

    #[test]
    fn output_names_never_collide() {
        assert_eq!(output_name(0, "a.jpg"), "a_0_idphoto.png");
        assert_ne!(output_name(0, "a.jpg"), output_name(1, "a.png"));
        assert_ne!(output_name(2, "photo.jpg"), output_name(3, "photo.jpg"));
        assert_eq!(output_name(4, ""), "photo_4_idphoto.png");
    }

    #[tokio::test]
    async fn save_result_writes_decoded_image() {
        let dir = tempfile::tempdir().unwrap();
        let target = save_result(dir.path(), 1, "me.jpg", &output_with("aGk="))
            .await
            .unwrap();

        assert_eq!(target, dir.path().join("me_1_idphoto.png"));
        assert_eq!(std::fs::read(&target).unwrap(), b"hi");
    }

    #[tokio::test]
    async fn save_result_reports_bad_image_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_result(dir.path(), 0, "me.jpg", &output_with("@@not base64@@"))
            .await
            .unwrap_err();

        assert!(matches!(err, PhotoError::ResultDecode { .. }), "got {err:?}");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
