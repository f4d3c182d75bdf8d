//! CLI binary for finsight.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints the run summary.

use anyhow::{Context, Result};
use clap::Parser;
use finsight::{
    Backoff, Orchestrator, PipelineConfig, PipelineProgressCallback, ProgressCallback, RunReport,
    Stage, StagePolicy, StageStatus,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
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

const TICKS: [&str; 11] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar over the documents of the batch, one log line
/// per finished stage and per failed chunk.
struct CliProgressCallback {
    bar: ProgressBar,
    chunk_errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Scanning input directory…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            chunk_errors: AtomicUsize::new(0),
        })
    }

    /// Switch to the full progress-bar style once the document count is known.
    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} reports  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Analysing");
        self.bar.reset_eta();
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_documents: usize) {
        self.activate_bar(total_documents);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_documents} annual reports…"))
        ));
    }

    fn on_document_start(&self, company: &str, _index: usize, _total: usize) {
        self.bar.set_message(company.to_string());
    }

    fn on_stage_complete(&self, company: &str, stage: Stage, status: StageStatus) {
        let mark = match status {
            StageStatus::Failed => red("✗"),
            _ => green("✓"),
        };
        self.bar.println(format!(
            "  {mark} {:<24} {}",
            company,
            dim(stage.as_str())
        ));
    }

    fn on_chunk_complete(&self, company: &str, chunk: usize, total_chunks: usize) {
        self.bar
            .set_message(format!("{company}  chunk {}/{total_chunks}", chunk + 1));
    }

    fn on_chunk_error(&self, company: &str, chunk: usize, total_chunks: usize, error: &str) {
        self.chunk_errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg = if error.chars().count() > 80 {
            let head: String = error.chars().take(79).collect();
            format!("{head}\u{2026}")
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:<24} chunk {}/{}  {}",
            red("✗"),
            company,
            chunk + 1,
            total_chunks,
            red(&msg),
        ));
    }

    fn on_document_complete(&self, _company: &str, _statements: usize) {
        self.bar.inc(1);
    }

    fn on_run_complete(&self, documents: usize, rows: usize) {
        self.bar.finish_and_clear();
        let failed = self.chunk_errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} reports analysed, {} rows",
                green("✔"),
                bold(&documents.to_string()),
                bold(&rows.to_string())
            );
        } else {
            eprintln!(
                "{} {} reports analysed, {} rows  ({} chunks failed)",
                cyan("⚠"),
                bold(&documents.to_string()),
                bold(&rows.to_string()),
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyse every report in data/raw_pdfs, artifacts and CSV under data/
  finsight

  # Custom directories
  finsight --input-dir reports/ --work-dir out/ -o out/insights.csv

  # Cheap model first, a stronger one for chunks it gives up on
  finsight --model gpt-4o-mini --fallback-model gpt-4o

  # Re-run only the LLM extraction and everything after it
  finsight --rerun insights

  # Score with a FinBERT endpoint instead of the built-in lexicon
  finsight --sentiment-endpoint http://localhost:8080

  # Skip sentiment entirely (rows get Neutral / 0.0)
  finsight --disable sentiment

  # Machine-readable run report
  finsight --json > run.json

RESUMING:
  Every stage writes its result under the work directory. A second run
  reuses whatever exists, so an interrupted batch continues where it
  stopped and already-answered LLM chunks are never paid for twice.
  Chunks that failed are retried on the next run. Use --force to start
  over, or --rerun <stage> to recompute one stage and its dependents.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  HF_TOKEN                Bearer token for the sentiment endpoint
  PDFIUM_LIB_PATH         Path to an existing libpdfium, skips auto-download
  PDFIUM_AUTO_CACHE_DIR   Override the default pdfium cache directory
"#;

/// Extract categorised, sentiment-scored statements from annual-report PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "finsight",
    version,
    about = "Extract categorised, sentiment-scored statements from annual-report PDFs",
    long_about = "Read a directory of company annual reports, extract positive, negative, \
guidance and risk statements with an LLM, score each statement's sentiment and write one \
CSV dataset. Intermediate results are persisted so interrupted runs resume.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory of report PDFs, one per company.
    #[arg(long, env = "FINSIGHT_INPUT_DIR", default_value = "data/raw_pdfs")]
    input_dir: PathBuf,

    /// Directory for intermediate artifacts and the manifest.
    #[arg(long, env = "FINSIGHT_WORK_DIR", default_value = "data")]
    work_dir: PathBuf,

    /// CSV dataset path. Default: <work-dir>/unified_financial_insights.csv.
    #[arg(short, long, env = "FINSIGHT_OUTPUT")]
    output: Option<PathBuf>,

    /// Chunk length in characters.
    #[arg(long, env = "FINSIGHT_CHUNK_SIZE", default_value_t = 12_000)]
    chunk_size: usize,

    /// Characters shared by consecutive chunks (must be < chunk size).
    #[arg(long, env = "FINSIGHT_CHUNK_OVERLAP", default_value_t = 500)]
    chunk_overlap: usize,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4o-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Model tried when --model gives up on a chunk (repeatable, in order).
    #[arg(
        long = "fallback-model",
        value_name = "MODEL",
        env = "FINSIGHT_FALLBACK_MODELS",
        value_delimiter = ','
    )]
    fallback_models: Vec<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "FINSIGHT_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Max LLM output tokens per chunk.
    #[arg(long, env = "FINSIGHT_MAX_TOKENS", default_value_t = 2048)]
    max_tokens: usize,

    /// LLM calls allowed per chunk, first try included.
    #[arg(long, env = "FINSIGHT_MAX_ATTEMPTS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    #[arg(long, env = "FINSIGHT_RETRY_DELAY_MS", default_value_t = 1_000)]
    retry_delay_ms: u64,

    /// Longest delay between retries, in milliseconds.
    #[arg(long, env = "FINSIGHT_MAX_DELAY_MS", default_value_t = 30_000)]
    max_delay_ms: u64,

    /// Wait the same --retry-delay-ms before every retry instead of doubling it.
    #[arg(long, env = "FINSIGHT_FIXED_BACKOFF")]
    fixed_backoff: bool,

    /// Path to a text file containing a custom extraction system prompt.
    #[arg(long, env = "FINSIGHT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// PDF user password for encrypted reports.
    #[arg(long, env = "FINSIGHT_PASSWORD")]
    password: Option<String>,

    /// Sentiment model served by --sentiment-endpoint.
    #[arg(long, env = "FINSIGHT_SENTIMENT_MODEL", default_value = "ProsusAI/finbert")]
    sentiment_model: String,

    /// Text-classification endpoint. Without it the offline lexicon is used.
    #[arg(long, env = "FINSIGHT_SENTIMENT_ENDPOINT")]
    sentiment_endpoint: Option<String>,

    /// Seconds to wait for each --sentiment-endpoint request.
    #[arg(long, env = "FINSIGHT_SENTIMENT_TIMEOUT", default_value_t = 30,
          value_parser = clap::value_parser!(u64).range(1..))]
    sentiment_timeout: u64,

    /// Statements are truncated to this many characters before scoring.
    #[arg(long, env = "FINSIGHT_MAX_STATEMENT_CHARS", default_value_t = 2000)]
    max_statement_chars: usize,

    /// Recompute every stage, ignoring existing artifacts.
    #[arg(long, env = "FINSIGHT_FORCE")]
    force: bool,

    /// Recompute this stage (and everything after it) even if its artifact exists.
    #[arg(long, value_name = "STAGE", value_parser = parse_stage)]
    rerun: Vec<Stage>,

    /// Do not run this stage; existing artifacts are still used.
    #[arg(long, value_name = "STAGE", value_parser = parse_stage)]
    disable: Vec<Stage>,

    /// Keep repeated statements instead of collapsing them.
    #[arg(long, env = "FINSIGHT_NO_DEDUPE")]
    no_dedupe: bool,

    /// Print the run report as JSON on stdout.
    #[arg(long, env = "FINSIGHT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "FINSIGHT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FINSIGHT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "FINSIGHT_QUIET")]
    quiet: bool,
}

fn parse_stage(s: &str) -> Result<Stage, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Ensure PDFium engine is available ────────────────────────────────
    // Only the text stage needs it; runs resumed from text artifacts do not.
    let needs_pdfium = !cli.disable.contains(&Stage::Text);
    if needs_pdfium && !pdfium_auto::is_pdfium_cached() {
        if show_progress {
            let dl_bar = ProgressBar::new(0);
            dl_bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.cyan} {prefix:.bold}  \
                     [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ")
                .tick_strings(&TICKS),
            );
            dl_bar.set_prefix("PDF engine");
            dl_bar.enable_steady_tick(Duration::from_millis(80));

            let bar = dl_bar.clone();
            tokio::task::block_in_place(|| {
                pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
                    if let Some(t) = total {
                        if bar.length().unwrap_or(0) != t {
                            bar.set_length(t);
                        }
                    }
                    bar.set_position(downloaded);
                }))
            })
            .context("Failed to download PDFium engine")?;

            dl_bar.finish_with_message("ready ✓");
        } else {
            tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
                .context("Failed to download PDFium engine")?;
        }
    }

    // ── Build config and run ─────────────────────────────────────────────
    let config = build_config(&cli).await?;
    let mut orchestrator =
        Orchestrator::from_config(config).context("Failed to set up the pipeline")?;
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        orchestrator = orchestrator.with_progress(cb);
    }

    let report = orchestrator.run().await.context("Run failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet {
        print_summary(&report);
    }

    Ok(())
}

fn print_summary(report: &RunReport) {
    let s = &report.stats;
    for doc in report.documents.iter().filter(|d| d.is_degraded()) {
        eprintln!(
            "   {} {}  {}",
            cyan("⚠"),
            doc.company,
            dim(&format!(
                "{} error(s), {} defaulted score(s)",
                doc.errors.len(),
                doc.defaulted_sentiments
            )),
        );
    }
    eprintln!(
        "{}  {} reports  {} rows  {}ms  →  {}",
        if s.failed_chunks == 0 && s.skipped_documents == 0 {
            green("✔")
        } else {
            cyan("⚠")
        },
        s.documents - s.skipped_documents,
        s.rows,
        s.duration_ms,
        bold(&report.output_file.display().to_string()),
    );
    eprintln!(
        "   {} tokens in  /  {} tokens out",
        dim(&s.total_input_tokens.to_string()),
        dim(&s.total_output_tokens.to_string()),
    );
}

/// Map CLI flags onto a validated `PipelineConfig`.
async fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let backoff = if cli.fixed_backoff {
        Backoff::Fixed {
            delay_ms: cli.retry_delay_ms,
        }
    } else {
        Backoff::Exponential {
            base_ms: cli.retry_delay_ms,
            max_ms: cli.max_delay_ms.max(cli.retry_delay_ms),
        }
    };

    let mut builder = PipelineConfig::builder()
        .input_dir(&cli.input_dir)
        .work_dir(&cli.work_dir)
        .chunk_size(cli.chunk_size)
        .chunk_overlap(cli.chunk_overlap)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .max_attempts(cli.max_attempts)
        .backoff(backoff)
        .sentiment_model(&cli.sentiment_model)
        .sentiment_timeout_secs(cli.sentiment_timeout)
        .max_statement_chars(cli.max_statement_chars)
        .force(cli.force)
        .dedupe_statements(!cli.no_dedupe);

    if let Some(ref output) = cli.output {
        builder = builder.output_file(output);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    for model in &cli.fallback_models {
        builder = builder.fallback_model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref endpoint) = cli.sentiment_endpoint {
        builder = builder.sentiment_endpoint(endpoint);
    }
    if let Some(ref password) = cli.password {
        builder = builder.pdf_password(password);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {}", path.display()))?;
        builder = builder.system_prompt(prompt);
    }
    for &stage in &cli.rerun {
        builder = builder.stage(stage, StagePolicy::always_run());
    }
    for &stage in &cli.disable {
        builder = builder.stage(stage, StagePolicy::disabled());
    }

    builder.build().context("Invalid configuration")
}
