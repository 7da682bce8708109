//! CLI binary for acroform-merge.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ProcessorConfig`, runs the pipeline, and prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use acroform_merge::{
    extract_fields, extraction_report, process, read_input_list, resolve_inputs, write_json,
    ProcessingProgressCallback, ProcessorConfig, ProgressCallback, Stage, StageFallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one spinner/bar at the bottom of the terminal
/// plus a log line per file and per stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(spinner_style());
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    /// Switch to a counting bar for a stage with a known amount of work.
    fn counting(&self, prefix: &'static str, unit: &str, total: usize) {
        let style = ProgressStyle::with_template(&format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {unit}  ⏱ {{elapsed_precise}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_style(style);
        self.bar.set_prefix(prefix);
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.reset_eta();
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(TICKS)
}

impl ProcessingProgressCallback for CliProgressCallback {
    fn on_file_start(&self, file_num: usize, total_files: usize, path: &str) {
        self.bar.set_prefix("Extracting");
        self.bar.set_message(format!("{file_num}/{total_files}  {path}"));
    }

    fn on_file_extracted(&self, path: &str, field_count: usize) {
        if field_count == 0 {
            self.bar.println(format!(
                "  {} {:<40} {}",
                yellow("⚠"),
                path,
                yellow("no form fields")
            ));
            return;
        }
        self.bar.println(format!(
            "  {} {:<40} {}",
            green("✓"),
            path,
            dim(&format!("{field_count:>4} fields"))
        ));
    }

    fn on_stage_start(&self, stage: Stage, input_count: usize) {
        match stage {
            Stage::Deduplication => {
                let batches = self.batches_hint(input_count);
                self.counting("Deduplicating", "batches", batches);
            }
            Stage::Labeling => self.counting("Labeling", "fields", input_count),
            Stage::Grouping | Stage::ConditionalLogic => {
                self.bar.set_style(spinner_style());
                self.bar.set_prefix(capitalise(stage.as_str()));
                self.bar.set_message(format!("{input_count} fields"));
            }
        }
    }

    fn on_batch_complete(&self, batch_num: usize, total_batches: usize) {
        self.bar.set_length(total_batches as u64);
        self.bar.set_position(batch_num as u64);
    }

    fn on_field_labeled(&self, field_num: usize, _total_fields: usize) {
        self.bar.set_position(field_num as u64);
    }

    fn on_fallback(&self, fallback: &StageFallback) {
        let msg = fallback.to_string();
        let msg = match msg.char_indices().nth(100) {
            Some((cut, _)) => format!("{}\u{2026}", &msg[..cut]),
            None => msg,
        };
        self.bar.println(format!("  {} {}", yellow("⚠"), yellow(&msg)));
    }

    fn on_stage_complete(&self, stage: Stage, output_count: usize) {
        let unit = match stage {
            Stage::ConditionalLogic => "parent questions",
            Stage::Labeling => "schema entries",
            Stage::Deduplication | Stage::Grouping => "fields",
        };
        self.bar.println(format!(
            "{} {:<18} {}",
            cyan("◆"),
            capitalise(stage.as_str()),
            dim(&format!("{output_count} {unit}"))
        ));
    }
}

impl CliProgressCallback {
    /// The real batch count arrives with the first batch; this only sizes
    /// the bar until then.
    fn batches_hint(&self, fields: usize) -> usize {
        fields.div_ceil(acroform_merge::DEFAULT_BATCH_SIZE).max(1)
    }
}

/// Error messages carry a hint on their second line; one line is enough here.
fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or(s)
}

fn capitalise(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Merge three forms into combined_forms.json
  acroform-merge w4.pdf i9.pdf state_withholding.pdf

  # Read the PDF list from a file, write elsewhere
  acroform-merge --input-list forms.txt -o schema.json

  # Only extract raw fields (no API key needed)
  acroform-merge --extract-only *.pdf -o fields.json

  # Smaller deduplication batches
  acroform-merge --batch-size 25 forms/*.pdf

  # Another provider
  acroform-merge --provider openai --model gpt-4.1 forms/*.pdf

ENVIRONMENT VARIABLES:
  ANTHROPIC_API_KEY       Anthropic API key (same as --api-key)
  OPENAI_API_KEY          OpenAI API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (anthropic, openai, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Log filter, e.g. acroform_merge=debug

EXIT STATUS:
  0  success, including when no fields were found
  1  no valid input PDFs, unreadable PDF, provider or transport failure
"#;

/// Merge the fillable fields of many PDF forms into one conditional schema.
#[derive(Parser, Debug)]
#[command(
    name = "acroform-merge",
    version,
    about = "Merge PDF form fields into one conditional form schema using an LLM",
    long_about = "Extract AcroForm fields from PDF forms, merge duplicates across forms, group \
related fields, and generate parent questions, labels and conditions with an LLM. \
Writes one JSON schema a form renderer can display.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files to process.
    #[arg(required_unless_present = "input_list", conflicts_with = "input_list")]
    pdf_files: Vec<String>,

    /// Text file listing one PDF path per line.
    #[arg(long, value_name = "FILE")]
    input_list: Option<PathBuf>,

    /// Output JSON file.
    #[arg(short, long, default_value = "combined_forms.json")]
    output: PathBuf,

    /// Anthropic API key.
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Fields per deduplication request.
    #[arg(long, default_value_t = acroform_merge::DEFAULT_BATCH_SIZE, value_parser = parse_batch_size)]
    batch_size: usize,

    /// Only extract fields; skip all LLM processing.
    #[arg(long)]
    extract_only: bool,

    /// LLM provider: anthropic, openai, gemini, ollama.
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, default_value_t = 0.2)]
    temperature: f32,

    /// Max output tokens for the deduplication, grouping and structure requests.
    #[arg(long, default_value_t = 4096)]
    max_tokens: usize,

    /// Per-request LLM timeout in seconds.
    #[arg(long)]
    api_timeout: Option<u64>,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress;
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

    // ── Resolve inputs ───────────────────────────────────────────────────
    let candidates = match cli.input_list {
        Some(ref list) => read_input_list(list)?,
        None => cli.pdf_files.clone(),
    };
    let resolved = resolve_inputs(&candidates);
    // With the bar on, the log filter hides warnings; report skips directly.
    if show_progress {
        for skipped in &resolved.skipped {
            eprintln!(
                "{} Skipping {}: {}",
                yellow("⚠"),
                skipped.candidate,
                first_line(&skipped.reason.to_string())
            );
        }
    }
    let paths = resolved.into_paths()?;

    if !cli.quiet {
        eprintln!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {} PDF file(s)", paths.len()))
        );
    }

    let progress = show_progress.then(CliProgressCallback::new);
    let progress_cb: Option<ProgressCallback> = progress
        .clone()
        .map(|cb| cb as Arc<dyn ProcessingProgressCallback>);

    // ── Extract ──────────────────────────────────────────────────────────
    if cli.extract_only {
        let report = extraction_report(&paths, progress_cb.as_ref()).await;
        if let Some(ref cb) = progress {
            cb.finish();
        }
        let report = report.context("Field extraction failed")?;
        write_json(&cli.output, &report).await?;
        if !cli.quiet {
            eprintln!(
                "{} Extracted {} fields  →  {}",
                green("✔"),
                bold(&report.total_fields.to_string()),
                bold(&cli.output.display().to_string())
            );
        }
        return Ok(());
    }

    let fields = extract_fields(&paths, progress_cb.as_ref())
        .await
        .context("Field extraction failed")?;

    if fields.is_empty() {
        if let Some(ref cb) = progress {
            cb.finish();
        }
        if !cli.quiet {
            eprintln!("{} No fields extracted from PDFs. Exiting.", yellow("⚠"));
        }
        return Ok(());
    }

    // ── Process ──────────────────────────────────────────────────────────
    let config = build_config(&cli, progress_cb)?;
    let result = process(&fields, &config).await;
    if let Some(ref cb) = progress {
        cb.finish();
    }
    let output = result.context("Processing failed")?;

    write_json(&cli.output, &output.schema).await?;

    if !cli.quiet {
        let stats = &output.stats;
        eprintln!(
            "{}  {} fields  →  {} entries  {}ms  →  {}",
            if output.fallbacks.is_empty() {
                green("✔")
            } else {
                yellow("⚠")
            },
            stats.input_fields,
            stats.schema_entries,
            stats.total_duration_ms,
            bold(&cli.output.display().to_string()),
        );
        eprintln!(
            "   {} unique fields  /  {} groups  /  {} parent questions  /  {} LLM calls",
            dim(&stats.deduplicated_fields.to_string()),
            dim(&stats.groups.to_string()),
            dim(&stats.parent_questions.to_string()),
            dim(&stats.llm_calls.to_string()),
        );
        if !output.fallbacks.is_empty() {
            eprintln!(
                "   {} response(s) could not be used; defaults were substituted",
                yellow(&output.fallbacks.len().to_string())
            );
        }
        if stats.key_collisions > 0 {
            eprintln!(
                "   {} duplicate key(s) overwritten",
                yellow(&stats.key_collisions.to_string())
            );
        }
    }

    Ok(())
}

fn parse_batch_size(s: &str) -> std::result::Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("batch size must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

/// Map CLI args to `ProcessorConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ProcessorConfig> {
    let mut builder = ProcessorConfig::builder()
        .batch_size(cli.batch_size)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens);

    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key.clone());
    }
    if let Some(ref name) = cli.provider {
        builder = builder.provider_name(name.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(secs) = cli.api_timeout {
        builder = builder.api_timeout_secs(secs);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
