//! Pipeline entry points: extract, process, and write.
//!
//! [`process`] resolves an LLM provider from the config and runs
//! deduplication, grouping, and finalization in sequence. Use
//! [`process_with_client`] to drive the same pipeline with any
//! [`CompletionClient`], e.g. a scripted one in tests.

use crate::config::{ProcessorConfig, DEFAULT_MODEL, DEFAULT_PROVIDER};
use crate::error::FormMergeError;
use crate::model::{ExtractionReport, FieldRecord, GroupedField};
use crate::output::{ProcessingOutput, ProcessingStats};
use crate::pipeline::llm::{CompletionClient, ProviderClient, StageContext};
use crate::pipeline::{conditional, dedup, extract, grouping, Stage};
use crate::progress::ProgressCallback;
use edgequake_llm::{AnthropicProvider, LLMProvider, ProviderFactory};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Merge extracted fields into one conditional schema.
///
/// # Errors
/// Returns `Err(FormMergeError)` only for fatal errors:
/// - No provider could be configured
/// - A transport failure during deduplication or grouping
///
/// Unusable LLM responses are not errors; see
/// [`ProcessingOutput::fallbacks`].
pub async fn process(
    fields: &[FieldRecord],
    config: &ProcessorConfig,
) -> Result<ProcessingOutput, FormMergeError> {
    let provider = resolve_provider(config)?;
    let client = ProviderClient::new(provider, config);
    process_with_client(&client, fields, config).await
}

/// [`process`] with an explicit completion client.
pub async fn process_with_client<C: CompletionClient>(
    client: &C,
    fields: &[FieldRecord],
    config: &ProcessorConfig,
) -> Result<ProcessingOutput, FormMergeError> {
    let total_start = Instant::now();
    info!("Processing {} fields", fields.len());
    let mut ctx = StageContext::new(client, config);
    let progress = config.progress_callback.as_ref();

    // ── Step 1: Deduplicate ──────────────────────────────────────────────
    if let Some(cb) = progress {
        cb.on_stage_start(Stage::Deduplication, fields.len());
    }
    let dedup_start = Instant::now();
    let deduplicated = dedup::deduplicate(&mut ctx, fields, config.batch_size).await?;
    let dedup_duration_ms = dedup_start.elapsed().as_millis() as u64;
    let dedup_batches = ctx.llm_calls();
    info!("Reduced to {} unique fields", deduplicated.len());
    if let Some(cb) = progress {
        cb.on_stage_complete(Stage::Deduplication, deduplicated.len());
    }

    // ── Step 2: Group ────────────────────────────────────────────────────
    if let Some(cb) = progress {
        cb.on_stage_start(Stage::Grouping, deduplicated.len());
    }
    let grouping_start = Instant::now();
    let grouped = grouping::group_fields(&mut ctx, &deduplicated).await?;
    let grouping_duration_ms = grouping_start.elapsed().as_millis() as u64;
    let groups = count_groups(&grouped);
    info!("Organised into {} groups", groups);
    if let Some(cb) = progress {
        cb.on_stage_complete(Stage::Grouping, grouped.len());
    }

    // ── Step 3: Conditional logic, labels, schema ────────────────────────
    let finalize_start = Instant::now();
    let assembly = conditional::finalize(&mut ctx, &grouped).await;
    let finalize_duration_ms = finalize_start.elapsed().as_millis() as u64;
    info!(
        "Generated {} schema entries ({} parent questions)",
        assembly.schema.len(),
        assembly.parent_questions
    );

    let (fallbacks, llm_calls) = ctx.into_parts();
    let stats = ProcessingStats {
        input_fields: fields.len(),
        deduplicated_fields: deduplicated.len(),
        dedup_batches,
        groups,
        parent_questions: assembly.parent_questions,
        schema_entries: assembly.schema.len(),
        key_collisions: assembly.key_collisions.len(),
        llm_calls,
        dedup_duration_ms,
        grouping_duration_ms,
        finalize_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    debug!("{:?}", stats);

    Ok(ProcessingOutput {
        schema: assembly.schema,
        stats,
        fallbacks,
    })
}

/// Synchronous wrapper around [`process`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_sync(
    fields: &[FieldRecord],
    config: &ProcessorConfig,
) -> Result<ProcessingOutput, FormMergeError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| FormMergeError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(process(fields, config))
}

/// Extract fields from `paths` and merge them, writing the schema to
/// `output_path`. Returns the run's output (the schema is also on disk).
pub async fn process_files(
    paths: &[PathBuf],
    output_path: impl AsRef<Path>,
    config: &ProcessorConfig,
) -> Result<ProcessingOutput, FormMergeError> {
    let fields = extract::extract_fields(paths, config.progress_callback.as_ref()).await?;
    let output = process(&fields, config).await?;
    write_json(output_path, &output.schema).await?;
    Ok(output)
}

/// Extract fields from `paths` without any LLM processing.
pub async fn extraction_report(
    paths: &[PathBuf],
    progress: Option<&ProgressCallback>,
) -> Result<ExtractionReport, FormMergeError> {
    let fields = extract::extract_fields(paths, progress).await?;
    Ok(ExtractionReport::from(fields))
}

/// Serialize `value` as pretty JSON to `path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_json<T: Serialize + ?Sized>(
    path: impl AsRef<Path>,
    value: &T,
) -> Result<(), FormMergeError> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(value)?;
    let write_failed = |source| FormMergeError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)?;

    info!("Wrote {}", path.display());
    Ok(())
}

fn count_groups(grouped: &[GroupedField]) -> usize {
    grouped
        .iter()
        .filter_map(|g| g.group.as_ref().map(|t| t.display_order))
        .collect::<HashSet<_>>()
        .len()
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Model used when a provider is named without one.
fn default_model_for(provider: &str) -> &'static str {
    match provider {
        "openai" => "gpt-4.1-mini",
        "gemini" => "gemini-2.0-flash",
        "ollama" => "llama3.2",
        _ => DEFAULT_MODEL,
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, FormMergeError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        FormMergeError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Explicit key** (`config.api_key`): Anthropic built with that key,
///    unless another provider is named.
/// 3. **Named provider** (`config.provider_name`) with `config.model` or
///    that provider's default model.
/// 4. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 5. **Anthropic** when `ANTHROPIC_API_KEY` is set.
/// 6. **OpenAI** when `OPENAI_API_KEY` is set.
/// 7. **Auto-detection** via [`ProviderFactory::from_env`].
pub fn resolve_provider(config: &ProcessorConfig) -> Result<Arc<dyn LLMProvider>, FormMergeError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let names_anthropic = config
        .provider_name
        .as_deref()
        .map_or(true, |name| name == DEFAULT_PROVIDER);
    if let Some(key) = config.api_key.as_deref().filter(|_| names_anthropic) {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        debug!("Using Anthropic with an explicit API key ({})", model);
        return Ok(Arc::new(AnthropicProvider::new(key).with_model(model)));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or_else(|| default_model_for(name));
        return create_provider(name, model);
    }

    if let (Some(prov), Some(model)) = (
        env_non_empty("EDGEQUAKE_LLM_PROVIDER"),
        env_non_empty("EDGEQUAKE_MODEL"),
    ) {
        return create_provider(&prov, &model);
    }

    if env_non_empty("ANTHROPIC_API_KEY").is_some() {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(DEFAULT_PROVIDER, model);
    }

    if env_non_empty("OPENAI_API_KEY").is_some() {
        let model = config.model.as_deref().unwrap_or_else(|| default_model_for("openai"));
        return create_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| FormMergeError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set ANTHROPIC_API_KEY (or pass --api-key), OPENAI_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
