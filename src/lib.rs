//! # acroform-merge
//!
//! Merge the fillable fields of many PDF forms into one conditional form
//! schema with the help of an LLM.
//!
//! Government and insurance paperwork tends to arrive as a stack of PDFs that
//! ask for the same facts under different names ("Name", "Full Name",
//! "Applicant Name"). This crate reads every AcroForm field, asks a model to
//! collapse duplicates, groups what remains into themes, proposes gating
//! questions ("Are you married?") that hide irrelevant fields, and writes a
//! single JSON schema a form renderer can display.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDFs
//!  │
//!  ├─ 1. Input        keep readable .pdf paths, skip the rest
//!  ├─ 2. Extract      walk /AcroForm /Fields via lopdf (spawn_blocking)
//!  ├─ 3. Deduplicate  one LLM call per batch of fields
//!  ├─ 4. Group        one LLM call; group order is display order
//!  ├─ 5. Finalize     one LLM call for parent questions, one per field label
//!  └─ 6. Output       insertion-ordered JSON schema + stats + fallbacks
//! ```
//!
//! Every LLM step degrades instead of failing when a response cannot be
//! parsed: batches pass through unmerged, fields get their own groups, labels
//! fall back to a template. The substitutions are reported in
//! [`ProcessingOutput::fallbacks`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use acroform_merge::{extract_fields, process, ProcessorConfig};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from ANTHROPIC_API_KEY / OPENAI_API_KEY
//!     let config = ProcessorConfig::default();
//!     let paths = vec![PathBuf::from("w4.pdf"), PathBuf::from("i9.pdf")];
//!     let fields = extract_fields(&paths, None).await?;
//!     let output = process(&fields, &config).await?;
//!     println!("{}", serde_json::to_string_pretty(&output.schema)?);
//!     eprintln!("{} fallbacks", output.fallbacks.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `acroform-merge` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! acroform-merge = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ProcessorConfig, ProcessorConfigBuilder, DEFAULT_BATCH_SIZE, DEFAULT_MODEL};
pub use error::{FormMergeError, StageFallback};
pub use model::{
    Condition, ConditionOperator, ConditionalLogic, ExtractionReport, FieldKind, FieldLabel,
    FieldMetadata, FieldRecord, FieldRelationship, GroupTag, GroupedField, OutputSchema,
    ParentQuestion, QuestionType, SchemaEntry, SchemaMetadata,
};
pub use output::{ProcessingOutput, ProcessingStats};
pub use pipeline::extract::{extract_fields, extract_file, extract_from_bytes};
pub use pipeline::input::{read_input_list, resolve_inputs, ResolvedInputs, SkippedInput};
pub use pipeline::llm::{CompletionClient, LlmRequest, ProviderClient};
pub use pipeline::Stage;
pub use process::{
    extraction_report, process, process_files, process_sync, process_with_client, write_json,
};
pub use progress::{NoopProgressCallback, ProcessingProgressCallback, ProgressCallback};
