//! Error types for the acroform-merge library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`FormMergeError`]: **Fatal**: the run cannot proceed at all (no usable
//!   input PDFs, provider not configured, a transport failure during
//!   deduplication or grouping). Returned as `Err(FormMergeError)`.
//!
//! * [`StageFallback`]: **Non-fatal**: one LLM response could not be used
//!   (malformed JSON, wrong shape, label request failed) and the stage
//!   substituted its documented fallback for that unit of work. Collected in
//!   [`crate::output::ProcessingOutput::fallbacks`] so callers can see exactly
//!   which parts of the schema were produced without model help.

use crate::pipeline::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the acroform-merge library.
///
/// Recoverable LLM-response failures use [`StageFallback`] and never surface
/// here.
#[derive(Debug, Error)]
pub enum FormMergeError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Path does not name a PDF (wrong extension or missing `%PDF` header).
    #[error("'{path}' is not a PDF file")]
    NotAPdf { path: PathBuf },

    /// The `--input-list` file does not exist or cannot be read.
    #[error("Input list '{path}' could not be read: {reason}")]
    InputListUnreadable { path: PathBuf, reason: String },

    /// Every candidate path was skipped; there is nothing to process.
    #[error("No valid PDF files to process ({skipped} path(s) skipped)")]
    NoValidInputs { skipped: usize },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// The PDF object model could not be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM request itself failed (network, HTTP status, auth).
    #[error("LLM request failed during {stage}: {message}")]
    LlmApiError { stage: Stage, message: String },

    /// The LLM request did not complete within the configured timeout.
    #[error("LLM request timed out after {secs}s during {stage}")]
    LlmTimeout { stage: Stage, secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The output value could not be serialised to JSON.
    #[error("Failed to serialise output: {0}")]
    Serialize(#[from] serde_json::Error),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal substitution made by one pipeline stage.
///
/// Each variant names the smallest unit of work that degraded: one
/// deduplication batch, the grouping call, the structural-synthesis call,
/// or a single field's label.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageFallback {
    /// A deduplication batch response was unusable; the batch passed through unmerged.
    #[error("Deduplication batch {batch} ({size} fields) kept unmerged: {detail}")]
    DedupBatchUnmerged {
        batch: usize,
        size: usize,
        detail: String,
    },

    /// The grouping response was unusable; every field got its own group.
    #[error("Grouping fell back to {fields} singleton groups: {detail}")]
    SingletonGroups { fields: usize, detail: String },

    /// The structural-synthesis call failed; no parent questions or conditions.
    #[error("Conditional logic skipped: {detail}")]
    NoConditionalLogic { detail: String },

    /// Label generation for one field failed; the templated label was used.
    #[error("Templated label used for '{field_name}': {detail}")]
    TemplatedLabel { field_name: String, detail: String },
}

impl StageFallback {
    /// The stage that produced this fallback.
    pub fn stage(&self) -> Stage {
        match self {
            StageFallback::DedupBatchUnmerged { .. } => Stage::Deduplication,
            StageFallback::SingletonGroups { .. } => Stage::Grouping,
            StageFallback::NoConditionalLogic { .. } => Stage::ConditionalLogic,
            StageFallback::TemplatedLabel { .. } => Stage::Labeling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_valid_inputs_display() {
        let e = FormMergeError::NoValidInputs { skipped: 3 };
        assert!(e.to_string().contains("3 path(s) skipped"), "got: {e}");
    }

    #[test]
    fn llm_api_error_names_stage() {
        let e = FormMergeError::LlmApiError {
            stage: Stage::Grouping,
            message: "connection reset".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("grouping"), "got: {msg}");
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn provider_not_configured_display() {
        let e = FormMergeError::ProviderNotConfigured {
            provider: "anthropic".into(),
            hint: "Set ANTHROPIC_API_KEY".into(),
        };
        assert!(e.to_string().contains("anthropic"));
        assert!(e.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn fallback_reports_its_stage() {
        let f = StageFallback::TemplatedLabel {
            field_name: "DOB".into(),
            detail: "invalid JSON".into(),
        };
        assert_eq!(f.stage(), Stage::Labeling);
        assert!(f.to_string().contains("DOB"));

        let f = StageFallback::DedupBatchUnmerged {
            batch: 2,
            size: 50,
            detail: "expected value at line 1 column 1".into(),
        };
        assert_eq!(f.stage(), Stage::Deduplication);
    }

    #[test]
    fn fallback_serialises_with_kind_tag() {
        let f = StageFallback::SingletonGroups {
            fields: 4,
            detail: "bad".into(),
        };
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["kind"], "singleton_groups");
        assert_eq!(json["fields"], 4);
    }
}
