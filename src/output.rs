//! Result types returned by [`crate::process::process`].

use crate::error::StageFallback;
use crate::model::OutputSchema;
use serde::{Deserialize, Serialize};

/// Complete result of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingOutput {
    /// The schema written to disk.
    pub schema: OutputSchema,
    /// Counts and timings.
    pub stats: ProcessingStats,
    /// Every place a stage substituted its fallback, in the order they occurred.
    pub fallbacks: Vec<StageFallback>,
}

/// Counts and timings for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStats {
    /// Fields handed to the pipeline.
    pub input_fields: usize,
    /// Fields left after deduplication.
    pub deduplicated_fields: usize,
    /// Deduplication requests sent.
    pub dedup_batches: usize,
    /// Distinct groups after grouping.
    pub groups: usize,
    /// Parent questions synthesized.
    pub parent_questions: usize,
    /// Entries in the final schema.
    pub schema_entries: usize,
    /// Keys written more than once (later entry kept).
    pub key_collisions: usize,
    /// Total LLM requests.
    pub llm_calls: usize,

    pub dedup_duration_ms: u64,
    pub grouping_duration_ms: u64,
    pub finalize_duration_ms: u64,
    pub total_duration_ms: u64,
}

impl ProcessingOutput {
    /// Entries that came from form fields (as opposed to parent questions).
    pub fn field_entries(&self) -> usize {
        self.schema
            .values()
            .filter(|e| !e.is_parent_question())
            .count()
    }
}
