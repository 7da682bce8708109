//! Pipeline stages for merging AcroForm fields into one schema.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested alone against a scripted [`llm::CompletionClient`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ dedup ──▶ grouping ──▶ conditional
//! (paths)   (lopdf)     (LLM×N)   (LLM×1)      (LLM×1 + LLM per field)
//! ```
//!
//! 1. [`input`]      : filter user-supplied paths down to readable `.pdf` files
//! 2. [`extract`]    : walk `/AcroForm /Fields` into [`crate::model::FieldRecord`]s
//! 3. [`dedup`]      : batch-wise semantic deduplication
//! 4. [`grouping`]   : thematic groups and display order
//! 5. [`conditional`]: parent questions, conditions, labels, final schema
//!
//! [`llm`] holds the client seam and the response parser shared by 3–5.

pub mod conditional;
pub mod dedup;
pub mod extract;
pub mod grouping;
pub mod input;
pub mod llm;

use serde::{Deserialize, Serialize};
use std::fmt;

/// The LLM-backed pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Deduplication,
    Grouping,
    ConditionalLogic,
    Labeling,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Deduplication => "deduplication",
            Stage::Grouping => "grouping",
            Stage::ConditionalLogic => "conditional logic",
            Stage::Labeling => "labeling",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
