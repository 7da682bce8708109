//! Progress-callback trait for per-file and per-stage pipeline events.
//!
//! Inject an [`Arc<dyn ProcessingProgressCallback>`] via
//! [`crate::config::ProcessorConfigBuilder::progress_callback`] to receive
//! events as the pipeline extracts files, runs deduplication batches, and
//! labels fields one by one.
//!
//! # Example
//!
//! ```rust
//! use acroform_merge::{ProcessingProgressCallback, ProcessorConfig, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct BatchCounter {
//!     batches: AtomicUsize,
//! }
//!
//! impl ProcessingProgressCallback for BatchCounter {
//!     fn on_batch_complete(&self, batch_num: usize, total_batches: usize) {
//!         self.batches.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("batch {batch_num}/{total_batches} deduplicated");
//!     }
//! }
//!
//! let counter = Arc::new(BatchCounter { batches: AtomicUsize::new(0) });
//! let config = ProcessorConfig::builder()
//!     .progress_callback(counter as Arc<dyn ProcessingProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::StageFallback;
use crate::pipeline::Stage;
use std::sync::Arc;

/// Called by the pipeline as it works.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. The pipeline is sequential, so calls never overlap,
/// but implementations must still be `Send + Sync` to live in the config.
pub trait ProcessingProgressCallback: Send + Sync {
    /// Called before a PDF is opened.
    ///
    /// # Arguments
    /// * `file_num`   : 1-indexed position in the input list
    /// * `total_files`: number of input PDFs
    /// * `path`       : the path as given
    fn on_file_start(&self, file_num: usize, total_files: usize, path: &str) {
        let _ = (file_num, total_files, path);
    }

    /// Called after a PDF's fields have been read.
    fn on_file_extracted(&self, path: &str, field_count: usize) {
        let _ = (path, field_count);
    }

    /// Called when a pipeline stage begins.
    ///
    /// # Arguments
    /// * `stage`      : the stage starting
    /// * `input_count`: fields handed to the stage
    fn on_stage_start(&self, stage: Stage, input_count: usize) {
        let _ = (stage, input_count);
    }

    /// Called after each deduplication batch.
    fn on_batch_complete(&self, batch_num: usize, total_batches: usize) {
        let _ = (batch_num, total_batches);
    }

    /// Called after each field's label request, whether or not it fell back.
    fn on_field_labeled(&self, field_num: usize, total_fields: usize) {
        let _ = (field_num, total_fields);
    }

    /// Called when a stage substitutes its fallback for an LLM response.
    fn on_fallback(&self, fallback: &StageFallback) {
        let _ = fallback;
    }

    /// Called when a stage finishes.
    ///
    /// # Arguments
    /// * `stage`       : the stage that finished
    /// * `output_count`: records (or schema entries) the stage produced
    fn on_stage_complete(&self, stage: Stage, output_count: usize) {
        let _ = (stage, output_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ProcessingProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ProcessorConfig`].
pub type ProgressCallback = Arc<dyn ProcessingProgressCallback>;
