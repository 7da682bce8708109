//! Batch deduplication: merge fields that ask for the same information.
//!
//! Fields are cut into consecutive batches of at most `batch_size`, and each
//! batch is clustered by one LLM request. There is no cross-batch merging: a
//! duplicate whose occurrences fall into different batches survives twice.
//! Batching exists only to keep each prompt inside the model's budget.
//!
//! A batch whose response cannot be parsed passes through unmerged; the other
//! batches are unaffected. Transport errors are fatal and propagate.

use crate::error::{FormMergeError, StageFallback};
use crate::model::{FieldKind, FieldRecord};
use crate::pipeline::llm::{parse_llm_json, CompletionClient, StageContext};
use crate::pipeline::Stage;
use crate::prompts;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// One cluster of equivalent fields, as returned by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupGroup {
    pub canonical_name: String,
    pub field_indices: Vec<usize>,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Serialize)]
struct FieldSummary<'a> {
    index: usize,
    field_name: &'a str,
    source_pdf: &'a str,
    #[serde(rename = "type")]
    kind: FieldKind,
}

/// Deduplicate `fields` batch by batch, preserving batch order.
pub async fn deduplicate<C: CompletionClient>(
    ctx: &mut StageContext<'_, C>,
    fields: &[FieldRecord],
    batch_size: usize,
) -> Result<Vec<FieldRecord>, FormMergeError> {
    if fields.is_empty() {
        return Ok(Vec::new());
    }

    let batch_size = batch_size.max(1);
    let total_batches = fields.len().div_ceil(batch_size);
    let mut deduplicated = Vec::with_capacity(fields.len());

    for (i, batch) in fields.chunks(batch_size).enumerate() {
        let batch_num = i + 1;
        let merged = dedup_batch_numbered(ctx, batch, batch_num).await?;
        debug!(
            "Batch {}/{}: {} → {} fields",
            batch_num,
            total_batches,
            batch.len(),
            merged.len()
        );
        deduplicated.extend(merged);

        if let Some(cb) = ctx.progress() {
            cb.on_batch_complete(batch_num, total_batches);
        }
    }

    info!(
        "Deduplicated {} fields to {} in {} batch(es)",
        fields.len(),
        deduplicated.len(),
        total_batches
    );
    Ok(deduplicated)
}

/// Deduplicate a single batch with one LLM request.
///
/// Returns the batch unchanged (and records a fallback) when the response is
/// not a usable group list.
pub async fn deduplicate_batch<C: CompletionClient>(
    ctx: &mut StageContext<'_, C>,
    batch: &[FieldRecord],
) -> Result<Vec<FieldRecord>, FormMergeError> {
    dedup_batch_numbered(ctx, batch, 1).await
}

async fn dedup_batch_numbered<C: CompletionClient>(
    ctx: &mut StageContext<'_, C>,
    batch: &[FieldRecord],
    batch_num: usize,
) -> Result<Vec<FieldRecord>, FormMergeError> {
    let summary: Vec<FieldSummary<'_>> = batch
        .iter()
        .enumerate()
        .map(|(index, f)| FieldSummary {
            index,
            field_name: &f.field_name,
            source_pdf: &f.source_pdf,
            kind: f.field_type,
        })
        .collect();
    let summary_json = serde_json::to_string_pretty(&summary)?;

    let max_tokens = ctx.config().max_tokens;
    let response = ctx
        .request(
            Stage::Deduplication,
            prompts::dedup_prompt(&summary_json),
            max_tokens,
        )
        .await?;

    match parse_llm_json::<Vec<DedupGroup>>(&response) {
        Ok(groups) => Ok(merge_groups(batch, &groups)),
        Err(e) => {
            ctx.record_fallback(StageFallback::DedupBatchUnmerged {
                batch: batch_num,
                size: batch.len(),
                detail: e.to_string(),
            });
            Ok(batch.to_vec())
        }
    }
}

/// Apply the model's grouping to one batch.
///
/// Each group yields a copy of its first member renamed to the canonical
/// name, with `sources` set to every member's documents. An index is used by
/// the first group that lists it; out-of-range and repeated indices are
/// ignored. Fields no group mentions are appended unchanged.
pub fn merge_groups(batch: &[FieldRecord], groups: &[DedupGroup]) -> Vec<FieldRecord> {
    let mut claimed = vec![false; batch.len()];
    let mut merged = Vec::with_capacity(groups.len());

    for group in groups {
        let mut members = Vec::with_capacity(group.field_indices.len());
        for &idx in &group.field_indices {
            if idx >= batch.len() {
                warn!(
                    "Group '{}' references index {} but the batch has {} fields; ignored",
                    group.canonical_name,
                    idx,
                    batch.len()
                );
            } else if claimed[idx] {
                debug!(
                    "Index {} already merged elsewhere; ignored in group '{}'",
                    idx, group.canonical_name
                );
            } else {
                claimed[idx] = true;
                members.push(idx);
            }
        }

        let Some(&first) = members.first() else {
            continue;
        };

        let mut record = batch[first].clone();
        let canonical = group.canonical_name.trim();
        if !canonical.is_empty() {
            record.field_name = canonical.to_string();
        }
        record.sources = members
            .iter()
            .flat_map(|&i| batch[i].source_documents())
            .collect();
        merged.push(record);
    }

    for (idx, field) in batch.iter().enumerate() {
        if !claimed[idx] {
            debug!("Field '{}' was not grouped; kept as is", field.field_name);
            merged.push(field.clone());
        }
    }

    merged
}
