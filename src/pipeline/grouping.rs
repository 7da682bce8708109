//! Thematic grouping of deduplicated fields.
//!
//! One request covers every field. The order of the groups in the response
//! becomes the display order, and fields are emitted group by group.

use crate::error::{FormMergeError, StageFallback};
use crate::model::{FieldKind, FieldRecord, GroupTag, GroupedField};
use crate::pipeline::llm::{parse_llm_json, CompletionClient, StageContext};
use crate::pipeline::Stage;
use crate::prompts;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// One group as returned by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldGroup {
    pub group_name: String,
    pub field_indices: Vec<usize>,
    #[serde(default)]
    pub description: String,
}

#[derive(Serialize)]
struct FieldSummary<'a> {
    index: usize,
    field_name: &'a str,
    #[serde(rename = "type")]
    kind: FieldKind,
}

/// Assign every field to a group.
///
/// An unusable response falls back to one group per field, in input order.
/// Transport errors propagate. Empty input returns immediately without a
/// request.
pub async fn group_fields<C: CompletionClient>(
    ctx: &mut StageContext<'_, C>,
    fields: &[FieldRecord],
) -> Result<Vec<GroupedField>, FormMergeError> {
    if fields.is_empty() {
        return Ok(Vec::new());
    }

    let summary: Vec<FieldSummary<'_>> = fields
        .iter()
        .enumerate()
        .map(|(index, f)| FieldSummary {
            index,
            field_name: &f.field_name,
            kind: f.field_type,
        })
        .collect();
    let summary_json = serde_json::to_string_pretty(&summary)?;

    let max_tokens = ctx.config().max_tokens;
    let response = ctx
        .request(Stage::Grouping, prompts::grouping_prompt(&summary_json), max_tokens)
        .await?;

    let grouped = match parse_llm_json::<Vec<FieldGroup>>(&response) {
        Ok(groups) => {
            info!("Model proposed {} group(s)", groups.len());
            assign_groups(fields, &groups)
        }
        Err(e) => {
            ctx.record_fallback(StageFallback::SingletonGroups {
                fields: fields.len(),
                detail: e.to_string(),
            });
            singleton_groups(fields)
        }
    };
    Ok(grouped)
}

/// Lay fields out in group order.
///
/// A field belongs to the first group that lists it. Out-of-range and
/// repeated indices are ignored. Fields no group claims each get a trailing
/// group of their own, so nothing is lost.
pub fn assign_groups(fields: &[FieldRecord], groups: &[FieldGroup]) -> Vec<GroupedField> {
    let mut claimed = vec![false; fields.len()];
    let mut grouped = Vec::with_capacity(fields.len());

    for (order, group) in groups.iter().enumerate() {
        for &idx in &group.field_indices {
            if idx >= fields.len() {
                warn!(
                    "Group '{}' references index {} of {}; ignored",
                    group.group_name,
                    idx,
                    fields.len()
                );
                continue;
            }
            if claimed[idx] {
                debug!("Index {} already grouped; ignored in '{}'", idx, group.group_name);
                continue;
            }
            claimed[idx] = true;
            grouped.push(GroupedField {
                record: fields[idx].clone(),
                group: Some(GroupTag {
                    group_name: group.group_name.clone(),
                    description: group.description.clone(),
                    display_order: order,
                }),
            });
        }
    }

    let mut next_order = groups.len();
    for (idx, field) in fields.iter().enumerate() {
        if claimed[idx] {
            continue;
        }
        debug!("Field '{}' was not grouped; placed on its own", field.field_name);
        grouped.push(GroupedField {
            record: field.clone(),
            group: Some(singleton_tag(next_order)),
        });
        next_order += 1;
    }

    grouped
}

/// One group per field, named `group_<i>`.
pub fn singleton_groups(fields: &[FieldRecord]) -> Vec<GroupedField> {
    fields
        .iter()
        .enumerate()
        .map(|(i, f)| GroupedField {
            record: f.clone(),
            group: Some(singleton_tag(i)),
        })
        .collect()
}

fn singleton_tag(order: usize) -> GroupTag {
    GroupTag {
        group_name: format!("group_{order}"),
        description: String::new(),
        display_order: order,
    }
}
