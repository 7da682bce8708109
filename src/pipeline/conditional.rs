//! Structural synthesis, labeling, and schema assembly.
//!
//! One request proposes parent questions (e.g. "Are you married?") and links
//! fields to them by index. Then each field gets its own label request.
//! Nothing in this stage is fatal: every failure, transport errors included,
//! degrades to "no conditional logic" or to a templated label.

use crate::error::StageFallback;
use crate::model::{
    ConditionalLogic, FieldLabel, FieldMetadata, FieldRelationship, GroupedField, OutputSchema,
    ParentQuestion, ParentQuestionMetadata, SchemaEntry, SchemaMetadata,
};
use crate::pipeline::llm::{parse_llm_json, CompletionClient, StageContext};
use crate::pipeline::Stage;
use crate::prompts;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// The schema plus what happened while building it.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaAssembly {
    pub schema: OutputSchema,
    /// Parent questions the model proposed (before any key collision).
    pub parent_questions: usize,
    /// Keys written more than once; the last write won.
    pub key_collisions: Vec<String>,
}

/// Top level of the structural response. Entries are checked one by one so
/// a single malformed relationship does not discard the rest.
#[derive(Debug, Deserialize)]
struct RawConditionalLogic {
    #[serde(default)]
    parent_questions: Vec<Value>,
    #[serde(default)]
    field_relationships: Map<String, Value>,
}

/// A relationship is either a full object or, in the older form, just the
/// parent question's id.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawRelationship {
    Full(FieldRelationship),
    ParentOnly(String),
}

#[derive(Serialize)]
struct FieldSummary<'a> {
    index: usize,
    field_name: &'a str,
}

/// Ask the model for parent questions and field relationships.
///
/// Relationship keys refer to positions in `fields`.
pub async fn synthesize_logic<C: CompletionClient>(
    ctx: &mut StageContext<'_, C>,
    fields: &[GroupedField],
) -> ConditionalLogic {
    if fields.is_empty() {
        return ConditionalLogic::default();
    }

    let summary: Vec<FieldSummary<'_>> = fields
        .iter()
        .enumerate()
        .map(|(index, f)| FieldSummary {
            index,
            field_name: &f.record.field_name,
        })
        .collect();
    let summary_json = match serde_json::to_string_pretty(&summary) {
        Ok(json) => json,
        Err(e) => return no_logic(ctx, e.to_string()),
    };

    let max_tokens = ctx.config().max_tokens;
    let response = match ctx
        .request(
            Stage::ConditionalLogic,
            prompts::conditional_prompt(&summary_json),
            max_tokens,
        )
        .await
    {
        Ok(text) => text,
        Err(e) => return no_logic(ctx, e.to_string()),
    };

    match parse_llm_json::<RawConditionalLogic>(&response) {
        Ok(raw) => {
            let logic = interpret(raw);
            info!(
                "{} parent question(s), {} conditional field(s)",
                logic.parent_questions.len(),
                logic.field_relationships.len()
            );
            logic
        }
        Err(e) => no_logic(ctx, e.to_string()),
    }
}

fn no_logic<C: CompletionClient>(ctx: &mut StageContext<'_, C>, detail: String) -> ConditionalLogic {
    ctx.record_fallback(StageFallback::NoConditionalLogic { detail });
    ConditionalLogic::default()
}

fn interpret(raw: RawConditionalLogic) -> ConditionalLogic {
    let parent_questions = raw
        .parent_questions
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<ParentQuestion>(value) {
            Ok(q) => Some(q),
            Err(e) => {
                warn!("Dropping malformed parent question: {}", e);
                None
            }
        })
        .collect();

    let field_relationships = raw
        .field_relationships
        .into_iter()
        .filter_map(|(key, value)| {
            match serde_json::from_value::<RawRelationship>(value) {
                Ok(RawRelationship::Full(rel)) => Some((key, rel)),
                Ok(RawRelationship::ParentOnly(parent_id)) => Some((
                    key,
                    FieldRelationship {
                        parent_id,
                        condition: None,
                    },
                )),
                Err(_) => {
                    warn!("Dropping malformed relationship for field {}", key);
                    None
                }
            }
        })
        .collect();

    ConditionalLogic {
        parent_questions,
        field_relationships,
    }
}

/// Ask the model for a user-facing label and explanation.
///
/// Never fails: any problem yields the templated wording.
pub async fn generate_label<C: CompletionClient>(
    ctx: &mut StageContext<'_, C>,
    field_name: &str,
) -> FieldLabel {
    let max_tokens = ctx.config().label_max_tokens;
    let detail = match ctx
        .request(Stage::Labeling, prompts::label_prompt(field_name), max_tokens)
        .await
    {
        Ok(text) => match parse_llm_json::<FieldLabel>(&text) {
            Ok(label) if !label.label.trim().is_empty() => return label,
            Ok(_) => "label was blank".to_string(),
            Err(e) => e.to_string(),
        },
        Err(e) => e.to_string(),
    };

    ctx.record_fallback(StageFallback::TemplatedLabel {
        field_name: field_name.to_string(),
        detail,
    });
    FieldLabel {
        label: prompts::fallback_label(field_name),
        explanation: prompts::fallback_explanation(field_name),
    }
}

/// Build the final schema: synthesize logic, label every field, assemble.
pub async fn finalize<C: CompletionClient>(
    ctx: &mut StageContext<'_, C>,
    fields: &[GroupedField],
) -> SchemaAssembly {
    if let Some(cb) = ctx.progress() {
        cb.on_stage_start(Stage::ConditionalLogic, fields.len());
    }
    let logic = synthesize_logic(ctx, fields).await;
    if let Some(cb) = ctx.progress() {
        cb.on_stage_complete(Stage::ConditionalLogic, logic.parent_questions.len());
        cb.on_stage_start(Stage::Labeling, fields.len());
    }

    let total = fields.len();
    let mut labels = Vec::with_capacity(total);
    for (i, field) in fields.iter().enumerate() {
        labels.push(generate_label(ctx, &field.record.field_name).await);
        if let Some(cb) = ctx.progress() {
            cb.on_field_labeled(i + 1, total);
        }
    }

    let assembly = assemble_schema(fields, &logic, &labels);
    if let Some(cb) = ctx.progress() {
        cb.on_stage_complete(Stage::Labeling, assembly.schema.len());
    }
    assembly
}

/// Combine fields, logic, and labels into the keyed schema.
///
/// Parent questions come first, keyed by `question_id`, then fields keyed by
/// name. `labels[i]` belongs to `fields[i]`; a missing label is templated.
pub fn assemble_schema(
    fields: &[GroupedField],
    logic: &ConditionalLogic,
    labels: &[FieldLabel],
) -> SchemaAssembly {
    let mut schema = OutputSchema::with_capacity(logic.parent_questions.len() + fields.len());
    let mut key_collisions = Vec::new();

    for question in &logic.parent_questions {
        let entry = SchemaEntry {
            label: question.label.clone(),
            explanation: None,
            kind: question.kind.into(),
            required: false,
            placeholder: None,
            options: question.options.clone(),
            max_length: None,
            metadata: SchemaMetadata::ParentQuestion(ParentQuestionMetadata {
                is_parent_question: true,
                generated: true,
            }),
        };
        insert_entry(&mut schema, &mut key_collisions, question.question_id.clone(), entry);
    }

    for (idx, field) in fields.iter().enumerate() {
        let record = &field.record;
        let relationship = logic.field_relationships.get(&idx.to_string());
        let (label, explanation) = match labels.get(idx) {
            Some(l) => (l.label.clone(), l.explanation.clone()),
            None => (
                prompts::fallback_label(&record.field_name),
                prompts::fallback_explanation(&record.field_name),
            ),
        };

        let entry = SchemaEntry {
            label,
            explanation: Some(explanation),
            kind: record.field_type.into(),
            required: record.required,
            placeholder: Some(prompts::placeholder(&record.field_name)),
            options: record.options.clone().filter(|o| !o.is_empty()),
            max_length: record.max_length.filter(|&n| n > 0),
            metadata: SchemaMetadata::Field(FieldMetadata {
                field_name: record.field_name.clone(),
                source_pdf: record.source_documents(),
                order_index: field.order_index(idx),
                parent: relationship.map(|r| r.parent_id.clone()),
                parent_condition: relationship.and_then(|r| r.condition.clone()),
                position: None,
                group: field.group.as_ref().map(|g| g.group_name.clone()),
            }),
        };
        insert_entry(&mut schema, &mut key_collisions, record.field_name.clone(), entry);
    }

    for key in logic.field_relationships.keys() {
        if key.parse::<usize>().map_or(true, |i| i >= fields.len()) {
            debug!("Relationship key '{}' matches no field; ignored", key);
        }
    }

    SchemaAssembly {
        schema,
        parent_questions: logic.parent_questions.len(),
        key_collisions,
    }
}

fn insert_entry(
    schema: &mut OutputSchema,
    collisions: &mut Vec<String>,
    key: String,
    entry: SchemaEntry,
) {
    if schema.insert(key.clone(), entry).is_some() {
        warn!("Schema key '{}' written twice; keeping the later entry", key);
        collisions.push(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessorConfig;
    use crate::error::FormMergeError;
    use crate::model::{
        Condition, ConditionOperator, EntryType, FieldKind, FieldRecord, GroupTag, QuestionType,
    };
    use crate::pipeline::llm::testing::ScriptedClient;
    use serde_json::json;

    fn grouped(name: &str, group: &str, order: usize) -> GroupedField {
        GroupedField {
            record: FieldRecord::new(name, "form.pdf", FieldKind::Text),
            group: Some(GroupTag {
                group_name: group.into(),
                description: String::new(),
                display_order: order,
            }),
        }
    }

    fn label(text: &str) -> FieldLabel {
        FieldLabel {
            label: text.into(),
            explanation: format!("{text} (explained)"),
        }
    }

    #[test]
    fn parent_questions_precede_fields() {
        let fields = vec![grouped("Name", "name", 0), grouped("Spouse Name", "spouse", 1)];
        let logic = ConditionalLogic {
            parent_questions: vec![ParentQuestion {
                question_id: "is_married".into(),
                label: "Are you married?".into(),
                kind: QuestionType::Boolean,
                options: None,
            }],
            field_relationships: [(
                "1".to_string(),
                FieldRelationship {
                    parent_id: "is_married".into(),
                    condition: Some(Condition {
                        operator: ConditionOperator::Equals,
                        value: json!(true),
                    }),
                },
            )]
            .into_iter()
            .collect(),
        };

        let out = assemble_schema(&fields, &logic, &[label("Name?"), label("Spouse?")]);

        let keys: Vec<&str> = out.schema.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["is_married", "Name", "Spouse Name"]);
        assert!(out.schema["is_married"].is_parent_question());
        assert_eq!(out.schema["is_married"].kind, EntryType::Boolean);
        assert!(!out.schema["is_married"].required);

        let spouse = out.schema["Spouse Name"].field_metadata().unwrap();
        assert_eq!(spouse.parent.as_deref(), Some("is_married"));
        assert_eq!(spouse.order_index, 1);
        assert_eq!(spouse.group.as_deref(), Some("spouse"));
        assert!(out.schema["Name"].field_metadata().unwrap().parent.is_none());
        assert_eq!(out.parent_questions, 1);
        assert!(out.key_collisions.is_empty());
    }

    #[test]
    fn field_entry_carries_record_details() {
        let mut field = grouped("State", "address", 3);
        field.record.field_type = FieldKind::Choice;
        field.record.required = true;
        field.record.options = Some(vec!["CA".into(), "NY".into()]);
        field.record.max_length = Some(0);

        let out = assemble_schema(&[field], &ConditionalLogic::default(), &[label("Which state?")]);
        let entry = &out.schema["State"];

        assert_eq!(entry.kind, EntryType::Choice);
        assert!(entry.required);
        assert_eq!(entry.placeholder.as_deref(), Some("Enter your state"));
        assert_eq!(entry.options.as_ref().unwrap().len(), 2);
        assert_eq!(entry.max_length, None);
        let meta = entry.field_metadata().unwrap();
        assert_eq!(meta.source_pdf, vec!["form.pdf"]);
        assert_eq!(meta.position, None);
    }

    #[test]
    fn colliding_keys_keep_last_entry_in_first_position() {
        let fields = vec![grouped("Email", "contact", 0), grouped("Phone", "contact", 0)];
        let logic = ConditionalLogic {
            parent_questions: vec![ParentQuestion {
                question_id: "Email".into(),
                label: "Do you have email?".into(),
                kind: QuestionType::Boolean,
                options: None,
            }],
            field_relationships: Default::default(),
        };

        let out = assemble_schema(&fields, &logic, &[label("Email?"), label("Phone?")]);

        let keys: Vec<&str> = out.schema.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Email", "Phone"]);
        assert!(!out.schema["Email"].is_parent_question());
        assert_eq!(out.key_collisions, vec!["Email".to_string()]);
    }

    #[test]
    fn lenient_interpretation_drops_only_bad_entries() {
        let raw: RawConditionalLogic = serde_json::from_value(json!({
            "parent_questions": [
                {"question_id": "has_kids", "label": "Do you have children?", "type": "boolean"},
                {"question_id": "broken", "type": "essay"}
            ],
            "field_relationships": {
                "0": {"parent_id": "has_kids", "condition": {"operator": "equals", "value": true}},
                "1": "has_kids",
                "2": {"parent_id": "has_kids", "condition": {"operator": "roughly", "value": 1}},
                "3": 42
            }
        }))
        .unwrap();

        let logic = interpret(raw);

        assert_eq!(logic.parent_questions.len(), 1);
        assert_eq!(logic.field_relationships.len(), 2);
        assert_eq!(logic.field_relationships["1"].parent_id, "has_kids");
        assert!(logic.field_relationships["1"].condition.is_none());
    }

    #[tokio::test]
    async fn transport_failure_yields_empty_logic() {
        let client = ScriptedClient::new(vec![Err(FormMergeError::LlmTimeout {
            stage: Stage::ConditionalLogic,
            secs: 30,
        })]);
        let config = ProcessorConfig::default();
        let mut ctx = StageContext::new(&client, &config);

        let logic = synthesize_logic(&mut ctx, &[grouped("Child 1", "children", 0)]).await;

        assert_eq!(logic, ConditionalLogic::default());
        assert!(matches!(
            ctx.fallbacks(),
            [StageFallback::NoConditionalLogic { .. }]
        ));
    }

    #[tokio::test]
    async fn label_fallback_is_templated() {
        let client = ScriptedClient::with_texts(&["not json", "{\"label\": \"\", \"explanation\": \"x\"}"]);
        let config = ProcessorConfig::default();
        let mut ctx = StageContext::new(&client, &config);

        let first = generate_label(&mut ctx, "Date of Birth").await;
        let second = generate_label(&mut ctx, "ZIP").await;

        assert_eq!(first.label, "What is your date of birth?");
        assert_eq!(first.explanation, "Enter your date of birth");
        assert_eq!(second.label, "What is your zip?");
        assert_eq!(ctx.fallbacks().len(), 2);
        assert_eq!(client.requests()[0].max_tokens, 512);
    }

    #[tokio::test]
    async fn finalize_labels_every_field() {
        let client = ScriptedClient::with_texts(&[
            "{\"parent_questions\": [], \"field_relationships\": {}}",
            "```json\n{\"label\": \"What is your name?\", \"explanation\": \"Your legal name\"}\n```",
            "{\"label\": \"What is your email?\", \"explanation\": \"Where we can reach you\"}",
        ]);
        let config = ProcessorConfig::default();
        let mut ctx = StageContext::new(&client, &config);
        let fields = vec![grouped("Name", "name", 0), grouped("Email", "contact", 1)];

        let out = finalize(&mut ctx, &fields).await;

        assert_eq!(out.schema.len(), 2);
        assert_eq!(out.schema["Name"].label, "What is your name?");
        assert_eq!(out.schema["Email"].explanation.as_deref(), Some("Where we can reach you"));
        assert!(ctx.fallbacks().is_empty());
        assert_eq!(ctx.llm_calls(), 3);
    }

    #[tokio::test]
    async fn finalize_on_empty_input_is_empty() {
        let client = ScriptedClient::with_texts(&[]);
        let config = ProcessorConfig::default();
        let mut ctx = StageContext::new(&client, &config);

        let out = finalize(&mut ctx, &[]).await;

        assert!(out.schema.is_empty());
        assert!(client.requests().is_empty());
    }
}
