//! Data types flowing through the pipeline and written to disk.
//!
//! ```text
//! extract ──▶ Vec<FieldRecord> ──▶ dedup ──▶ Vec<FieldRecord>
//!         ──▶ grouping ──▶ Vec<GroupedField> ──▶ conditional ──▶ OutputSchema
//! ```
//!
//! Every stage borrows its input and returns freshly built values; merges
//! clone the base record first. That keeps each stage a pure function of
//! (input, LLM responses), which is what the scripted-client tests rely on.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ── Field records ────────────────────────────────────────────────────────

/// Kind of interactive AcroForm field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// `/Tx`: free text. Also the fallback for unknown codes.
    #[default]
    Text,
    /// `/Btn`: push button, checkbox, or radio group.
    Button,
    /// `/Ch`: combo box or list box.
    Choice,
    /// `/Sig`: digital signature.
    Signature,
}

impl FieldKind {
    /// Map a PDF `/FT` code to a field kind.
    ///
    /// Accepts the code with or without its leading slash. Anything that is
    /// not one of the four codes defined by ISO 32000 maps to [`FieldKind::Text`].
    pub fn from_pdf_type(code: &str) -> Self {
        match code.trim_start_matches('/') {
            "Tx" => FieldKind::Text,
            "Btn" => FieldKind::Button,
            "Ch" => FieldKind::Choice,
            "Sig" => FieldKind::Signature,
            _ => FieldKind::Text,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Button => "button",
            FieldKind::Choice => "choice",
            FieldKind::Signature => "signature",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `/Ff` bit 2 (value `2`) marks a field as required.
pub const FIELD_FLAG_REQUIRED: i64 = 1 << 1;

/// Whether a `/Ff` bitmask carries the required flag.
pub fn is_required(flags: i64) -> bool {
    flags & FIELD_FLAG_REQUIRED != 0
}

/// One form field as extracted from a PDF, and as carried through
/// deduplication and grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRecord {
    /// Fully-qualified field name; unique within one document only.
    pub field_name: String,
    /// File name of the document this record was read from.
    pub source_pdf: String,
    /// All documents that contributed to this record after deduplication.
    /// Empty until a merge happens.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub sources: BTreeSet<String>,
    pub field_type: FieldKind,
    pub required: bool,
    /// Pre-filled value.
    pub value: Option<String>,
    /// Choice options in document order.
    pub options: Option<Vec<String>>,
    pub max_length: Option<u32>,
    /// 1-based page number, when the widget could be located.
    pub page: Option<u32>,
}

impl FieldRecord {
    /// A bare record with no value, options, length limit or page.
    pub fn new(
        field_name: impl Into<String>,
        source_pdf: impl Into<String>,
        field_type: FieldKind,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            source_pdf: source_pdf.into(),
            sources: BTreeSet::new(),
            field_type,
            required: false,
            value: None,
            options: None,
            max_length: None,
            page: None,
        }
    }

    /// Every document this record represents, sorted and deduplicated.
    pub fn source_documents(&self) -> Vec<String> {
        if self.sources.is_empty() {
            vec![self.source_pdf.clone()]
        } else {
            self.sources.iter().cloned().collect()
        }
    }
}

/// The `--extract-only` output: raw records, no LLM processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub total_fields: usize,
    pub fields: Vec<FieldRecord>,
}

impl From<Vec<FieldRecord>> for ExtractionReport {
    fn from(fields: Vec<FieldRecord>) -> Self {
        Self {
            total_fields: fields.len(),
            fields,
        }
    }
}

// ── Grouping ─────────────────────────────────────────────────────────────

/// The thematic group a field was placed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupTag {
    pub group_name: String,
    pub description: String,
    /// Position of the group in the grouping response; the field's display order.
    pub display_order: usize,
}

/// A deduplicated field plus its group assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupedField {
    pub record: FieldRecord,
    pub group: Option<GroupTag>,
}

impl GroupedField {
    /// A field that never went through grouping.
    pub fn ungrouped(record: FieldRecord) -> Self {
        Self {
            record,
            group: None,
        }
    }

    /// Display order: the group's order, else the field's own position.
    pub fn order_index(&self, position: usize) -> usize {
        self.group
            .as_ref()
            .map_or(position, |g| g.display_order)
    }
}

// ── Conditional logic ────────────────────────────────────────────────────

/// Answer type of a synthesized gating question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Boolean,
    Number,
    Choice,
}

/// A synthesized question that gates other fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentQuestion {
    pub question_id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// Comparison applied to a parent question's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
}

/// `{operator, value}`: when the dependent field applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub operator: ConditionOperator,
    pub value: serde_json::Value,
}

/// Link from one field to the question that gates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRelationship {
    pub parent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

/// Parent questions plus the field-index → relationship map.
///
/// Keys of `field_relationships` are field positions, stringified, in the
/// list the structural prompt was built from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionalLogic {
    pub parent_questions: Vec<ParentQuestion>,
    pub field_relationships: BTreeMap<String, FieldRelationship>,
}

/// User-facing wording for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLabel {
    pub label: String,
    pub explanation: String,
}

// ── Output schema ────────────────────────────────────────────────────────

/// Keyed, insertion-ordered output: parent questions first, then fields.
pub type OutputSchema = IndexMap<String, SchemaEntry>;

/// Input widget type in the output schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Text,
    Button,
    Choice,
    Signature,
    Boolean,
    Number,
}

impl From<FieldKind> for EntryType {
    fn from(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Text => EntryType::Text,
            FieldKind::Button => EntryType::Button,
            FieldKind::Choice => EntryType::Choice,
            FieldKind::Signature => EntryType::Signature,
        }
    }
}

impl From<QuestionType> for EntryType {
    fn from(kind: QuestionType) -> Self {
        match kind {
            QuestionType::Boolean => EntryType::Boolean,
            QuestionType::Number => EntryType::Number,
            QuestionType::Choice => EntryType::Choice,
        }
    }
}

/// One renderable form entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(rename = "type")]
    pub kind: EntryType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(rename = "_metadata")]
    pub metadata: SchemaMetadata,
}

impl SchemaEntry {
    pub fn is_parent_question(&self) -> bool {
        matches!(self.metadata, SchemaMetadata::ParentQuestion(_))
    }

    /// Field metadata, or `None` for a synthesized question.
    pub fn field_metadata(&self) -> Option<&FieldMetadata> {
        match &self.metadata {
            SchemaMetadata::Field(m) => Some(m),
            SchemaMetadata::ParentQuestion(_) => None,
        }
    }
}

/// The `_metadata` block: different shape for questions and fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaMetadata {
    ParentQuestion(ParentQuestionMetadata),
    Field(FieldMetadata),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentQuestionMetadata {
    pub is_parent_question: bool,
    pub generated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub field_name: String,
    pub source_pdf: Vec<String>,
    pub order_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_condition: Option<Condition>,
    /// Reserved for layout; always `null`.
    pub position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_mapping_is_total() {
        assert_eq!(FieldKind::from_pdf_type("Tx"), FieldKind::Text);
        assert_eq!(FieldKind::from_pdf_type("/Btn"), FieldKind::Button);
        assert_eq!(FieldKind::from_pdf_type("Ch"), FieldKind::Choice);
        assert_eq!(FieldKind::from_pdf_type("/Sig"), FieldKind::Signature);
        for unknown in ["", "Xfa", "tx", "/", "Widget", "Btn2"] {
            assert_eq!(FieldKind::from_pdf_type(unknown), FieldKind::Text, "{unknown}");
        }
    }

    #[test]
    fn required_flag_tracks_bit_two() {
        for f in 0..4096_i64 {
            assert_eq!(is_required(f), (f & 2) != 0, "flags={f}");
        }
        assert!(is_required(i64::MAX));
        assert!(!is_required(1 << 40));
    }

    #[test]
    fn source_documents_falls_back_to_source_pdf() {
        let mut r = FieldRecord::new("Name", "a.pdf", FieldKind::Text);
        assert_eq!(r.source_documents(), vec!["a.pdf"]);

        r.sources = ["b.pdf".to_string(), "a.pdf".to_string()].into_iter().collect();
        assert_eq!(r.source_documents(), vec!["a.pdf", "b.pdf"]);
    }

    #[test]
    fn raw_record_serialises_nulls_but_not_empty_sources() {
        let r = FieldRecord::new("Email", "form.pdf", FieldKind::Text);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["field_type"], "text");
        assert!(json["value"].is_null());
        assert!(json.get("sources").is_none());
    }

    #[test]
    fn order_index_prefers_group() {
        let record = FieldRecord::new("City", "a.pdf", FieldKind::Text);
        let ungrouped = GroupedField::ungrouped(record.clone());
        assert_eq!(ungrouped.order_index(7), 7);

        let grouped = GroupedField {
            record,
            group: Some(GroupTag {
                group_name: "address".into(),
                description: String::new(),
                display_order: 2,
            }),
        };
        assert_eq!(grouped.order_index(7), 2);
    }

    #[test]
    fn condition_operator_wire_names() {
        let c: Condition =
            serde_json::from_str(r#"{"operator":"greater_or_equal","value":2}"#).unwrap();
        assert_eq!(c.operator, ConditionOperator::GreaterOrEqual);
        assert_eq!(c.value, serde_json::json!(2));
        assert!(serde_json::from_str::<Condition>(r#"{"operator":"between","value":1}"#).is_err());
    }

    #[test]
    fn metadata_untagged_round_trip() {
        let parent = SchemaMetadata::ParentQuestion(ParentQuestionMetadata {
            is_parent_question: true,
            generated: true,
        });
        let json = serde_json::to_string(&parent).unwrap();
        let back: SchemaMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, parent);

        let field: SchemaMetadata = serde_json::from_str(
            r#"{"field_name":"Name","source_pdf":["a.pdf"],"order_index":0,"position":null}"#,
        )
        .unwrap();
        assert!(matches!(field, SchemaMetadata::Field(_)));
    }
}
