//! Prompt templates for every LLM-backed stage.
//!
//! Unit tests inspect the rendered prompts directly, so a template that stops
//! embedding its field summary is caught without a live model.
//!
//! Each builder takes the JSON field summary already serialised by its stage
//! and returns the complete user message.

/// Instructions for clustering one batch of fields into duplicate groups.
const DEDUP_INSTRUCTIONS: &str = r#"You are an expert at analysing PDF form fields. The fields below were extracted from several PDF forms. Decide which of them ask for the SAME piece of information.

Rules:
1. Group fields that mean the same thing even when the wording differs ("Name", "Full Name" and "Applicant Name" all ask for the applicant's complete name).
2. Do not over-merge: "First Name" and "Full Name" ask for different information and stay separate.
3. Every index appears in exactly one group. A field with no duplicate forms a group of its own.
4. For each group choose the clearest, most complete field name as the canonical name.

Return a JSON array. Each element has:
- "canonical_name": the field name to use for the group
- "field_indices": the input indices that belong to the group
- "reasoning": one short sentence explaining the grouping

Example:
[
  {"canonical_name": "Full Name", "field_indices": [0, 5, 12], "reasoning": "All ask for the applicant's complete name"},
  {"canonical_name": "Date of Birth", "field_indices": [1], "reasoning": "No duplicates"}
]

Respond with ONLY the JSON array."#;

/// Instructions for assigning every field to one thematic group.
const GROUPING_INSTRUCTIONS: &str = r#"You are an expert at organising form fields for display. Group the fields below so related questions appear together.

Rules:
1. Put related fields in the same group (First Name, Middle Name and Last Name form a "name" group).
2. Typical groups: name, address, contact, employment, spouse, children, income, signature.
3. Every field belongs to exactly one group.
4. List groups in the order a person would naturally fill in the form.

Return a JSON array. Each element has:
- "group_name": short group name, e.g. "address"
- "field_indices": indices of the fields in the group
- "description": one short sentence describing the group

Example:
[
  {"group_name": "name", "field_indices": [0, 1, 2], "description": "Applicant's name components"},
  {"group_name": "address", "field_indices": [3, 4, 5, 6], "description": "Residential address"}
]

Respond with ONLY the JSON array."#;

/// Instructions for synthesizing gating questions and field conditions.
const CONDITIONAL_INSTRUCTIONS: &str = r#"You are an expert at designing smart forms that only ask relevant questions. Look at the fields below and find sets of fields that a single high-level question could switch on or off.

Examples of patterns:
- spouse1 … spouse6 fields → ask "Are you married?" or "How many spouses do you have?"
- child1, child2, … fields → ask "Do you have children?" and "How many children do you have?"

Return a JSON object with:
- "parent_questions": array of new questions, each
  {"question_id": unique snake_case id, "label": the question, "type": "boolean" | "number" | "choice", "options": [..] (only for "choice")}
- "field_relationships": object keyed by field index (as a string), each value
  {"parent_id": a question_id from parent_questions,
   "condition": {"operator": "equals" | "not_equals" | "greater_than" | "greater_or_equal" | "less_than" | "less_or_equal", "value": the value to compare against}}

Fields that are always shown are simply left out of "field_relationships".

Example:
{
  "parent_questions": [
    {"question_id": "is_married", "label": "Are you married?", "type": "boolean"},
    {"question_id": "num_children", "label": "How many children do you have?", "type": "number"}
  ],
  "field_relationships": {
    "5": {"parent_id": "is_married", "condition": {"operator": "equals", "value": true}},
    "10": {"parent_id": "num_children", "condition": {"operator": "greater_than", "value": 0}},
    "11": {"parent_id": "num_children", "condition": {"operator": "greater_or_equal", "value": 2}}
  }
}

Respond with ONLY the JSON object."#;

/// Deduplication prompt for one batch.
pub fn dedup_prompt(field_summary_json: &str) -> String {
    format!("{DEDUP_INSTRUCTIONS}\n\nFields:\n{field_summary_json}")
}

/// Grouping prompt over all deduplicated fields.
pub fn grouping_prompt(field_summary_json: &str) -> String {
    format!("{GROUPING_INSTRUCTIONS}\n\nFields:\n{field_summary_json}")
}

/// Structural-synthesis prompt over all grouped fields.
pub fn conditional_prompt(field_summary_json: &str) -> String {
    format!("{CONDITIONAL_INSTRUCTIONS}\n\nFields:\n{field_summary_json}")
}

/// Label-and-explanation prompt for a single field.
pub fn label_prompt(field_name: &str) -> String {
    format!(
        r#"The form field is named "{field_name}". Write:
1. "label": a clear, friendly question asking for this information
2. "explanation": one sentence telling the user how to fill it in

Examples:
- "DOB" → {{"label": "What is your date of birth?", "explanation": "Enter your date of birth as it appears on your birth certificate (MM/DD/YYYY)"}}
- "Applicant Full Name" → {{"label": "What is your full name?", "explanation": "Enter your complete legal name as it appears on official documents"}}

Respond with ONLY a JSON object: {{"label": "...", "explanation": "..."}}"#
    )
}

/// Label used when the model could not supply one.
pub fn fallback_label(field_name: &str) -> String {
    format!("What is your {}?", field_name.to_lowercase())
}

/// Explanation used when the model could not supply one.
pub fn fallback_explanation(field_name: &str) -> String {
    format!("Enter your {}", field_name.to_lowercase())
}

/// Input placeholder for a field.
pub fn placeholder(field_name: &str) -> String {
    format!("Enter your {}", field_name.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_prompts_embed_summary() {
        let summary = r#"[{"index": 0, "field_name": "Applicant Name"}]"#;
        for prompt in [
            dedup_prompt(summary),
            grouping_prompt(summary),
            conditional_prompt(summary),
        ] {
            assert!(prompt.contains(summary));
            assert!(prompt.contains("Respond with ONLY"));
        }
    }

    #[test]
    fn conditional_prompt_lists_every_operator() {
        let p = conditional_prompt("[]");
        for op in [
            "equals",
            "not_equals",
            "greater_than",
            "greater_or_equal",
            "less_than",
            "less_or_equal",
        ] {
            assert!(p.contains(op), "missing {op}");
        }
    }

    #[test]
    fn label_prompt_quotes_field_name() {
        let p = label_prompt("Spouse SSN");
        assert!(p.contains("\"Spouse SSN\""));
        assert!(p.contains(r#"{"label": "...", "explanation": "..."}"#));
    }

    #[test]
    fn templated_wording_lowercases_name() {
        assert_eq!(fallback_label("Date Of Birth"), "What is your date of birth?");
        assert_eq!(fallback_explanation("ZIP"), "Enter your zip");
        assert_eq!(placeholder("Email Address"), "Enter your email address");
    }
}
