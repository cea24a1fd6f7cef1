use crate::error::Result;
use crate::questions::Question;
use crate::schema::SchemaRegistry;

/// A fully composed chat request for one question. Built fresh per
/// question, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
}

/// Composes generation requests from schema text, question text and the
/// reply-format contract the parser expects.
pub struct PromptBuilder {
    sources_label: String,
}

impl PromptBuilder {
    pub fn new(registry: &SchemaRegistry) -> Self {
        Self {
            sources_label: registry.all_sources().join(" | "),
        }
    }

    /// Build the request for one question. Both schemas are embedded in
    /// full: classifying the question against a source is the model's job,
    /// not ours. Deterministic given identical inputs.
    pub fn build(&self, question: &Question, registry: &SchemaRegistry) -> Result<GenerationRequest> {
        let system_prompt = format!(
            r#"You are an expert SQL architect. Generate ANSI SQL ONLY IF all required data exists within ONE schema.

THINK STEP-BY-STEP AND SELF-ASSESS:

1. PARSE: What tables and columns does this question need?
2. VALIDATE PER SCHEMA: check each warehouse for ALL required tables and columns.
   If the data is split across schemas, explain why you cannot generate.
3. JOIN LOGIC: use only documented relationships (foreign keys).
4. CONFIDENCE: assign a decimal score from 0.0 to 1.0 based on your OWN judgment.
   1.0 = fully certain, 0.0 = impossible or missing data.
5. ASSUMPTIONS: explain what you checked, why you chose target_source, and the
   justification for your confidence.

OUTPUT FORMAT (STRICT JSON — NO EXTRA TEXT):
{{
  "target_source": "{}",
  "sql": "SELECT ... ; OR '-- Cannot generate: [reason]'",
  "assumptions": "Your detailed reasoning — what you validated, what you assumed",
  "confidence": 0.0 to 1.0
}}

NEVER BLUFF. If unsure, keep the confidence low. You are graded on honesty."#,
            self.sources_label
        );

        let schema_blocks: Result<Vec<String>> = registry
            .all_sources()
            .iter()
            .map(|source| {
                Ok(format!(
                    "=== {} ===\n{}",
                    source.to_uppercase(),
                    registry.describe(source)?
                ))
            })
            .collect();

        let user_prompt = format!(
            r#"AVAILABLE SCHEMAS — VALIDATE TABLE EXISTENCE BEFORE WRITING SQL:

{}

QUESTION TO ANSWER:
Question ID: {}
Question: "{}"

YOUR TASK:
- Decide which schema contains ALL required data.
- Write SQL ONLY if the data exists in ONE schema.
- If joining tables, confirm they share a documented relationship.
- Be transparent in assumptions and score confidence honestly."#,
            schema_blocks?.join("\n"),
            question.question_id,
            question.question
        );

        Ok(GenerationRequest {
            system_prompt,
            user_prompt,
        })
    }
}
